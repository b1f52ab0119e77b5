use crate::{errors::WalletError, keystore::MasterKeyRecord};
use alloy::signers::local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use base64::Engine as _;
use bip39::{Language, Mnemonic};
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use secrecy::{ExposeSecret as _, SecretString};
use solana_derivation_path::DerivationPath as SolanaDerivationPath;
use solana_keypair::{seed_derivable::keypair_from_seed_and_derivation_path, Keypair};
use solana_seed_phrase::generate_seed_from_seed_phrase_and_passphrase;
use solana_signer::Signer as _;
use zeroize::Zeroizing;

pub const ACCEPTED_WORD_COUNTS: [usize; 2] = [12, 24];

/// Public identity plus signing secret of one chain's account.
#[derive(Debug, Clone)]
pub struct DerivedWallet {
    pub address: String,
    pub public_key: String,
    pub secret: SecretString,
}

#[derive(Debug, Clone)]
pub struct DerivedWallets {
    pub ethereum: DerivedWallet,
    pub solana: DerivedWallet,
}

impl DerivedWallets {
    pub fn master_key_record(&self) -> MasterKeyRecord {
        MasterKeyRecord {
            ethereum: self.ethereum.secret.clone(),
            solana: self.solana.secret.clone(),
        }
    }
}

/// Validate user input as a recovery phrase.
///
/// Whitespace is collapsed and case folded before counting words. Only 12- and 24-word phrases
/// pass the shape check; a phrase of the right length that fails the BIP-39 wordlist or
/// checksum is reported as a derivation error.
pub fn parse_phrase(input: &str) -> Result<Mnemonic, WalletError> {
    let normalized = Zeroizing::new(
        input
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    );
    let words = normalized.split(' ').filter(|w| !w.is_empty()).count();
    if !ACCEPTED_WORD_COUNTS.contains(&words) {
        return Err(WalletError::InvalidPhraseFormat { words });
    }
    Mnemonic::parse_in_normalized(Language::English, normalized.as_str())
        .map_err(|e| WalletError::Derivation(format!("invalid recovery phrase: {e}")))
}

pub fn generate_phrase() -> Result<Mnemonic, WalletError> {
    Mnemonic::generate_in(Language::English, 12)
        .map_err(|e| WalletError::Derivation(format!("generate mnemonic: {e}")))
}

fn derivation_err(what: &str, e: impl std::fmt::Display) -> WalletError {
    WalletError::Derivation(format!("{what}: {e}"))
}

/// Uncompressed SEC1 public key (`0x04 || X || Y`), hex encoded.
fn ethereum_public_key(signer: &PrivateKeySigner) -> String {
    let point = k256::PublicKey::from(signer.credential().verifying_key()).to_encoded_point(false);
    format!("0x{}", hex::encode(point.as_bytes()))
}

fn ethereum_wallet(signer: &PrivateKeySigner) -> DerivedWallet {
    let secret = Zeroizing::new(format!("0x{}", hex::encode(signer.to_bytes())));
    DerivedWallet {
        address: signer.address().to_checksum(None),
        public_key: ethereum_public_key(signer),
        secret: SecretString::new(secret.as_str().into()),
    }
}

fn solana_wallet(kp: &Keypair) -> DerivedWallet {
    let bytes = Zeroizing::new(kp.to_bytes());
    let secret = Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(bytes.as_ref()));
    let pubkey = kp.pubkey().to_string();
    DerivedWallet {
        address: pubkey.clone(),
        public_key: pubkey,
        secret: SecretString::new(secret.as_str().into()),
    }
}

/// Derive the Ethereum (`m/44'/60'/0'/0/0`) and Solana (`m/44'/501'/0'/0'`) accounts.
pub fn derive_wallets(mnemonic: &Mnemonic) -> Result<DerivedWallets, WalletError> {
    let phrase = Zeroizing::new(mnemonic.to_string());

    let signer = MnemonicBuilder::<English>::default()
        .phrase(phrase.as_str())
        .index(0)
        .map_err(|e| derivation_err("ethereum index", e))?
        .build()
        .map_err(|e| derivation_err("build ethereum wallet", e))?;

    let seed = Zeroizing::new(generate_seed_from_seed_phrase_and_passphrase(
        phrase.as_str(),
        "",
    ));
    let path = SolanaDerivationPath::new_bip44(Some(0), Some(0));
    let kp = keypair_from_seed_and_derivation_path(&seed, Some(path))
        .map_err(|e| derivation_err("derive solana keypair", e))?;

    Ok(DerivedWallets {
        ethereum: ethereum_wallet(&signer),
        solana: solana_wallet(&kp),
    })
}

/// Rebuild the public halves from a stored record (used when the process starts with keys
/// on disk but no addresses in memory).
pub fn wallets_from_record(record: &MasterKeyRecord) -> Result<DerivedWallets, WalletError> {
    let signer = ethereum_signer(&record.ethereum)?;
    let kp = solana_keypair(&record.solana)?;
    Ok(DerivedWallets {
        ethereum: ethereum_wallet(&signer),
        solana: solana_wallet(&kp),
    })
}

pub fn ethereum_signer(secret: &SecretString) -> Result<PrivateKeySigner, WalletError> {
    let s = secret.expose_secret().trim();
    let hex_part = s.strip_prefix("0x").unwrap_or(s);
    let bytes = Zeroizing::new(
        hex::decode(hex_part).map_err(|e| derivation_err("decode ethereum key", e))?,
    );
    PrivateKeySigner::from_slice(&bytes).map_err(|e| derivation_err("parse ethereum key", e))
}

pub fn solana_keypair(secret: &SecretString) -> Result<Keypair, WalletError> {
    let bytes = Zeroizing::new(
        base64::engine::general_purpose::STANDARD
            .decode(secret.expose_secret().trim())
            .map_err(|e| derivation_err("decode solana key", e))?,
    );
    Keypair::try_from(bytes.as_slice()).map_err(|e| derivation_err("parse solana keypair", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn golden_vectors_abandon_about() -> eyre::Result<()> {
        let m = parse_phrase(ABANDON_ABOUT)?;
        let w = derive_wallets(&m)?;
        assert_eq!(
            w.ethereum.address,
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );
        assert_eq!(w.solana.address, "HAgk14JpMQLgt6rVgv7cBQFJWFto5Dqxi472uT3DKpqk");
        assert_eq!(w.solana.public_key, w.solana.address);
        assert!(w.ethereum.public_key.starts_with("0x04"));
        assert_eq!(w.ethereum.public_key.len(), 2 + 130);
        Ok(())
    }

    #[test]
    fn derivation_is_deterministic() -> eyre::Result<()> {
        let m = generate_phrase()?;
        let a = derive_wallets(&m)?;
        let b = derive_wallets(&parse_phrase(&m.to_string())?)?;
        assert_eq!(a.ethereum.address, b.ethereum.address);
        assert_eq!(a.solana.address, b.solana.address);
        assert_eq!(
            a.ethereum.secret.expose_secret(),
            b.ethereum.secret.expose_secret()
        );
        assert_eq!(a.solana.secret.expose_secret(), b.solana.secret.expose_secret());
        Ok(())
    }

    #[test]
    fn phrase_input_is_normalized() -> eyre::Result<()> {
        let messy = format!("  {}\n", ABANDON_ABOUT.to_uppercase().replace(' ', "   "));
        let m = parse_phrase(&messy)?;
        assert_eq!(m.to_string(), ABANDON_ABOUT);
        Ok(())
    }

    #[test]
    fn wrong_word_counts_are_rejected() {
        for n in [0_usize, 1, 11, 13, 15, 18, 23, 25] {
            let phrase = vec!["abandon"; n].join(" ");
            assert_eq!(
                parse_phrase(&phrase).err(),
                Some(WalletError::InvalidPhraseFormat { words: n }),
                "{n} words"
            );
        }
    }

    #[test]
    fn bad_checksum_is_a_derivation_error() {
        let phrase = vec!["abandon"; 12].join(" ");
        assert!(matches!(
            parse_phrase(&phrase),
            Err(WalletError::Derivation(_))
        ));
    }

    #[test]
    fn record_round_trips_to_same_addresses() -> eyre::Result<()> {
        let w = derive_wallets(&parse_phrase(ABANDON_ABOUT)?)?;
        let again = wallets_from_record(&w.master_key_record())?;
        assert_eq!(again.ethereum.address, w.ethereum.address);
        assert_eq!(again.ethereum.public_key, w.ethereum.public_key);
        assert_eq!(again.solana.address, w.solana.address);
        Ok(())
    }

    #[test]
    fn ethereum_secret_is_prefixed_hex_and_solana_secret_is_64_bytes() -> eyre::Result<()> {
        let w = derive_wallets(&parse_phrase(ABANDON_ABOUT)?)?;
        let eth = w.ethereum.secret.expose_secret();
        assert!(eth.starts_with("0x"));
        assert_eq!(eth.len(), 66);
        let sol = base64::engine::general_purpose::STANDARD.decode(w.solana.secret.expose_secret())?;
        assert_eq!(sol.len(), 64);
        Ok(())
    }
}
