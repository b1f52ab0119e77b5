use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use eyre::Context as _;
use hkdf::Hkdf;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const CRYPTO_BOX_VERSION: u8 = 1;

/// One AES-256-GCM ciphertext plus its nonce, as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoBox {
    pub v: u8,
    pub nonce_b64: String,
    pub ct_b64: String,
}

pub fn fill_random(buf: &mut [u8]) {
    rand::rng().fill_bytes(buf);
}

/// Per-entry key: HKDF-SHA256 over the machine secret, bound to the entry name.
pub fn derive_entry_key(machine_secret: &[u8; 32], entry: &str) -> eyre::Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, machine_secret);
    let info = format!("duowallet:secure-entry:{entry}");
    let mut out = [0_u8; 32];
    hk.expand(info.as_bytes(), &mut out)
        .map_err(|e| eyre::eyre!("hkdf expand: {e}"))?;
    Ok(out)
}

pub fn encrypt_aes_gcm(key32: &[u8; 32], plaintext: &[u8]) -> eyre::Result<CryptoBox> {
    let cipher = Aes256Gcm::new_from_slice(key32).context("aes init")?;
    let mut nonce = [0_u8; 12];
    fill_random(&mut nonce);
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| eyre::eyre!("aes encrypt: {e}"))?;

    Ok(CryptoBox {
        v: CRYPTO_BOX_VERSION,
        nonce_b64: base64::engine::general_purpose::STANDARD.encode(nonce),
        ct_b64: base64::engine::general_purpose::STANDARD.encode(ct),
    })
}

pub fn decrypt_aes_gcm(key32: &[u8; 32], b: &CryptoBox) -> eyre::Result<Vec<u8>> {
    if b.v != CRYPTO_BOX_VERSION {
        eyre::bail!("unsupported CryptoBox version: {}", b.v);
    }
    let nonce = base64::engine::general_purpose::STANDARD
        .decode(&b.nonce_b64)
        .context("decode nonce")?;
    if nonce.len() != 12 {
        eyre::bail!("invalid nonce length");
    }
    let ct = base64::engine::general_purpose::STANDARD
        .decode(&b.ct_b64)
        .context("decode ciphertext")?;

    let cipher = Aes256Gcm::new_from_slice(key32).context("aes init")?;
    cipher
        .decrypt(Nonce::from_slice(&nonce), ct.as_ref())
        .map_err(|e| eyre::eyre!("aes decrypt: {e}"))
}
