pub mod crypto;
pub mod storage;

use crate::errors::WalletError;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub use storage::{FileSecretStorage, SecretStorage};

#[cfg(test)]
pub use storage::MemorySecretStorage;

pub const MASTER_KEYS_ENTRY: &str = "master_keys";
pub const SEED_CONFIRMED_ENTRY: &str = "seed_confirmed";

/// The private keys for both chains. The only secret that is ever persisted.
///
/// `ethereum` is `0x`-prefixed hex of the 32-byte secp256k1 key, `solana` is base64 of the
/// 64-byte ed25519 keypair.
#[derive(Debug, Clone)]
pub struct MasterKeyRecord {
    pub ethereum: SecretString,
    pub solana: SecretString,
}

// Serialized form. Both fields are required: a blob missing either one is unreadable.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKeys {
    ethereum: String,
    solana: String,
}

impl MasterKeyRecord {
    fn to_blob(&self) -> eyre::Result<Zeroizing<Vec<u8>>> {
        let stored = StoredKeys {
            ethereum: self.ethereum.expose_secret().to_owned(),
            solana: self.solana.expose_secret().to_owned(),
        };
        Ok(Zeroizing::new(serde_json::to_vec(&stored)?))
    }

    fn from_blob(blob: &[u8]) -> eyre::Result<Self> {
        let stored: StoredKeys = serde_json::from_slice(blob)
            .map_err(|e| eyre::eyre!("master key record is malformed: {e}"))?;
        if stored.ethereum.trim().is_empty() || stored.solana.trim().is_empty() {
            eyre::bail!("master key record is incomplete");
        }
        Ok(Self {
            ethereum: SecretString::new(stored.ethereum.as_str().into()),
            solana: SecretString::new(stored.solana.as_str().into()),
        })
    }
}

impl<T: SecretStorage + ?Sized> SecretStorage for Arc<T> {
    fn read(&self, name: &str) -> eyre::Result<Option<Zeroizing<Vec<u8>>>> {
        (**self).read(name)
    }

    fn write(&self, name: &str, value: &[u8]) -> eyre::Result<()> {
        (**self).write(name, value)
    }

    fn delete(&self, name: &str) -> eyre::Result<()> {
        (**self).delete(name)
    }
}

/// Persistence of the key record and the seed-confirmation flag.
///
/// Nothing here retries; every failure is returned to the caller as a [`WalletError`].
#[derive(Debug, Clone)]
pub struct KeyStore<S> {
    storage: S,
}

impl KeyStore<FileSecretStorage> {
    pub fn open(paths: &crate::paths::WalletPaths) -> eyre::Result<Self> {
        Ok(Self::new(FileSecretStorage::open(&paths.secure_dir())?))
    }
}

impl<S: SecretStorage> KeyStore<S> {
    pub const fn new(storage: S) -> Self {
        Self { storage }
    }

    #[cfg(test)]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Overwrites any existing record in one write.
    pub fn save(&self, record: &MasterKeyRecord) -> Result<(), WalletError> {
        let blob = record.to_blob().map_err(|e| WalletError::storage_write(&e))?;
        self.storage
            .write(MASTER_KEYS_ENTRY, &blob)
            .map_err(|e| WalletError::storage_write(&e))?;
        tracing::info!("master key record saved");
        Ok(())
    }

    pub fn get(&self) -> Result<Option<MasterKeyRecord>, WalletError> {
        let Some(blob) = self
            .storage
            .read(MASTER_KEYS_ENTRY)
            .map_err(|e| WalletError::storage_read(&e))?
        else {
            return Ok(None);
        };
        MasterKeyRecord::from_blob(&blob)
            .map(Some)
            .map_err(|e| WalletError::storage_read(&e))
    }

    pub fn has_keys(&self) -> Result<bool, WalletError> {
        Ok(self.get()?.is_some())
    }

    /// The flag may only become true while a key record exists.
    pub fn set_confirmation(&self, confirmed: bool) -> Result<(), WalletError> {
        if confirmed && !self.has_keys()? {
            return Err(WalletError::MissingKeys);
        }
        let v: &[u8] = if confirmed { b"true" } else { b"false" };
        self.storage
            .write(SEED_CONFIRMED_ENTRY, v)
            .map_err(|e| WalletError::storage_write(&e))?;
        tracing::debug!(confirmed, "seed confirmation flag written");
        Ok(())
    }

    /// An absent flag reads as `false`.
    pub fn get_confirmation(&self) -> Result<bool, WalletError> {
        let raw = self
            .storage
            .read(SEED_CONFIRMED_ENTRY)
            .map_err(|e| WalletError::storage_read(&e))?;
        match raw.as_deref().map(Vec::as_slice) {
            None | Some(b"false") => Ok(false),
            Some(b"true") => Ok(true),
            Some(_) => Err(WalletError::StorageRead(
                "seed confirmation flag is malformed".into(),
            )),
        }
    }

    /// Removes both entries. The second removal is attempted even when the first fails.
    pub fn clear(&self) -> Result<(), WalletError> {
        let keys = self.storage.delete(MASTER_KEYS_ENTRY);
        let flag = self.storage.delete(SEED_CONFIRMED_ENTRY);
        match (keys, flag) {
            (Ok(()), Ok(())) => {
                tracing::info!("secure storage cleared");
                Ok(())
            }
            (Err(e), _) | (Ok(()), Err(e)) => {
                tracing::warn!(error = %format!("{e:#}"), "secure storage clear incomplete");
                Err(WalletError::storage_write(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn record() -> MasterKeyRecord {
        MasterKeyRecord {
            ethereum: SecretString::new("0x0101".into()),
            solana: SecretString::new("AQID".into()),
        }
    }

    fn memory_store() -> KeyStore<Arc<MemorySecretStorage>> {
        KeyStore::new(Arc::new(MemorySecretStorage::default()))
    }

    #[test]
    fn save_then_get_returns_equal_record() -> eyre::Result<()> {
        let ks = memory_store();
        assert!(ks.get()?.is_none());
        ks.save(&record())?;
        let got = ks.get()?.ok_or_else(|| eyre::eyre!("missing record"))?;
        assert_eq!(got.ethereum.expose_secret(), "0x0101");
        assert_eq!(got.solana.expose_secret(), "AQID");
        Ok(())
    }

    #[test]
    fn save_overwrites_previous_record() -> eyre::Result<()> {
        let ks = memory_store();
        ks.save(&record())?;
        ks.save(&MasterKeyRecord {
            ethereum: SecretString::new("0x0202".into()),
            solana: SecretString::new("BAUG".into()),
        })?;
        let got = ks.get()?.ok_or_else(|| eyre::eyre!("missing record"))?;
        assert_eq!(got.ethereum.expose_secret(), "0x0202");
        Ok(())
    }

    #[test]
    fn partial_record_is_a_read_error() -> eyre::Result<()> {
        let ks = memory_store();
        ks.storage()
            .put_raw(MASTER_KEYS_ENTRY, br#"{"ethereum":"0x0101"}"#)?;
        let err = ks.get().err().ok_or_else(|| eyre::eyre!("expected error"))?;
        assert_eq!(err.code(), "storage_read_error");
        Ok(())
    }

    #[test]
    fn failed_write_reports_storage_write() -> eyre::Result<()> {
        let ks = memory_store();
        ks.storage().fail_writes.store(true, Ordering::SeqCst);
        let err = ks
            .save(&record())
            .err()
            .ok_or_else(|| eyre::eyre!("expected error"))?;
        assert!(matches!(err, WalletError::StorageWrite(_)), "got {err:?}");
        assert!(ks.get()?.is_none());
        Ok(())
    }

    #[test]
    fn confirmation_requires_keys() -> eyre::Result<()> {
        let ks = memory_store();
        assert!(!ks.get_confirmation()?);
        assert_eq!(ks.set_confirmation(true), Err(WalletError::MissingKeys));
        ks.set_confirmation(false)?;

        ks.save(&record())?;
        ks.set_confirmation(true)?;
        assert!(ks.get_confirmation()?);
        Ok(())
    }

    #[test]
    fn clear_removes_both_entries_even_if_one_delete_fails() -> eyre::Result<()> {
        let ks = memory_store();
        ks.save(&record())?;
        ks.set_confirmation(true)?;
        *ks.storage()
            .fail_deletes_of
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))? = Some(MASTER_KEYS_ENTRY.into());

        assert!(ks.clear().is_err());
        assert!(ks.storage().contains(MASTER_KEYS_ENTRY)?);
        assert!(!ks.storage().contains(SEED_CONFIRMED_ENTRY)?);
        Ok(())
    }

    #[test]
    fn file_backed_store_round_trips() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = crate::paths::WalletPaths::rooted(dir.path().join("c"), dir.path().join("d"));
        let ks = KeyStore::open(&paths)?;
        ks.save(&record())?;
        ks.set_confirmation(true)?;

        let reopened = KeyStore::open(&paths)?;
        assert!(reopened.get_confirmation()?);
        assert!(reopened.get()?.is_some());
        reopened.clear()?;
        assert!(reopened.get()?.is_none());
        assert!(!reopened.get_confirmation()?);
        Ok(())
    }
}
