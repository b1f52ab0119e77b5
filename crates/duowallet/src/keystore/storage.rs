//! The platform secure-storage primitive: named, encrypted, opaque byte entries.
//!
//! [`KeyStore`](super::KeyStore) only relies on the read/write/delete contract below, so the
//! on-disk implementation can be swapped for an OS keychain without touching the key logic.

use super::crypto;
use eyre::Context as _;
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};
use zeroize::Zeroizing;

pub trait SecretStorage: Send + Sync {
    /// `Ok(None)` when the entry has never been written (or was deleted).
    fn read(&self, name: &str) -> eyre::Result<Option<Zeroizing<Vec<u8>>>>;
    /// Replaces the entry as a whole; a failed write leaves the previous value intact.
    fn write(&self, name: &str, value: &[u8]) -> eyre::Result<()>;
    /// Deleting a missing entry succeeds.
    fn delete(&self, name: &str) -> eyre::Result<()>;
}

fn validate_entry_name(name: &str) -> eyre::Result<()> {
    let ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if !ok {
        eyre::bail!("invalid secure entry name: {name:?}");
    }
    Ok(())
}

/// Entries are AES-256-GCM boxes (JSON) under a private directory. Each entry key is derived
/// from a 32-byte machine secret that never leaves the directory.
#[derive(Debug, Clone)]
pub struct FileSecretStorage {
    dir: PathBuf,
}

impl FileSecretStorage {
    pub fn open(dir: &Path) -> eyre::Result<Self> {
        crate::fsutil::ensure_private_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn machine_secret_path(&self) -> PathBuf {
        self.dir.join("machine_secret.bin")
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join("secure.lock")
    }

    fn machine_secret(&self) -> eyre::Result<Zeroizing<[u8; 32]>> {
        let p = self.machine_secret_path();
        let mut out = Zeroizing::new([0_u8; 32]);
        if p.exists() {
            let buf = Zeroizing::new(fs::read(&p).context("read machine secret")?);
            if buf.len() != 32 {
                eyre::bail!("machine secret wrong length");
            }
            out.copy_from_slice(&buf);
            return Ok(out);
        }

        crypto::fill_random(out.as_mut());
        crate::fsutil::write_atomic_restrictive(
            &p,
            out.as_ref(),
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write machine secret")?;
        Ok(out)
    }

    /// Exclusive lock for writers (single-writer across processes). Fails fast when held.
    fn acquire_write_lock(&self) -> eyre::Result<File> {
        let mut oo = OpenOptions::new();
        oo.create(true).read(true).write(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            oo.mode(crate::fsutil::MODE_FILE_PRIVATE);
        }
        let f = oo.open(self.lock_path()).context("open lock file")?;
        match f.try_lock_exclusive() {
            Ok(()) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                eyre::bail!("secure storage is busy (another writer holds the lock)")
            }
            Err(e) => Err(eyre::Report::new(e).wrap_err("lock exclusive")),
        }
    }

    fn with_write_lock<T>(&self, f: impl FnOnce() -> eyre::Result<T>) -> eyre::Result<T> {
        let lock = self.acquire_write_lock()?;
        let out = f();
        FileExt::unlock(&lock).context("unlock")?;
        out
    }
}

impl SecretStorage for FileSecretStorage {
    fn read(&self, name: &str) -> eyre::Result<Option<Zeroizing<Vec<u8>>>> {
        validate_entry_name(name)?;
        let p = self.entry_path(name);
        if !p.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        let sealed: crypto::CryptoBox =
            serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
        let key = Zeroizing::new(crypto::derive_entry_key(&*self.machine_secret()?, name)?);
        let plain = crypto::decrypt_aes_gcm(&key, &sealed)
            .with_context(|| format!("decrypt entry {name}"))?;
        Ok(Some(Zeroizing::new(plain)))
    }

    fn write(&self, name: &str, value: &[u8]) -> eyre::Result<()> {
        validate_entry_name(name)?;
        self.with_write_lock(|| {
            let key = Zeroizing::new(crypto::derive_entry_key(&*self.machine_secret()?, name)?);
            let sealed = crypto::encrypt_aes_gcm(&key, value)?;
            let s = serde_json::to_string_pretty(&sealed).context("serialize entry")?;
            crate::fsutil::write_string_atomic_restrictive(
                &self.entry_path(name),
                &s,
                crate::fsutil::MODE_FILE_PRIVATE,
            )
            .with_context(|| format!("write entry {name}"))
        })
    }

    fn delete(&self, name: &str) -> eyre::Result<()> {
        validate_entry_name(name)?;
        self.with_write_lock(|| crate::fsutil::remove_file_if_exists(&self.entry_path(name)))
    }
}

#[cfg(test)]
pub use memory::MemorySecretStorage;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_storage_round_trips_and_deletes() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = FileSecretStorage::open(&dir.path().join("secure"))?;
        assert!(s.read("master_keys")?.is_none());

        s.write("master_keys", b"hello")?;
        let got = s.read("master_keys")?.ok_or_else(|| eyre::eyre!("missing"))?;
        assert_eq!(got.as_slice(), b"hello");

        s.delete("master_keys")?;
        s.delete("master_keys")?;
        assert!(s.read("master_keys")?.is_none());
        Ok(())
    }

    #[test]
    fn file_storage_does_not_keep_plaintext_on_disk() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("secure");
        let s = FileSecretStorage::open(&root)?;
        s.write("master_keys", b"super-secret-key-material")?;
        let raw = fs::read_to_string(root.join("master_keys.json"))?;
        assert!(!raw.contains("super-secret"), "plaintext leaked: {raw}");
        Ok(())
    }

    #[test]
    fn reopened_storage_reads_previous_entries() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("secure");
        FileSecretStorage::open(&root)?.write("seed_confirmed", b"true")?;
        let again = FileSecretStorage::open(&root)?;
        let got = again
            .read("seed_confirmed")?
            .ok_or_else(|| eyre::eyre!("missing"))?;
        assert_eq!(got.as_slice(), b"true");
        Ok(())
    }

    #[test]
    fn rejects_path_like_entry_names() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let s = FileSecretStorage::open(dir.path())?;
        assert!(s.write("../escape", b"x").is_err());
        assert!(s.read("").is_err());
        Ok(())
    }
}
