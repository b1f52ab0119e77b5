use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct WalletPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl WalletPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("DUOWALLET_DATA_DIR"),
            std::env::var("DUOWALLET_CONFIG_DIR"),
        ) {
            return Ok(Self::rooted(PathBuf::from(config_dir), PathBuf::from(data_dir)));
        }

        // macOS: ~/Library/Application Support/duowallet
        // Linux: ~/.config/duowallet
        // Windows: %APPDATA%\\duowallet
        let proj =
            ProjectDirs::from("", "", "duowallet").context("failed to resolve project dirs")?;
        Ok(Self::rooted(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn rooted(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("duowallet.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    /// Directory holding the encrypted key entries and the machine secret.
    pub fn secure_dir(&self) -> PathBuf {
        self.config_dir.join("secure")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_paths_live_under_given_dirs() {
        let p = WalletPaths::rooted(PathBuf::from("/c"), PathBuf::from("/d"));
        assert_eq!(p.log_file, PathBuf::from("/d/duowallet.log.jsonl"));
        assert_eq!(p.secure_dir(), PathBuf::from("/c/secure"));
        assert_eq!(p.config_file(), PathBuf::from("/c/config.toml"));
    }
}
