use crate::{
    config::{NetworkMode, RpcConfig, WalletConfig},
    paths::WalletPaths,
};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

fn parse_network_mode_env(s: &str) -> Option<NetworkMode> {
    match s.trim().to_lowercase().as_str() {
        "mainnet" | "main" | "prod" | "production" => Some(NetworkMode::Mainnet),
        "testnet" | "test" | "sepolia" | "devnet" => Some(NetworkMode::Testnet),
        _ => None,
    }
}

/// Apply environment variable overrides on top of the loaded file.
fn apply_env_overrides(cfg: &mut WalletConfig) {
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("DUOWALLET_ETHEREUM_RPC_URL", |v| {
        v.clone_into(&mut cfg.rpc.ethereum_rpc_url);
    });
    apply_env("DUOWALLET_SOLANA_RPC_URL", |v| {
        v.clone_into(&mut cfg.rpc.solana_rpc_url);
    });
    apply_env("DUOWALLET_ETHEREUM_INDEXER_URL", |v| {
        cfg.rpc.ethereum_indexer_url = Some(v.to_owned());
    });
    apply_env("DUOWALLET_BINANCE_BASE_URL", |v| {
        v.clone_into(&mut cfg.http.binance_base_url);
    });
}

/// On first run the network mode may come from the environment; it picks the default endpoints.
fn apply_first_run_network_mode(cfg: &mut WalletConfig) {
    let Some(mode) = std::env::var("DUOWALLET_NETWORK_MODE")
        .ok()
        .and_then(|v| parse_network_mode_env(&v))
    else {
        return;
    };
    cfg.network_mode = mode;
    cfg.rpc = RpcConfig::for_mode(mode);
}

impl ConfigStore {
    pub fn new(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<WalletConfig> {
        if !self.path.exists() {
            let mut cfg = WalletConfig::default();
            apply_first_run_network_mode(&mut cfg);
            self.save(&cfg)?;
            apply_env_overrides(&mut cfg);
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: WalletConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &WalletConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}
