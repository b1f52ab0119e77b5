use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SOLANA_MAINNET_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const SOLANA_DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";
pub const ETHEREUM_MAINNET_RPC_URL: &str = "https://eth.llamarpc.com";
pub const ETHEREUM_SEPOLIA_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";

pub const ETHEREUM_MAINNET_CHAIN_ID: u64 = 1;
pub const ETHEREUM_SEPOLIA_CHAIN_ID: u64 = 11_155_111;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Mainnet,
    Testnet,
}

impl NetworkMode {
    /// Human-readable network label for the Ethereum side ("Mainnet" / "Sepolia").
    pub const fn ethereum_label(self) -> &'static str {
        match self {
            Self::Mainnet => "Mainnet",
            Self::Testnet => "Sepolia",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Primary Ethereum JSON-RPC endpoint.
    pub ethereum_rpc_url: String,
    /// Tried in order after the primary for reads (never for broadcasts).
    pub ethereum_fallback_rpc_urls: Vec<String>,
    pub ethereum_chain_id: u64,
    /// Optional `alchemy_getAssetTransfers`-compatible endpoint used for Ethereum history.
    ///
    /// Plain JSON-RPC nodes do not index transfers by address; without this the Ethereum
    /// history stays empty.
    pub ethereum_indexer_url: Option<String>,
    pub solana_rpc_url: String,
    pub solana_fallback_rpc_urls: Vec<String>,
}

impl RpcConfig {
    pub fn for_mode(mode: NetworkMode) -> Self {
        match mode {
            NetworkMode::Mainnet => Self {
                ethereum_rpc_url: ETHEREUM_MAINNET_RPC_URL.into(),
                ethereum_fallback_rpc_urls: vec![
                    "https://ethereum-rpc.publicnode.com".into(),
                    "https://cloudflare-eth.com".into(),
                ],
                ethereum_chain_id: ETHEREUM_MAINNET_CHAIN_ID,
                ethereum_indexer_url: None,
                solana_rpc_url: SOLANA_MAINNET_RPC_URL.into(),
                solana_fallback_rpc_urls: vec![
                    "https://solana-rpc.publicnode.com".into(),
                    "https://solana.drpc.org".into(),
                ],
            },
            NetworkMode::Testnet => Self {
                ethereum_rpc_url: ETHEREUM_SEPOLIA_RPC_URL.into(),
                ethereum_fallback_rpc_urls: vec!["https://rpc.sepolia.org".into()],
                ethereum_chain_id: ETHEREUM_SEPOLIA_CHAIN_ID,
                ethereum_indexer_url: None,
                solana_rpc_url: SOLANA_DEVNET_RPC_URL.into(),
                solana_fallback_rpc_urls: vec![],
            },
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self::for_mode(NetworkMode::Mainnet)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Binance public API base URL (keyless). Used for USD spot prices.
    pub binance_base_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            binance_base_url: "https://api.binance.com".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Balance, history and price refresh period while a token view is open.
    pub refresh_seconds: u64,
    /// Fee re-estimation period while a send confirmation is open.
    pub fee_estimate_seconds: u64,
    /// How long the manual-refresh spinner stays up after the fetch completes.
    pub refresh_spinner_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            refresh_seconds: 30,
            fee_estimate_seconds: 5,
            refresh_spinner_ms: 2_000,
        }
    }
}

impl PollingConfig {
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_seconds.max(1))
    }

    pub fn fee_estimate_period(&self) -> Duration {
        Duration::from_secs(self.fee_estimate_seconds.max(1))
    }

    pub const fn spinner_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_spinner_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WalletConfig {
    pub network_mode: NetworkMode,
    pub rpc: RpcConfig,
    pub http: HttpConfig,
    pub polling: PollingConfig,
}

impl WalletConfig {
    pub fn for_mode(mode: NetworkMode) -> Self {
        Self {
            network_mode: mode,
            rpc: RpcConfig::for_mode(mode),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testnet_mode_points_at_sepolia_and_devnet() {
        let cfg = WalletConfig::for_mode(NetworkMode::Testnet);
        assert_eq!(cfg.rpc.ethereum_chain_id, ETHEREUM_SEPOLIA_CHAIN_ID);
        assert_eq!(cfg.rpc.solana_rpc_url, SOLANA_DEVNET_RPC_URL);
        assert_eq!(cfg.network_mode.ethereum_label(), "Sepolia");
    }

    #[test]
    fn partial_toml_fills_defaults() -> eyre::Result<()> {
        let cfg: WalletConfig = toml::from_str("[polling]\nrefresh_seconds = 10\n")?;
        assert_eq!(cfg.polling.refresh_period(), Duration::from_secs(10));
        assert_eq!(cfg.polling.fee_estimate_period(), Duration::from_secs(5));
        assert_eq!(cfg.polling.spinner_delay(), Duration::from_millis(2_000));
        assert_eq!(cfg.network_mode, NetworkMode::Mainnet);
        Ok(())
    }

    #[test]
    fn zero_periods_are_clamped() {
        let p = PollingConfig {
            refresh_seconds: 0,
            fee_estimate_seconds: 0,
            refresh_spinner_ms: 0,
        };
        assert_eq!(p.refresh_period(), Duration::from_secs(1));
        assert_eq!(p.fee_estimate_period(), Duration::from_secs(1));
    }
}
