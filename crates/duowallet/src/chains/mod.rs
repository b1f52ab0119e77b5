pub mod evm;
pub mod solana;

use crate::config::{NetworkMode, WalletConfig};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::future::Future;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Solana,
}

impl Chain {
    pub const ALL: [Self; 2] = [Self::Ethereum, Self::Solana];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Solana => "solana",
        }
    }

    /// Native asset symbol, also the Binance base symbol.
    pub const fn ticker(self) -> &'static str {
        match self {
            Self::Ethereum => "ETH",
            Self::Solana => "SOL",
        }
    }

    pub const fn decimals(self) -> u8 {
        match self {
            Self::Ethereum => 18,
            Self::Solana => 9,
        }
    }

    pub const fn network_label(self, mode: NetworkMode) -> &'static str {
        match (self, mode) {
            (Self::Ethereum, m) => m.ethereum_label(),
            (Self::Solana, NetworkMode::Mainnet) => "Mainnet",
            (Self::Solana, NetworkMode::Testnet) => "Devnet",
        }
    }

    /// Block explorer page for a submitted transaction.
    pub fn tx_explorer_url(self, mode: NetworkMode, hash: &str) -> String {
        match (self, mode) {
            (Self::Ethereum, NetworkMode::Mainnet) => format!("https://etherscan.io/tx/{hash}"),
            (Self::Ethereum, NetworkMode::Testnet) => {
                format!("https://sepolia.etherscan.io/tx/{hash}")
            }
            (Self::Solana, NetworkMode::Mainnet) => format!("https://explorer.solana.com/tx/{hash}"),
            (Self::Solana, NetworkMode::Testnet) => {
                format!("https://explorer.solana.com/tx/{hash}?cluster=devnet")
            }
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way value moved, seen from the wallet's own address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Sent,
    Received,
}

impl TransferDirection {
    /// A transfer is `Sent` when the wallet is its source; self-transfers count as sent.
    pub const fn from_source(wallet_is_source: bool) -> Self {
        if wallet_is_source {
            Self::Sent
        } else {
            Self::Received
        }
    }

    pub const fn sign(self) -> char {
        match self {
            Self::Sent => '-',
            Self::Received => '+',
        }
    }
}

/// One native-asset transfer as reported by the chain's history source. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub hash: String,
    pub direction: TransferDirection,
    pub from: String,
    pub to: Option<String>,
    /// UI decimal string ("0.5"), never a float.
    pub value: String,
    pub asset: String,
    pub category: String,
    pub unique_id: String,
}

/// Narrow read/write surface of one chain, as used by the refresher and the submitter.
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> Chain;

    /// Native balance in base units (wei / lamports).
    fn balance(&self, address: &str) -> impl Future<Output = eyre::Result<u128>> + Send;

    /// Recent native transfers involving `address`, newest first.
    fn transfers(
        &self,
        address: &str,
    ) -> impl Future<Output = eyre::Result<Vec<TransferRecord>>> + Send;

    /// Network fee (base units) for sending `amount` from `from` to `to`.
    fn estimate_fee(
        &self,
        from: &str,
        to: &str,
        amount: u128,
    ) -> impl Future<Output = eyre::Result<u128>> + Send;

    /// Sign with `secret` and broadcast once. Returns the transaction hash / signature.
    fn submit_transfer(
        &self,
        secret: &SecretString,
        to: &str,
        amount: u128,
    ) -> impl Future<Output = eyre::Result<String>> + Send;
}

/// The production clients, dispatched by chain.
#[derive(Debug, Clone)]
pub enum LiveChain {
    Ethereum(evm::EvmChain),
    Solana(solana::SolanaChain),
}

impl ChainClient for LiveChain {
    fn chain(&self) -> Chain {
        match self {
            Self::Ethereum(_) => Chain::Ethereum,
            Self::Solana(_) => Chain::Solana,
        }
    }

    async fn balance(&self, address: &str) -> eyre::Result<u128> {
        match self {
            Self::Ethereum(c) => c.balance(address).await,
            Self::Solana(c) => c.balance(address).await,
        }
    }

    async fn transfers(&self, address: &str) -> eyre::Result<Vec<TransferRecord>> {
        match self {
            Self::Ethereum(c) => c.transfers(address).await,
            Self::Solana(c) => c.transfers(address).await,
        }
    }

    async fn estimate_fee(&self, from: &str, to: &str, amount: u128) -> eyre::Result<u128> {
        match self {
            Self::Ethereum(c) => c.estimate_fee(from, to, amount).await,
            Self::Solana(c) => c.estimate_fee(from, to, amount).await,
        }
    }

    async fn submit_transfer(
        &self,
        secret: &SecretString,
        to: &str,
        amount: u128,
    ) -> eyre::Result<String> {
        match self {
            Self::Ethereum(c) => c.submit_transfer(secret, to, amount).await,
            Self::Solana(c) => c.submit_transfer(secret, to, amount).await,
        }
    }
}

/// One client per chain.
#[derive(Debug, Clone)]
pub struct ChainSet<C> {
    pub ethereum: C,
    pub solana: C,
}

impl<C> ChainSet<C> {
    pub const fn get(&self, chain: Chain) -> &C {
        match chain {
            Chain::Ethereum => &self.ethereum,
            Chain::Solana => &self.solana,
        }
    }
}

impl ChainSet<LiveChain> {
    pub fn from_config(cfg: &WalletConfig) -> Self {
        Self {
            ethereum: LiveChain::Ethereum(evm::EvmChain::from_config(cfg)),
            solana: LiveChain::Solana(solana::SolanaChain::from_config(cfg)),
        }
    }
}

/// `http://` is only allowed for loopback hosts (local nodes, test servers).
pub fn is_loopback_http(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let u = url.trim();
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

pub fn ensure_secure_url(url: &str, what: &str) -> eyre::Result<()> {
    if url.trim().starts_with("https://") || is_loopback_http(url) {
        return Ok(());
    }
    eyre::bail!("{what} must use https (or loopback http): {url}")
}

/// Plain JSON-RPC 2.0 POST, for methods the typed clients do not cover.
pub async fn json_rpc_call<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: serde_json::Value,
) -> eyre::Result<T> {
    use eyre::Context as _;

    #[derive(Deserialize)]
    struct RpcError {
        code: i64,
        message: String,
    }

    #[derive(Deserialize)]
    struct RpcResponse<T> {
        result: Option<T>,
        error: Option<RpcError>,
    }

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });
    let resp: RpcResponse<T> = client
        .post(url)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("{method} request"))?
        .error_for_status()
        .with_context(|| format!("{method} status"))?
        .json()
        .await
        .with_context(|| format!("{method} json"))?;
    if let Some(e) = resp.error {
        eyre::bail!("{method} rpc error {}: {}", e.code, e.message);
    }
    resp.result
        .ok_or_else(|| eyre::eyre!("{method} returned no result"))
}
