use super::{json_rpc_call, ChainClient, TransferDirection, TransferRecord};
use crate::{
    amount::{format_base_units, parse_hex_quantity},
    config::WalletConfig,
    retry::{endpoint_list, try_all_with_backoff, BackoffConfig},
};
use alloy::{
    consensus::{SignableTransaction as _, TxEip1559, TxEnvelope, TxLegacy},
    network::TransactionBuilder as _,
    primitives::{Address, TxKind, B256, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, TransactionRequest},
    signers::{local::PrivateKeySigner, SignerSync as _},
};
use eyre::Context as _;
use reqwest::Client;
use secrecy::SecretString;
use serde::Deserialize;
use std::{str::FromStr as _, time::Duration};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HISTORY_MAX_COUNT: u32 = 50;

type EvmProvider = RootProvider;

/// Extract the lower 128 bits from a U256.
pub fn u256_low_u128(v: U256) -> u128 {
    let [lo, hi, _, _] = *v.as_limbs();
    u128::from(lo) | (u128::from(hi) << 64)
}

pub fn compute_eip1559_fees(base_fee: u128, gas_price: u128) -> (u128, u128) {
    // priority: max(1.5 gwei, gas_price / 10)
    // max_fee: base_fee * 2 + priority
    let min_priority: u128 = 1_500_000_000;
    let priority = std::cmp::max(min_priority, gas_price / 10);

    let mut max_fee = base_fee.saturating_mul(2).saturating_add(priority);
    let min_fee = base_fee.saturating_add(priority);
    if max_fee < min_fee {
        max_fee = min_fee;
    }
    (max_fee, priority)
}

/// Prefer EIP-1559 fields when the chain reports a base fee; legacy gas price otherwise.
pub fn apply_fee_policy(
    mut tx: TransactionRequest,
    base_fee: Option<u128>,
    gas_price: u128,
    from: Address,
    chain_id: u64,
) -> TransactionRequest {
    if tx.max_fee_per_gas.is_some()
        || tx.max_priority_fee_per_gas.is_some()
        || tx.gas_price.is_some()
    {
        return tx;
    }

    if tx.chain_id.is_none() {
        tx.chain_id = Some(chain_id);
    }
    if tx.from.is_none() {
        tx.from = Some(from);
    }

    if let Some(base_fee) = base_fee {
        let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
        tx.max_fee_per_gas = Some(max_fee);
        tx.max_priority_fee_per_gas = Some(priority);
    } else {
        tx.gas_price = Some(gas_price);
    }
    tx
}

/// Gas limit with a 20% buffer for flaky estimators.
pub const fn buffered_gas(estimate: u64) -> u64 {
    estimate.saturating_mul(120) / 100
}

/// Worst-case fee in wei: the buffered gas limit at the max fee per gas the policy would set.
pub fn max_fee_wei(gas_estimate: u64, base_fee: Option<u128>, gas_price: u128) -> u128 {
    let per_gas = match base_fee {
        Some(b) => compute_eip1559_fees(b, gas_price).0,
        None => gas_price,
    };
    u128::from(buffered_gas(gas_estimate)).saturating_mul(per_gas)
}

fn build_and_sign_tx(
    signer: &PrivateKeySigner,
    tx: &TransactionRequest,
) -> eyre::Result<(TxEnvelope, B256)> {
    let to = tx.to.unwrap_or(TxKind::Create);
    let value = tx.value.unwrap_or(U256::ZERO);
    let input = tx.input.clone().into_input().unwrap_or_default();
    let nonce = tx.nonce.unwrap_or(0);
    let gas_limit = tx.gas.unwrap_or(21_000);

    if tx.max_fee_per_gas.is_some() {
        let consensus_tx = TxEip1559 {
            chain_id: tx.chain_id.unwrap_or(1),
            nonce,
            gas_limit,
            max_fee_per_gas: tx.max_fee_per_gas.unwrap_or(0),
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas.unwrap_or(0),
            to,
            value,
            input,
            access_list: tx.access_list.clone().unwrap_or_default(),
        };
        let hash = consensus_tx.signature_hash();
        let sig = signer.sign_hash_sync(&hash).context("sign eip1559")?;
        let signed_tx = consensus_tx.into_signed(sig);
        let tx_hash = *signed_tx.hash();
        Ok((TxEnvelope::Eip1559(signed_tx), tx_hash))
    } else {
        let consensus_tx = TxLegacy {
            chain_id: tx.chain_id,
            nonce,
            gas_price: tx.gas_price.unwrap_or(0),
            gas_limit,
            to,
            value,
            input,
        };
        let hash = consensus_tx.signature_hash();
        let sig = signer.sign_hash_sync(&hash).context("sign legacy")?;
        let signed_tx = consensus_tx.into_signed(sig);
        let tx_hash = *signed_tx.hash();
        Ok((TxEnvelope::Legacy(signed_tx), tx_hash))
    }
}

// `alchemy_getAssetTransfers` result shape (only the fields used here).
#[derive(Debug, Deserialize)]
struct AssetTransfersPage {
    transfers: Vec<AssetTransfer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetTransfer {
    block_num: String,
    unique_id: String,
    hash: String,
    from: String,
    to: Option<String>,
    value: Option<serde_json::Number>,
    asset: Option<String>,
    category: String,
    raw_contract: Option<RawContract>,
}

#[derive(Debug, Deserialize)]
struct RawContract {
    value: Option<String>,
}

impl AssetTransfer {
    fn ui_value(&self) -> String {
        self.raw_contract
            .as_ref()
            .and_then(|r| r.value.as_deref())
            .and_then(|v| parse_hex_quantity(v).ok())
            .and_then(|wei| format_base_units(wei, 18).ok())
            .or_else(|| self.value.as_ref().map(ToString::to_string))
            .unwrap_or_else(|| "0".to_owned())
    }
}

/// Merge sent and received pages: ETH only, de-duplicated, newest block first. Direction is taken
/// relative to `owner`; hex addresses compare case-insensitively.
fn merge_transfer_pages(
    pages: Vec<AssetTransfersPage>,
    ticker: &str,
    owner: &str,
) -> Vec<TransferRecord> {
    let mut rows: Vec<(u128, AssetTransfer)> = pages
        .into_iter()
        .flat_map(|p| p.transfers)
        .filter(|t| t.asset.as_deref() == Some(ticker))
        .map(|t| (parse_hex_quantity(&t.block_num).unwrap_or(0), t))
        .collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0));

    let mut out: Vec<TransferRecord> = Vec::with_capacity(rows.len());
    for (_, t) in rows {
        if out.iter().any(|r| r.unique_id == t.unique_id) {
            continue;
        }
        out.push(TransferRecord {
            value: t.ui_value(),
            direction: TransferDirection::from_source(t.from.eq_ignore_ascii_case(owner)),
            hash: t.hash,
            from: t.from,
            to: t.to,
            asset: ticker.to_owned(),
            category: t.category,
            unique_id: t.unique_id,
        });
    }
    out
}

#[derive(Debug, Clone)]
pub struct EvmChain {
    pub chain_id: u64,
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
    pub indexer_url: Option<String>,
    pub read_backoff: BackoffConfig,
}

impl EvmChain {
    pub fn from_config(cfg: &WalletConfig) -> Self {
        Self {
            chain_id: cfg.rpc.ethereum_chain_id,
            rpc_url: cfg.rpc.ethereum_rpc_url.clone(),
            fallback_rpc_urls: cfg.rpc.ethereum_fallback_rpc_urls.clone(),
            indexer_url: cfg.rpc.ethereum_indexer_url.clone(),
            read_backoff: BackoffConfig::single_round(),
        }
    }

    fn http_client() -> eyre::Result<Client> {
        Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")
    }

    fn provider_for_url(url: &str) -> eyre::Result<EvmProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let http = alloy::transports::http::Http::with_client(Self::http_client()?, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    /// The primary endpoint. Broadcasts only ever go here.
    pub fn provider(&self) -> eyre::Result<EvmProvider> {
        Self::provider_for_url(self.rpc_url.as_str())
    }

    async fn with_fallback_and_backoff<T, Fut>(
        &self,
        context_label: &'static str,
        f: impl Fn(EvmProvider) -> Fut + Sync,
    ) -> eyre::Result<T>
    where
        T: Send,
        Fut: std::future::Future<Output = eyre::Result<T>> + Send,
    {
        let urls = endpoint_list(&self.rpc_url, &self.fallback_rpc_urls);
        try_all_with_backoff(
            &urls,
            &self.read_backoff,
            |u| {
                let u = u.clone();
                let f = &f;
                async move {
                    let p = Self::provider_for_url(&u)?;
                    f(p).await
                }
            },
            context_label,
        )
        .await
    }

    pub fn parse_address(s: &str) -> eyre::Result<Address> {
        Address::from_str(s.trim()).context("parse evm address")
    }

    pub fn build_native_transfer(from: Address, to: Address, value: U256) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_value(value)
    }

    pub async fn get_native_balance(&self, addr: Address) -> eyre::Result<U256> {
        self.with_fallback_and_backoff("get balance", |p| async move {
            let v = p.get_balance(addr).await.context("get balance")?;
            Ok(v)
        })
        .await
    }

    async fn fetch_transfer_page(
        &self,
        indexer_url: &str,
        direction: &'static str,
        address: &str,
    ) -> eyre::Result<AssetTransfersPage> {
        let mut filter = serde_json::json!({
            "fromBlock": "0x0",
            "toBlock": "latest",
            "category": ["external"],
            "withMetadata": false,
            "excludeZeroValue": true,
            "maxCount": format!("{HISTORY_MAX_COUNT:#x}"),
            "order": "desc",
        });
        if let Some(obj) = filter.as_object_mut() {
            obj.insert(direction.to_owned(), address.into());
        }
        json_rpc_call(
            &Self::http_client()?,
            indexer_url,
            "alchemy_getAssetTransfers",
            serde_json::json!([filter]),
        )
        .await
    }
}

impl ChainClient for EvmChain {
    fn chain(&self) -> super::Chain {
        super::Chain::Ethereum
    }

    async fn balance(&self, address: &str) -> eyre::Result<u128> {
        let addr = Self::parse_address(address)?;
        let v = self.get_native_balance(addr).await?;
        if v > U256::from(u128::MAX) {
            eyre::bail!("balance exceeds u128");
        }
        Ok(u256_low_u128(v))
    }

    /// Empty when no transfer indexer is configured.
    async fn transfers(&self, address: &str) -> eyre::Result<Vec<TransferRecord>> {
        let Some(indexer) = self.indexer_url.as_deref() else {
            return Ok(vec![]);
        };
        super::ensure_secure_url(indexer, "ethereum_indexer_url")?;
        let addr = Self::parse_address(address)?.to_checksum(None);
        let (sent, received) = tokio::join!(
            self.fetch_transfer_page(indexer, "fromAddress", &addr),
            self.fetch_transfer_page(indexer, "toAddress", &addr),
        );
        Ok(merge_transfer_pages(vec![sent?, received?], "ETH", &addr))
    }

    async fn estimate_fee(&self, from: &str, to: &str, amount: u128) -> eyre::Result<u128> {
        let tx = Self::build_native_transfer(
            Self::parse_address(from)?,
            Self::parse_address(to)?,
            U256::from(amount),
        );
        self.with_fallback_and_backoff("estimate fee", |p| {
            let tx = tx.clone();
            async move {
                let gas = p.estimate_gas(tx).await.context("estimate gas")?;
                let base_fee = p
                    .get_block_by_number(BlockNumberOrTag::Pending)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|b| b.header.base_fee_per_gas.map(u128::from));
                let gp = p.get_gas_price().await.context("get gas price")?;
                Ok(max_fee_wei(gas, base_fee, gp))
            }
        })
        .await
    }

    async fn submit_transfer(
        &self,
        secret: &SecretString,
        to: &str,
        amount: u128,
    ) -> eyre::Result<String> {
        let signer = crate::wallet::ethereum_signer(secret)?;
        let from = signer.address();
        let provider = self.provider()?;

        let mut tx =
            Self::build_native_transfer(from, Self::parse_address(to)?, U256::from(amount));
        let base_fee = provider
            .get_block_by_number(BlockNumberOrTag::Pending)
            .await
            .ok()
            .flatten()
            .and_then(|b| b.header.base_fee_per_gas.map(u128::from));
        let gp = provider.get_gas_price().await.context("get gas price")?;
        tx = apply_fee_policy(tx, base_fee, gp, from, self.chain_id);
        tx.chain_id = Some(self.chain_id);

        let nonce = provider
            .get_transaction_count(from)
            .pending()
            .await
            .context("get nonce")?;
        tx.nonce = Some(nonce);

        let gas = provider
            .estimate_gas(tx.clone())
            .await
            .context("estimate gas")?;
        tx.gas = Some(buffered_gas(gas));

        let (envelope, tx_hash) = build_and_sign_tx(&signer, &tx).context("sign tx")?;
        drop(signer);
        let raw_bytes = alloy::eips::eip2718::Encodable2718::encoded_2718(&envelope);
        provider
            .send_raw_transaction(&raw_bytes)
            .await
            .context("broadcast raw tx")?;
        tracing::info!(chain = "ethereum", tx_hash = %tx_hash, "transfer broadcast");
        Ok(tx_hash.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eip1559_fee_policy_is_conservative_and_monotonic() {
        let base_fee: u128 = 10_000_000_000; // 10 gwei
        let gas_price: u128 = 20_000_000_000; // 20 gwei
        let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
        assert_eq!(priority, 2_000_000_000_u128, "priority mismatch");
        assert_eq!(max_fee, 22_000_000_000_u128, "max_fee mismatch");
    }

    #[test]
    fn eip1559_priority_has_min_floor() {
        let (_max_fee, priority) = compute_eip1559_fees(1_000_000_000, 5_000_000_000);
        assert_eq!(priority, 1_500_000_000_u128, "priority should use floor");
    }

    #[test]
    fn apply_fee_policy_picks_eip1559_or_legacy() {
        let tx = EvmChain::build_native_transfer(Address::ZERO, Address::ZERO, U256::from(1_u64));
        let out = apply_fee_policy(tx.clone(), Some(10_000_000_000), 20_000_000_000, Address::ZERO, 1);
        assert!(out.max_fee_per_gas.is_some());
        assert!(out.gas_price.is_none());

        let legacy = apply_fee_policy(tx, None, 7, Address::ZERO, 1);
        assert_eq!(legacy.gas_price, Some(7_u128));
        assert!(legacy.max_fee_per_gas.is_none());
    }

    #[test]
    fn fee_estimate_covers_buffered_gas_at_max_fee() {
        // 21000 * 1.2 = 25200 gas at (2 * 10 gwei + 2 gwei).
        assert_eq!(
            max_fee_wei(21_000, Some(10_000_000_000), 20_000_000_000),
            25_200 * 22_000_000_000
        );
        assert_eq!(max_fee_wei(21_000, None, 5), 25_200 * 5);
    }

    #[test]
    fn signing_is_deterministic_for_same_inputs() -> eyre::Result<()> {
        let signer = PrivateKeySigner::from_slice(&[7_u8; 32])?;
        let tx = apply_fee_policy(
            EvmChain::build_native_transfer(signer.address(), Address::ZERO, U256::from(5_u64)),
            Some(1),
            1,
            signer.address(),
            11_155_111,
        );
        let (_, a) = build_and_sign_tx(&signer, &tx)?;
        let mut bumped = tx.clone();
        bumped.nonce = Some(1);
        let (_, b) = build_and_sign_tx(&signer, &bumped)?;
        assert_ne!(a, b, "different nonce must yield a different hash");
        Ok(())
    }

    #[test]
    fn transfer_pages_merge_newest_first_eth_only() -> eyre::Result<()> {
        let sent: AssetTransfersPage = serde_json::from_value(serde_json::json!({
            "transfers": [
                {"blockNum": "0x10", "uniqueId": "a:external", "hash": "0xa", "from": "0x1",
                 "to": "0x2", "value": 0.5, "asset": "ETH", "category": "external",
                 "rawContract": {"value": "0x6f05b59d3b20000"}},
                {"blockNum": "0x12", "uniqueId": "u:external", "hash": "0xu", "from": "0x1",
                 "to": "0x3", "value": 1, "asset": "USDC", "category": "external",
                 "rawContract": {"value": "0x1"}}
            ]
        }))?;
        let received: AssetTransfersPage = serde_json::from_value(serde_json::json!({
            "transfers": [
                {"blockNum": "0x20", "uniqueId": "b:external", "hash": "0xb", "from": "0x9",
                 "to": "0x1", "value": 2, "asset": "ETH", "category": "external",
                 "rawContract": null},
                {"blockNum": "0x10", "uniqueId": "a:external", "hash": "0xa", "from": "0x1",
                 "to": "0x2", "value": 0.5, "asset": "ETH", "category": "external",
                 "rawContract": {"value": "0x6f05b59d3b20000"}}
            ]
        }))?;

        let merged = merge_transfer_pages(vec![sent, received], "ETH", "0x1");
        let hashes: Vec<&str> = merged.iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(hashes, vec!["0xb", "0xa"]);
        assert_eq!(merged.get(1).map(|r| r.value.as_str()), Some("0.5"));
        assert_eq!(merged.first().map(|r| r.value.as_str()), Some("2"));
        let directions: Vec<TransferDirection> = merged.iter().map(|r| r.direction).collect();
        assert_eq!(
            directions,
            vec![TransferDirection::Received, TransferDirection::Sent]
        );
        Ok(())
    }

    #[test]
    fn transfer_direction_ignores_address_case() -> eyre::Result<()> {
        let page: AssetTransfersPage = serde_json::from_value(serde_json::json!({
            "transfers": [
                {"blockNum": "0x1", "uniqueId": "c:external", "hash": "0xc",
                 "from": "0x9858effd232b4033e47d90003d41ec34ecaeda94",
                 "to": "0x2", "value": 1, "asset": "ETH", "category": "external",
                 "rawContract": null}
            ]
        }))?;
        let merged = merge_transfer_pages(
            vec![page],
            "ETH",
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94",
        );
        assert_eq!(
            merged.first().map(|r| r.direction),
            Some(TransferDirection::Sent)
        );
        Ok(())
    }
}
