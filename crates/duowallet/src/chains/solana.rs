use super::{json_rpc_call, Chain, ChainClient, TransferDirection, TransferRecord};
use crate::{
    amount::format_base_units,
    config::WalletConfig,
    retry::{endpoint_list, try_all_with_backoff, BackoffConfig},
};
use eyre::Context as _;
use reqwest::Client;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::Value;
use solana_address::Address;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_response::RpcSimulateTransactionResult;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::{hash::Hash, message::Message, pubkey::Pubkey, signer::Signer as _};
use solana_system_interface::instruction as system_instruction;
use std::{str::FromStr as _, time::Duration};

const RPC_TIMEOUT: Duration = Duration::from_secs(20);
const HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct SolanaChain {
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
    pub read_backoff: BackoffConfig,
}

#[derive(Debug, Deserialize)]
struct SignatureInfo {
    signature: String,
}

/// Native SOL movements inside one `jsonParsed` transaction, signed relative to `owner`.
fn parse_system_transfers(signature: &str, tx: &Value, owner: &str) -> Vec<TransferRecord> {
    let Some(ixs) = tx
        .pointer("/transaction/message/instructions")
        .and_then(Value::as_array)
    else {
        return vec![];
    };

    ixs.iter()
        .enumerate()
        .filter(|(_, ix)| {
            ix.get("program").and_then(Value::as_str) == Some("system")
                && ix.pointer("/parsed/type").and_then(Value::as_str) == Some("transfer")
        })
        .filter_map(|(i, ix)| {
            let info = ix.pointer("/parsed/info")?;
            let lamports = info.get("lamports").and_then(Value::as_u64)?;
            let from = info.get("source").and_then(Value::as_str)?;
            Some(TransferRecord {
                hash: signature.to_owned(),
                direction: TransferDirection::from_source(from == owner),
                from: from.to_owned(),
                to: info
                    .get("destination")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                value: format_base_units(u128::from(lamports), Chain::Solana.decimals()).ok()?,
                asset: Chain::Solana.ticker().to_owned(),
                category: "external".to_owned(),
                unique_id: format!("{signature}:{i}"),
            })
        })
        .collect()
}

impl SolanaChain {
    pub fn from_config(cfg: &WalletConfig) -> Self {
        Self {
            rpc_url: cfg.rpc.solana_rpc_url.clone(),
            fallback_rpc_urls: cfg.rpc.solana_fallback_rpc_urls.clone(),
            read_backoff: BackoffConfig::single_round(),
        }
    }

    fn rpc_for_url(url: &str) -> RpcClient {
        RpcClient::new_with_timeout_and_commitment(
            url.to_owned(),
            RPC_TIMEOUT,
            CommitmentConfig::confirmed(),
        )
    }

    async fn with_fallback_and_backoff<T, Fut>(
        &self,
        context_label: &'static str,
        f: impl Fn(RpcClient) -> Fut + Sync,
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
                    let rpc = Self::rpc_for_url(&u);
                    f(rpc).await
                }
            },
            context_label,
        )
        .await
    }

    pub fn parse_pubkey(s: &str) -> eyre::Result<Pubkey> {
        Pubkey::from_str(s.trim()).context("parse solana pubkey")
    }

    fn transfer_message(from: &Pubkey, to: &Pubkey, lamports: u64, bh: &Hash) -> Message {
        let from_addr = Address::new_from_array(from.to_bytes());
        let to_addr = Address::new_from_array(to.to_bytes());
        let ix = system_instruction::transfer(&from_addr, &to_addr, lamports);
        Message::new_with_blockhash(&[ix], Some(from), bh)
    }

    async fn recent_signatures(&self, http: &Client, address: &str) -> eyre::Result<Vec<String>> {
        let urls = endpoint_list(&self.rpc_url, &self.fallback_rpc_urls);
        let infos: Vec<SignatureInfo> = try_all_with_backoff(
            &urls,
            &self.read_backoff,
            |u| {
                let u = u.clone();
                let params = serde_json::json!([address, { "limit": HISTORY_LIMIT }]);
                async move { json_rpc_call(http, &u, "getSignaturesForAddress", params).await }
            },
            "get signatures",
        )
        .await?;
        Ok(infos.into_iter().map(|i| i.signature).collect())
    }

    async fn parsed_transaction(&self, http: &Client, signature: &str) -> eyre::Result<Value> {
        let urls = endpoint_list(&self.rpc_url, &self.fallback_rpc_urls);
        try_all_with_backoff(
            &urls,
            &self.read_backoff,
            |u| {
                let u = u.clone();
                let params = serde_json::json!([signature, {
                    "encoding": "jsonParsed",
                    "maxSupportedTransactionVersion": 0,
                    "commitment": "confirmed",
                }]);
                async move { json_rpc_call(http, &u, "getTransaction", params).await }
            },
            "get transaction",
        )
        .await
    }
}

impl ChainClient for SolanaChain {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn balance(&self, address: &str) -> eyre::Result<u128> {
        let owner = Self::parse_pubkey(address)?;
        let lamports = self
            .with_fallback_and_backoff("get balance", |rpc| async move {
                let v = rpc.get_balance(&owner).await.context("get balance")?;
                Ok(v)
            })
            .await?;
        Ok(u128::from(lamports))
    }

    /// Newest first, as the node returns signatures.
    async fn transfers(&self, address: &str) -> eyre::Result<Vec<TransferRecord>> {
        let owner = Self::parse_pubkey(address)?.to_string();
        let http = Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .context("build http client")?;

        let mut out = vec![];
        for sig in self.recent_signatures(&http, &owner).await? {
            match self.parsed_transaction(&http, &sig).await {
                Ok(tx) => out.extend(parse_system_transfers(&sig, &tx, &owner)),
                // Pruned or not yet confirmed; the next refresh picks it up.
                Err(e) => tracing::debug!(signature = %sig, error = %format!("{e:#}"), "skip transaction"),
            }
        }
        Ok(out)
    }

    async fn estimate_fee(&self, from: &str, to: &str, amount: u128) -> eyre::Result<u128> {
        let from = Self::parse_pubkey(from)?;
        let to = Self::parse_pubkey(to)?;
        let lamports = u64::try_from(amount).context("amount exceeds u64 lamports")?;
        let fee = self
            .with_fallback_and_backoff("get fee for message", |rpc| async move {
                let bh = rpc
                    .get_latest_blockhash()
                    .await
                    .context("latest blockhash")?;
                let msg = Self::transfer_message(&from, &to, lamports, &bh);
                let fee = rpc.get_fee_for_message(&msg).await.context("get fee")?;
                Ok(fee)
            })
            .await?;
        Ok(u128::from(fee))
    }

    async fn submit_transfer(
        &self,
        secret: &SecretString,
        to: &str,
        amount: u128,
    ) -> eyre::Result<String> {
        let keypair = crate::wallet::solana_keypair(secret)?;
        let to = Self::parse_pubkey(to)?;
        let lamports = u64::try_from(amount).context("amount exceeds u64 lamports")?;
        let rpc = Self::rpc_for_url(&self.rpc_url);

        let bh = rpc
            .get_latest_blockhash()
            .await
            .context("latest blockhash")?;
        let msg = Self::transfer_message(&keypair.pubkey(), &to, lamports, &bh);
        let tx = solana_sdk::transaction::Transaction::new(&[&keypair], msg, bh);
        drop(keypair);

        // Simulate first so obvious failures (rent, insufficient funds) never reach the network.
        let sim: RpcSimulateTransactionResult = rpc
            .simulate_transaction(&tx)
            .await
            .context("simulate tx")?
            .value;
        if let Some(err) = sim.err {
            eyre::bail!("transaction simulation failed: {err:?}");
        }

        let sig = rpc.send_transaction(&tx).await.context("send tx")?;
        tracing::info!(chain = "solana", signature = %sig, "transfer broadcast");
        Ok(sig.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_system_transfers_only() -> eyre::Result<()> {
        let tx = serde_json::json!({
            "transaction": { "message": { "instructions": [
                { "program": "spl-memo", "parsed": "hello" },
                { "program": "system", "parsed": { "type": "transfer", "info": {
                    "source": "Src111", "destination": "Dst222", "lamports": 1_500_000_000_u64
                }}},
                { "program": "system", "parsed": { "type": "createAccount", "info": {} } },
                { "program": "system", "parsed": { "type": "transfer", "info": {
                    "source": "Dst222", "destination": "Src111", "lamports": 2_000_u64
                }}}
            ]}}
        });
        let got = parse_system_transfers("sig1", &tx, "Src111");
        assert_eq!(got.len(), 2);
        let r = got.first().ok_or_else(|| eyre::eyre!("no transfer parsed"))?;
        assert_eq!(r.from, "Src111");
        assert_eq!(r.to.as_deref(), Some("Dst222"));
        assert_eq!(r.value, "1.5");
        assert_eq!(r.asset, "SOL");
        assert_eq!(r.unique_id, "sig1:1");
        assert_eq!(r.direction, TransferDirection::Sent);

        let back = got.get(1).ok_or_else(|| eyre::eyre!("no return transfer"))?;
        assert_eq!(back.direction, TransferDirection::Received);
        assert_eq!(back.unique_id, "sig1:3");
        Ok(())
    }

    #[test]
    fn tolerates_missing_transaction_body() {
        assert!(parse_system_transfers("sig", &Value::Null, "Src111").is_empty());
    }

    #[test]
    fn transfer_message_pays_from_sender() {
        let from = Pubkey::new_from_array([1_u8; 32]);
        let to = Pubkey::new_from_array([2_u8; 32]);
        let msg = SolanaChain::transfer_message(&from, &to, 5, &Hash::default());
        assert_eq!(msg.account_keys.first(), Some(&from));
        assert_eq!(msg.instructions.len(), 1);
    }
}
