use crate::{chains::Chain, config::HttpConfig};
use eyre::Context as _;
use reqwest::Client;
use serde::Deserialize;
use std::{future::Future, time::Duration};

/// USD spot price per whole unit of a chain's native asset.
pub trait PriceFeed: Send + Sync {
    fn spot_usd(&self, chain: Chain) -> impl Future<Output = eyre::Result<f64>> + Send;
}

#[derive(Debug, Deserialize)]
struct BinanceTickerPrice {
    price: String,
}

/// Keyless Binance ticker (`{TICKER}USDT`).
#[derive(Debug, Clone)]
pub struct BinancePriceFeed {
    base_url: String,
}

impl BinancePriceFeed {
    pub fn new(http: &HttpConfig) -> Self {
        Self {
            base_url: http.binance_base_url.trim().trim_end_matches('/').to_owned(),
        }
    }

    fn ticker_url(&self, chain: Chain) -> String {
        format!(
            "{}/api/v3/ticker/price?symbol={}USDT",
            self.base_url,
            chain.ticker()
        )
    }
}

fn parse_price(raw: &str) -> eyre::Result<f64> {
    let p: f64 = raw.trim().parse().context("parse binance price")?;
    if !p.is_finite() || p.is_sign_negative() {
        eyre::bail!("binance returned an invalid price: {raw}");
    }
    Ok(p)
}

impl PriceFeed for BinancePriceFeed {
    async fn spot_usd(&self, chain: Chain) -> eyre::Result<f64> {
        crate::chains::ensure_secure_url(&self.base_url, "binance_base_url")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("build http client")?;
        let v: BinanceTickerPrice = client
            .get(self.ticker_url(chain))
            .send()
            .await
            .context("binance request")?
            .error_for_status()
            .context("binance status")?
            .json()
            .await
            .context("binance json")?;
        parse_price(&v.price)
    }
}
