//! Scriptable chain and price doubles shared by the unit tests.

use crate::{
    chains::{Chain, ChainClient, ChainSet, TransferRecord},
    price::PriceFeed,
};
use secrecy::{ExposeSecret as _, SecretString};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

fn lock<T>(m: &Mutex<T>) -> eyre::Result<std::sync::MutexGuard<'_, T>> {
    m.lock().map_err(|e| eyre::eyre!("mutex poisoned: {e}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitCall {
    pub to: String,
    pub amount: u128,
    pub hash: String,
}

#[derive(Debug)]
pub struct FakeChain {
    chain: Chain,
    pub balance: Mutex<Result<u128, String>>,
    pub fee: Mutex<Result<u128, String>>,
    pub transfers: Mutex<Result<Vec<TransferRecord>, String>>,
    /// The next N submissions fail with a network error.
    pub failing_submits: AtomicUsize,
    pub submits: Mutex<Vec<SubmitCall>>,
    pub balance_calls: AtomicUsize,
    pub fee_calls: AtomicUsize,
    signed: AtomicUsize,
}

impl FakeChain {
    pub fn new(chain: Chain, balance: u128, fee: u128) -> Self {
        Self {
            chain,
            balance: Mutex::new(Ok(balance)),
            fee: Mutex::new(Ok(fee)),
            transfers: Mutex::new(Ok(vec![])),
            failing_submits: AtomicUsize::new(0),
            submits: Mutex::new(vec![]),
            balance_calls: AtomicUsize::new(0),
            fee_calls: AtomicUsize::new(0),
            signed: AtomicUsize::new(0),
        }
    }

    pub fn set_balance(&self, v: Result<u128, &str>) -> eyre::Result<()> {
        *lock(&self.balance)? = v.map_err(str::to_owned);
        Ok(())
    }

    pub fn set_fee(&self, v: Result<u128, &str>) -> eyre::Result<()> {
        *lock(&self.fee)? = v.map_err(str::to_owned);
        Ok(())
    }

    pub fn set_transfers(&self, v: Result<Vec<TransferRecord>, &str>) -> eyre::Result<()> {
        *lock(&self.transfers)? = v.map_err(str::to_owned);
        Ok(())
    }

    pub fn submit_calls(&self) -> eyre::Result<Vec<SubmitCall>> {
        Ok(lock(&self.submits)?.clone())
    }
}

impl ChainClient for FakeChain {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn balance(&self, _address: &str) -> eyre::Result<u128> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.balance)?.clone().map_err(|e| eyre::eyre!(e))
    }

    async fn transfers(&self, _address: &str) -> eyre::Result<Vec<TransferRecord>> {
        lock(&self.transfers)?.clone().map_err(|e| eyre::eyre!(e))
    }

    async fn estimate_fee(&self, _from: &str, _to: &str, _amount: u128) -> eyre::Result<u128> {
        self.fee_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.fee)?.clone().map_err(|e| eyre::eyre!(e))
    }

    async fn submit_transfer(
        &self,
        secret: &SecretString,
        to: &str,
        amount: u128,
    ) -> eyre::Result<String> {
        if secret.expose_secret().is_empty() {
            eyre::bail!("empty signing key");
        }
        // Every signature is fresh, so every attempt carries a distinct hash.
        let n = self.signed.fetch_add(1, Ordering::SeqCst);
        let hash = format!("0x{n:064x}");
        lock(&self.submits)?.push(SubmitCall {
            to: to.to_owned(),
            amount,
            hash: hash.clone(),
        });
        let failing = self.failing_submits.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_submits.store(failing - 1, Ordering::SeqCst);
            eyre::bail!("rpc unavailable");
        }
        Ok(hash)
    }
}

pub fn fake_chains(eth_balance: u128, sol_balance: u128) -> Arc<ChainSet<FakeChain>> {
    Arc::new(ChainSet {
        ethereum: FakeChain::new(Chain::Ethereum, eth_balance, 21_000),
        solana: FakeChain::new(Chain::Solana, sol_balance, 5_000),
    })
}

#[derive(Debug)]
pub struct FakePrice {
    pub usd: Mutex<Result<f64, String>>,
}

impl FakePrice {
    pub fn new(usd: f64) -> Arc<Self> {
        Arc::new(Self {
            usd: Mutex::new(Ok(usd)),
        })
    }

    pub fn set(&self, v: Result<f64, &str>) -> eyre::Result<()> {
        *lock(&self.usd)? = v.map_err(str::to_owned);
        Ok(())
    }
}

impl PriceFeed for FakePrice {
    async fn spot_usd(&self, _chain: Chain) -> eyre::Result<f64> {
        lock(&self.usd)?.clone().map_err(|e| eyre::eyre!(e))
    }
}

pub const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
