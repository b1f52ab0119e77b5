//! Shared wallet state. Every mutation is a [`WalletAction`] applied by [`reduce`]; readers get
//! snapshots or subscribe to changes.

use crate::chains::{Chain, TransferRecord};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainState {
    pub address: Option<String>,
    pub public_key: Option<String>,
    /// Base units. `None` until the first successful fetch.
    pub balance: Option<u128>,
    pub transactions: Vec<TransferRecord>,
    pub price_usd: Option<f64>,
    /// Last computed `balance * price`.
    pub fiat_usd: Option<f64>,
    pub refreshing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WalletState {
    pub ethereum: ChainState,
    pub solana: ChainState,
}

impl WalletState {
    pub const fn chain(&self, chain: Chain) -> &ChainState {
        match chain {
            Chain::Ethereum => &self.ethereum,
            Chain::Solana => &self.solana,
        }
    }

    fn chain_mut(&mut self, chain: Chain) -> &mut ChainState {
        match chain {
            Chain::Ethereum => &mut self.ethereum,
            Chain::Solana => &mut self.solana,
        }
    }

    pub fn has_addresses(&self) -> bool {
        Chain::ALL
            .iter()
            .all(|c| self.chain(*c).address.is_some())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalletAction {
    SetAddresses {
        chain: Chain,
        address: String,
        public_key: String,
    },
    SetBalance {
        chain: Chain,
        balance: u128,
    },
    SetPrice {
        chain: Chain,
        usd: f64,
    },
    SetTransactions {
        chain: Chain,
        transactions: Vec<TransferRecord>,
    },
    SetFiat {
        chain: Chain,
        usd: f64,
    },
    SetRefreshing {
        chain: Chain,
        refreshing: bool,
    },
    Reset,
}

pub fn reduce(mut state: WalletState, action: WalletAction) -> WalletState {
    match action {
        WalletAction::SetAddresses {
            chain,
            address,
            public_key,
        } => {
            let c = state.chain_mut(chain);
            if c.address.as_deref() != Some(address.as_str()) {
                // Data fetched for another account must not linger.
                *c = ChainState {
                    price_usd: c.price_usd,
                    ..ChainState::default()
                };
            }
            c.address = Some(address);
            c.public_key = Some(public_key);
        }
        WalletAction::SetBalance { chain, balance } => state.chain_mut(chain).balance = Some(balance),
        WalletAction::SetPrice { chain, usd } => state.chain_mut(chain).price_usd = Some(usd),
        WalletAction::SetTransactions {
            chain,
            transactions,
        } => state.chain_mut(chain).transactions = transactions,
        WalletAction::SetFiat { chain, usd } => state.chain_mut(chain).fiat_usd = Some(usd),
        WalletAction::SetRefreshing { chain, refreshing } => {
            state.chain_mut(chain).refreshing = refreshing;
        }
        WalletAction::Reset => state = WalletState::default(),
    }
    state
}

/// Cloneable handle to the single state container.
#[derive(Debug, Clone)]
pub struct WalletStateStore {
    tx: Arc<watch::Sender<WalletState>>,
}

impl Default for WalletStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletStateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(WalletState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn dispatch(&self, action: WalletAction) {
        tracing::trace!(?action, "dispatch");
        self.tx
            .send_modify(|s| *s = reduce(std::mem::take(s), action));
    }

    pub fn snapshot(&self) -> WalletState {
        self.tx.borrow().clone()
    }

    pub fn address(&self, chain: Chain) -> Option<String> {
        self.tx.borrow().chain(chain).address.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletState> {
        self.tx.subscribe()
    }
}
