use crate::{
    chains::{Chain, ChainClient, ChainSet},
    config::PollingConfig,
    financial_math,
    poll::IntervalTask,
    price::PriceFeed,
    state::{WalletAction, WalletStateStore},
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Which parts of one refresh cycle made it into the state container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleOutcome {
    pub balance: bool,
    pub price: bool,
    pub transfers: bool,
    pub fiat: bool,
}

struct RefreshContext<C, P> {
    chains: Arc<ChainSet<C>>,
    prices: Arc<P>,
    state: WalletStateStore,
}

impl<C, P> Clone for RefreshContext<C, P> {
    fn clone(&self) -> Self {
        Self {
            chains: Arc::clone(&self.chains),
            prices: Arc::clone(&self.prices),
            state: self.state.clone(),
        }
    }
}

impl<C: ChainClient, P: PriceFeed> RefreshContext<C, P> {
    async fn refresh_cycle(&self, chain: Chain) -> CycleOutcome {
        let mut out = CycleOutcome::default();
        let Some(address) = self.state.address(chain) else {
            debug!(%chain, "no address yet; skipping refresh");
            return out;
        };
        let client = self.chains.get(chain);
        debug_assert_eq!(client.chain(), chain);

        let (balance, price) = tokio::join!(client.balance(&address), self.prices.spot_usd(chain));
        let transfers = client.transfers(&address).await;

        // The account changed while fetching; these results belong to the old one.
        if self.state.address(chain).as_deref() != Some(address.as_str()) {
            debug!(%chain, "address changed mid-cycle; dropping results");
            return out;
        }

        match &balance {
            Ok(b) => {
                self.state.dispatch(WalletAction::SetBalance { chain, balance: *b });
                out.balance = true;
            }
            Err(e) => warn!(%chain, error = %format!("{e:#}"), "balance refresh failed"),
        }
        match &price {
            Ok(usd) => {
                self.state.dispatch(WalletAction::SetPrice { chain, usd: *usd });
                out.price = true;
            }
            Err(e) => warn!(%chain, error = %format!("{e:#}"), "price refresh failed"),
        }
        match transfers {
            Ok(transactions) => {
                self.state.dispatch(WalletAction::SetTransactions {
                    chain,
                    transactions,
                });
                out.transfers = true;
            }
            Err(e) => warn!(%chain, error = %format!("{e:#}"), "history refresh failed"),
        }

        if let (Ok(b), Ok(usd)) = (balance, price) {
            let fiat = financial_math::token_base_to_usd(b, chain.decimals(), usd);
            self.state
                .dispatch(WalletAction::SetFiat { chain, usd: fiat });
            out.fiat = true;
        }
        out
    }
}

struct Watched {
    chain: Chain,
    address: String,
    // Held for its Drop, which stops the timer.
    _task: IntervalTask,
}

/// Keeps one chain's balance, price, history and fiat value fresh while its screen is open.
pub struct Refresher<C, P> {
    ctx: RefreshContext<C, P>,
    polling: PollingConfig,
    watched: Mutex<Option<Watched>>,
}

impl<C, P> Refresher<C, P>
where
    C: ChainClient + 'static,
    P: PriceFeed + 'static,
{
    pub fn new(
        chains: Arc<ChainSet<C>>,
        prices: Arc<P>,
        state: WalletStateStore,
        polling: PollingConfig,
    ) -> Self {
        Self {
            ctx: RefreshContext {
                chains,
                prices,
                state,
            },
            polling,
            watched: Mutex::new(None),
        }
    }

    /// One fetch of balance + price (concurrently), then history. Failures are logged and
    /// leave the previous values in place.
    pub async fn refresh_cycle(&self, chain: Chain) -> CycleOutcome {
        self.ctx.refresh_cycle(chain).await
    }

    /// Start polling `chain` for the current address, replacing any previous watch. Runs one
    /// cycle right away, then one per refresh period.
    pub async fn watch(&self, chain: Chain) -> eyre::Result<CycleOutcome> {
        let Some(address) = self.ctx.state.address(chain) else {
            self.unwatch()?;
            eyre::bail!("no {chain} address to watch");
        };
        let first = self.refresh_cycle(chain).await;

        let mut guard = self
            .watched
            .lock()
            .map_err(|e| eyre::eyre!("watch lock poisoned: {e}"))?;
        if guard
            .as_ref()
            .is_some_and(|w| w.chain == chain && w.address == address)
        {
            return Ok(first);
        }

        let ctx = self.ctx.clone();
        let task = IntervalTask::spawn("balance-refresh", self.polling.refresh_period(), move || {
            let ctx = ctx.clone();
            async move {
                ctx.refresh_cycle(chain).await;
            }
        });
        // Replacing the previous watch drops (and so cancels) its timer.
        *guard = Some(Watched {
            chain,
            address,
            _task: task,
        });
        Ok(first)
    }

    pub fn unwatch(&self) -> eyre::Result<()> {
        self.watched
            .lock()
            .map_err(|e| eyre::eyre!("watch lock poisoned: {e}"))?
            .take();
        Ok(())
    }

    /// Pull-to-refresh: spinner on, one cycle, spinner kept for the configured delay, off.
    pub async fn manual_refresh(&self, chain: Chain) -> CycleOutcome {
        self.ctx.state.dispatch(WalletAction::SetRefreshing {
            chain,
            refreshing: true,
        });
        let out = self.refresh_cycle(chain).await;
        tokio::time::sleep(self.polling.spinner_delay()).await;
        self.ctx.state.dispatch(WalletAction::SetRefreshing {
            chain,
            refreshing: false,
        });
        out
    }
}
