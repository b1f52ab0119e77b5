use crate::{
    chains::{Chain, ChainClient, ChainSet},
    errors::WalletError,
    financial_math,
    keystore::{KeyStore, SecretStorage},
    poll::IntervalTask,
    session::Route,
    state::WalletStateStore,
};
use serde::Serialize;
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SendPhase {
    Estimating,
    Ready,
    Submitting,
    Succeeded { hash: String },
}

impl SendPhase {
    const fn is_final_or_busy(&self) -> bool {
        matches!(self, Self::Submitting | Self::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSend {
    pub chain: Chain,
    pub to: String,
    /// Base units.
    pub amount: u128,
    pub fee_estimate: Option<u128>,
    pub total_cost: Option<u128>,
}

/// What the confirmation screen renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendView {
    pub pending: PendingSend,
    pub phase: SendPhase,
    /// Blocking notice from the last estimate (e.g. not enough funds).
    pub warning: Option<String>,
    /// User-facing message from the last failed submission.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub hash: String,
    pub route: Route,
}

#[derive(Debug)]
struct Inner {
    pending: PendingSend,
    phase: SendPhase,
    warning: Option<WalletError>,
    error: Option<String>,
    // Bumped on every edit; estimates started before an edit are discarded.
    generation: u64,
}

/// One send-confirmation session: re-estimate until affordable, then submit exactly once per
/// user action.
pub struct SendSession<C, S> {
    chains: Arc<ChainSet<C>>,
    keys: Arc<KeyStore<S>>,
    state: WalletStateStore,
    inner: Mutex<Inner>,
}

impl<C: ChainClient, S: SecretStorage> SendSession<C, S> {
    pub fn new(
        chains: Arc<ChainSet<C>>,
        keys: Arc<KeyStore<S>>,
        state: WalletStateStore,
        chain: Chain,
        to: &str,
        amount: u128,
    ) -> Self {
        Self {
            chains,
            keys,
            state,
            inner: Mutex::new(Inner {
                pending: PendingSend {
                    chain,
                    to: to.trim().to_owned(),
                    amount,
                    fee_estimate: None,
                    total_cost: None,
                },
                phase: SendPhase::Estimating,
                warning: None,
                error: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves `Inner` consistent, so poisoning carries no meaning.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn view(&self) -> SendView {
        let g = self.lock();
        SendView {
            pending: g.pending.clone(),
            phase: g.phase.clone(),
            warning: g.warning.as_ref().map(WalletError::user_message),
            error: g.error.clone(),
        }
    }

    pub fn phase(&self) -> SendPhase {
        self.lock().phase.clone()
    }

    pub fn warning(&self) -> Option<WalletError> {
        self.lock().warning.clone()
    }

    /// Worst-case cost in USD at the last cached price, once a quote exists.
    pub fn total_usd(&self) -> Option<f64> {
        let (chain, total) = {
            let g = self.lock();
            (g.pending.chain, g.pending.total_cost?)
        };
        let price = self.state.snapshot().chain(chain).price_usd?;
        Some(financial_math::token_base_to_usd(total, chain.decimals(), price))
    }

    /// The user edited the amount: back to `Estimating` until the next cycle.
    #[cfg_attr(
        not(test),
        expect(dead_code, reason = "amount edits come from an interactive front end")
    )]
    pub fn set_amount(&self, amount: u128) -> Result<(), WalletError> {
        let mut g = self.lock();
        if g.phase.is_final_or_busy() {
            return Err(WalletError::NotReady);
        }
        g.pending.amount = amount;
        g.pending.total_cost = None;
        g.phase = SendPhase::Estimating;
        g.warning = None;
        g.generation = g.generation.wrapping_add(1);
        Ok(())
    }

    /// Fetch balance and fee concurrently and decide whether the send is affordable.
    ///
    /// Fetch failures are logged and leave the previous quote in place. Has no effect once the
    /// session is submitting or done.
    pub async fn estimate_cycle(&self) -> SendPhase {
        let (chain, to, amount, generation) = {
            let g = self.lock();
            if g.phase.is_final_or_busy() {
                return g.phase.clone();
            }
            (
                g.pending.chain,
                g.pending.to.clone(),
                g.pending.amount,
                g.generation,
            )
        };
        let Some(from) = self.state.address(chain) else {
            warn!(%chain, "no sender address; cannot estimate");
            return self.phase();
        };

        let client = self.chains.get(chain);
        let (balance, fee) = tokio::join!(
            client.balance(&from),
            client.estimate_fee(&from, &to, amount)
        );

        let mut g = self.lock();
        if g.generation != generation || g.phase.is_final_or_busy() {
            return g.phase.clone();
        }
        match (balance, fee) {
            (Ok(available), Ok(fee)) => {
                let needed = amount.saturating_add(fee);
                g.pending.fee_estimate = Some(fee);
                g.pending.total_cost = Some(needed);
                if needed <= available {
                    g.phase = SendPhase::Ready;
                    g.warning = None;
                } else {
                    g.phase = SendPhase::Estimating;
                    g.warning = Some(WalletError::InsufficientFunds { needed, available });
                }
            }
            (balance, fee) => {
                for e in [balance.err(), fee.err()].into_iter().flatten() {
                    warn!(%chain, error = %format!("{e:#}"), "fee estimation failed");
                }
            }
        }
        g.phase.clone()
    }

    /// Sign and broadcast. Allowed only from `Ready`.
    ///
    /// The key record is read from storage here and dropped when this returns. A failure puts
    /// the session back in `Ready` with a user-facing message; nothing is retried automatically.
    pub async fn submit(&self) -> Result<Submitted, WalletError> {
        let (chain, to, amount) = {
            let mut g = self.lock();
            if g.phase != SendPhase::Ready {
                return Err(WalletError::NotReady);
            }
            g.phase = SendPhase::Submitting;
            g.error = None;
            (g.pending.chain, g.pending.to.clone(), g.pending.amount)
        };

        let result = self.sign_and_broadcast(chain, &to, amount).await;

        let mut g = self.lock();
        match result {
            Ok(hash) => {
                info!(%chain, %hash, amount = %amount, "transfer submitted");
                g.phase = SendPhase::Succeeded { hash: hash.clone() };
                Ok(Submitted {
                    hash,
                    route: Route::TokenDetail(chain),
                })
            }
            Err(e) => {
                warn!(%chain, error = %e, "transfer submission failed");
                g.phase = SendPhase::Ready;
                g.error = Some(WalletError::Network(String::new()).user_message());
                Err(e)
            }
        }
    }

    /// Submit after the user confirmed: estimate once more and go ahead only if the send is
    /// still affordable. A stale `Ready` from before the prompt is never trusted on its own.
    pub async fn recheck_and_submit(&self) -> Result<Submitted, WalletError> {
        if self.estimate_cycle().await != SendPhase::Ready {
            return Err(self.warning().unwrap_or(WalletError::NotReady));
        }
        self.submit().await
    }

    async fn sign_and_broadcast(
        &self,
        chain: Chain,
        to: &str,
        amount: u128,
    ) -> Result<String, WalletError> {
        let record = self.keys.get()?.ok_or(WalletError::MissingKeys)?;
        let secret = match chain {
            Chain::Ethereum => &record.ethereum,
            Chain::Solana => &record.solana,
        };
        self.chains
            .get(chain)
            .submit_transfer(secret, to, amount)
            .await
            .map_err(|e| WalletError::network(&e))
    }
}

/// The confirmation screen's re-estimation timer.
pub fn spawn_estimation<C, S>(session: Arc<SendSession<C, S>>, period: Duration) -> IntervalTask
where
    C: ChainClient + 'static,
    S: SecretStorage + 'static,
{
    IntervalTask::spawn("fee-estimate", period, move || {
        let session = Arc::clone(&session);
        async move {
            session.estimate_cycle().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        keystore::MemorySecretStorage,
        state::WalletAction,
        testing::{fake_chains, FakeChain, ABANDON_ABOUT},
        wallet,
    };
    use std::sync::atomic::Ordering;

    type TestSession = SendSession<FakeChain, Arc<MemorySecretStorage>>;

    struct Fixture {
        chains: Arc<ChainSet<FakeChain>>,
        keys: Arc<KeyStore<Arc<MemorySecretStorage>>>,
        state: WalletStateStore,
    }

    fn fixture(eth_balance: u128) -> eyre::Result<Fixture> {
        let chains = fake_chains(eth_balance, 0);
        let keys = Arc::new(KeyStore::new(Arc::new(MemorySecretStorage::default())));
        let w = wallet::derive_wallets(&wallet::parse_phrase(ABANDON_ABOUT)?)?;
        keys.save(&w.master_key_record())?;
        let state = WalletStateStore::new();
        state.dispatch(WalletAction::SetAddresses {
            chain: Chain::Ethereum,
            address: w.ethereum.address.clone(),
            public_key: w.ethereum.public_key,
        });
        Ok(Fixture {
            chains,
            keys,
            state,
        })
    }

    impl Fixture {
        fn session(&self, amount: u128) -> TestSession {
            SendSession::new(
                Arc::clone(&self.chains),
                Arc::clone(&self.keys),
                self.state.clone(),
                Chain::Ethereum,
                "0x000000000000000000000000000000000000dEaD",
                amount,
            )
        }
    }

    #[tokio::test]
    async fn insufficient_funds_blocks_until_amount_is_reduced() -> eyre::Result<()> {
        let f = fixture(100_000)?;
        let s = f.session(90_000);

        assert_eq!(s.estimate_cycle().await, SendPhase::Estimating);
        let view = s.view();
        assert_eq!(view.pending.total_cost, Some(111_000));
        assert_eq!(
            view.warning.as_deref(),
            Some("Not enough funds to send transaction.")
        );
        assert_eq!(s.submit().await, Err(WalletError::NotReady));
        assert!(f.chains.ethereum.submit_calls()?.is_empty());

        s.set_amount(50_000)?;
        assert_eq!(s.phase(), SendPhase::Estimating);
        assert_eq!(s.estimate_cycle().await, SendPhase::Ready);
        assert_eq!(s.view().warning, None);

        let done = s.submit().await?;
        assert_eq!(done.route, Route::TokenDetail(Chain::Ethereum));
        assert_eq!(s.phase(), SendPhase::Succeeded { hash: done.hash });
        Ok(())
    }

    #[tokio::test]
    async fn failed_broadcast_returns_to_ready_and_resubmission_resigns() -> eyre::Result<()> {
        let f = fixture(1_000_000)?;
        let s = f.session(1_000);
        assert_eq!(s.estimate_cycle().await, SendPhase::Ready);

        f.chains.ethereum.failing_submits.store(1, Ordering::SeqCst);
        let err = s
            .submit()
            .await
            .err()
            .ok_or_else(|| eyre::eyre!("expected failure"))?;
        assert_eq!(err.code(), "network_error");
        let view = s.view();
        assert_eq!(view.phase, SendPhase::Ready);
        assert_eq!(
            view.error.as_deref(),
            Some("Failed to send transaction. Please try again later.")
        );
        // No automatic retry.
        assert_eq!(f.chains.ethereum.submit_calls()?.len(), 1);

        let ok = s.submit().await?;
        let calls = f.chains.ethereum.submit_calls()?;
        assert_eq!(calls.len(), 2);
        assert_ne!(calls.first().map(|c| c.hash.as_str()), Some(ok.hash.as_str()));
        assert_eq!(s.view().error, None);
        Ok(())
    }

    #[tokio::test]
    async fn estimation_errors_keep_previous_quote() -> eyre::Result<()> {
        let f = fixture(1_000_000)?;
        let s = f.session(1_000);
        assert_eq!(s.estimate_cycle().await, SendPhase::Ready);

        f.chains.ethereum.set_fee(Err("gas oracle down"))?;
        assert_eq!(s.estimate_cycle().await, SendPhase::Ready);
        assert_eq!(s.view().pending.fee_estimate, Some(21_000));
        Ok(())
    }

    #[tokio::test]
    async fn estimates_after_success_are_ignored() -> eyre::Result<()> {
        let f = fixture(1_000_000)?;
        let s = f.session(1_000);
        s.estimate_cycle().await;
        let done = s.submit().await?;

        f.chains.ethereum.set_balance(Ok(0))?;
        let before = f.chains.ethereum.fee_calls.load(Ordering::SeqCst);
        assert_eq!(
            s.estimate_cycle().await,
            SendPhase::Succeeded { hash: done.hash }
        );
        assert_eq!(f.chains.ethereum.fee_calls.load(Ordering::SeqCst), before);
        assert_eq!(s.set_amount(5), Err(WalletError::NotReady));
        Ok(())
    }

    #[tokio::test]
    async fn submission_reads_keys_at_submit_time() -> eyre::Result<()> {
        let f = fixture(1_000_000)?;
        let s = f.session(1_000);
        s.estimate_cycle().await;

        f.keys.clear()?;
        assert_eq!(s.submit().await, Err(WalletError::MissingKeys));
        assert_eq!(s.phase(), SendPhase::Ready);
        assert!(f.chains.ethereum.submit_calls()?.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn balance_drop_while_confirming_blocks_submission() -> eyre::Result<()> {
        let f = fixture(1_000_000)?;
        let s = Arc::new(f.session(1_000));
        assert_eq!(s.estimate_cycle().await, SendPhase::Ready);
        let timer = spawn_estimation(Arc::clone(&s), Duration::from_secs(5));

        // The user sits at the prompt while funds leave the account.
        f.chains.ethereum.set_balance(Ok(500))?;
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(s.phase(), SendPhase::Estimating);

        let err = s
            .recheck_and_submit()
            .await
            .err()
            .ok_or_else(|| eyre::eyre!("expected submission to be refused"))?;
        assert_eq!(err.code(), "insufficient_funds");
        assert!(f.chains.ethereum.submit_calls()?.is_empty());
        timer.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn recheck_catches_drop_between_ticks() -> eyre::Result<()> {
        let f = fixture(1_000_000)?;
        let s = f.session(1_000);
        assert_eq!(s.estimate_cycle().await, SendPhase::Ready);

        f.chains.ethereum.set_balance(Ok(0))?;
        assert_eq!(s.phase(), SendPhase::Ready);
        assert!(matches!(
            s.recheck_and_submit().await,
            Err(WalletError::InsufficientFunds { .. })
        ));
        assert!(f.chains.ethereum.submit_calls()?.is_empty());

        f.chains.ethereum.set_balance(Ok(1_000_000))?;
        let done = s.recheck_and_submit().await?;
        assert_eq!(f.chains.ethereum.submit_calls()?.len(), 1);
        assert_eq!(s.phase(), SendPhase::Succeeded { hash: done.hash });
        Ok(())
    }

    #[tokio::test]
    async fn total_usd_uses_cached_price() -> eyre::Result<()> {
        let f = fixture(2_000_000_000_000_000_000)?;
        let s = f.session(1_000_000_000_000_000_000);
        s.estimate_cycle().await;
        assert_eq!(s.total_usd(), None);

        f.state.dispatch(WalletAction::SetPrice {
            chain: Chain::Ethereum,
            usd: 2_000.0_f64,
        });
        let usd = s
            .total_usd()
            .ok_or_else(|| eyre::eyre!("expected a usd total"))?;
        assert!((usd - 2_000.0_f64).abs() < 1e-6_f64, "usd {usd}");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn estimation_timer_runs_every_period() -> eyre::Result<()> {
        let f = fixture(1_000_000)?;
        let s = Arc::new(f.session(1_000));
        let timer = spawn_estimation(Arc::clone(&s), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert_eq!(s.phase(), SendPhase::Estimating);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(s.phase(), SendPhase::Ready);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.chains.ethereum.fee_calls.load(Ordering::SeqCst), 3);
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.chains.ethereum.fee_calls.load(Ordering::SeqCst), 3);
        Ok(())
    }
}
