//! One handler per CLI subcommand. Each opens what it needs and prints either a JSON object or a
//! short human summary.

use crate::{
    amount,
    chains::{Chain, ChainSet, LiveChain},
    cli_output::{self, emit_json, fail, stdout_line},
    config::WalletConfig,
    errors::WalletError,
    financial_math,
    keystore::{FileSecretStorage, KeyStore},
    paths::WalletPaths,
    price::{BinancePriceFeed, PriceFeed as _},
    refresher::Refresher,
    session::{self, Route, SessionRoute},
    state::{ChainState, WalletAction, WalletStateStore},
    store::ConfigStore,
    submitter::{self, SendPhase, SendSession},
};
use eyre::Context as _;
use serde_json::json;
use std::{sync::Arc, time::Duration};

pub struct App {
    pub cfg: WalletConfig,
    keys: Arc<KeyStore<FileSecretStorage>>,
    state: WalletStateStore,
}

impl App {
    pub fn open(paths: &WalletPaths) -> eyre::Result<Self> {
        paths.ensure_private_dirs()?;
        let cfg = ConfigStore::new(paths)
            .load_or_init_default()
            .context("load config")?;
        let keys = Arc::new(KeyStore::open(paths).context("open secure storage")?);
        Ok(Self {
            cfg,
            keys,
            state: WalletStateStore::new(),
        })
    }

    /// Resolve the session and insist on a confirmed wallet. Only `status`, `confirm` and
    /// `reset` work on an unconfirmed one.
    fn require_wallet(&self, json: bool) -> eyre::Result<()> {
        match session::resolve_session(&self.keys, &self.state) {
            Ok(SessionRoute::NeedsSetup) => Err(fail(json, WalletError::MissingKeys)),
            Ok(SessionRoute::NeedsConfirmation) => Err(fail(json, WalletError::SeedNotConfirmed)),
            Ok(SessionRoute::Ready) => Ok(()),
            Err(e) => Err(fail(json, e)),
        }
    }

    fn live_chains(&self) -> Arc<ChainSet<LiveChain>> {
        Arc::new(ChainSet::from_config(&self.cfg))
    }

    fn refresher(&self) -> Refresher<LiveChain, BinancePriceFeed> {
        Refresher::new(
            self.live_chains(),
            Arc::new(BinancePriceFeed::new(&self.cfg.http)),
            self.state.clone(),
            self.cfg.polling.clone(),
        )
    }

    fn chain_json(&self, chain: Chain, c: &ChainState) -> serde_json::Value {
        let balance = c
            .balance
            .and_then(|b| amount::format_base_units(b, chain.decimals()).ok());
        json!({
            "chain": chain,
            "network": chain.network_label(self.cfg.network_mode),
            "ticker": chain.ticker(),
            "address": c.address,
            "public_key": c.public_key,
            "balance_base_units": c.balance.map(|b| b.to_string()),
            "balance": balance,
            "price_usd": c.price_usd,
            "fiat_usd": c.fiat_usd,
            "transactions": c.transactions,
        })
    }
}

pub fn paths(paths: &WalletPaths) -> eyre::Result<()> {
    emit_json(&json!({
      "config_dir": paths.config_dir,
      "data_dir": paths.data_dir,
      "log_file": paths.log_file,
      "secure_dir": paths.secure_dir(),
    }))
}

pub fn status(app: &App, json: bool) -> eyre::Result<()> {
    let route = session::resolve_session(&app.keys, &app.state).map_err(|e| fail(json, e))?;
    let snap = app.state.snapshot();
    if json {
        return emit_json(&json!({
            "session": route,
            "network_mode": app.cfg.network_mode,
            "ethereum": snap.ethereum.address,
            "solana": snap.solana.address,
        }));
    }
    match route {
        SessionRoute::NeedsSetup => {
            stdout_line("No wallet. Run `duowallet import` or `duowallet create`.")
        }
        SessionRoute::NeedsConfirmation | SessionRoute::Ready => {
            for chain in Chain::ALL {
                let addr = snap.chain(chain).address.clone().unwrap_or_default();
                stdout_line(&format!(
                    "{:<8} {:<8} {addr}",
                    chain.ticker(),
                    chain.network_label(app.cfg.network_mode)
                ))?;
            }
            if route == SessionRoute::NeedsConfirmation {
                cli_output::stderr_writeln("Seed phrase not confirmed yet.");
            }
            Ok(())
        }
    }
}

pub fn import(app: &App, json: bool) -> eyre::Result<()> {
    let phrase = cli_output::read_phrase("Enter your 12 or 24-word recovery phrase: ")?;
    let out = session::import_wallet(&app.keys, &app.state, &phrase).map_err(|e| fail(json, e))?;
    drop(phrase);
    if json {
        return emit_json(&out);
    }
    stdout_line(&format!(
        "Wallet imported.\nETH {}\nSOL {}",
        out.ethereum_address, out.solana_address
    ))
}

pub fn create(app: &App, json: bool) -> eyre::Result<()> {
    let created = session::create_wallet(&app.keys, &app.state).map_err(|e| fail(json, e))?;
    if json {
        return emit_json(&json!({
            "phrase": created.phrase.as_str(),
            "wallet": created.onboarded,
        }));
    }
    cli_output::stderr_writeln(
        "Write these words down in order. They are the only way to recover this wallet.",
    );
    stdout_line(&created.phrase)?;
    cli_output::stderr_writeln("Then run `duowallet confirm` and type them back.");
    Ok(())
}

pub fn confirm(app: &App, json: bool) -> eyre::Result<()> {
    let phrase = cli_output::read_phrase("Re-enter your recovery phrase: ")?;
    let route = session::confirm_seed_phrase(&app.keys, &phrase).map_err(|e| fail(json, e))?;
    drop(phrase);
    if json {
        return emit_json(&json!({ "route": route }));
    }
    stdout_line("Seed phrase confirmed.")
}

pub async fn reset(app: &App, yes: bool, json: bool) -> eyre::Result<()> {
    cli_output::confirm_or_bail(
        yes,
        "This deletes the stored keys. Funds are only recoverable with your phrase. Continue?",
    )
    .await?;
    let route = session::reset_wallet(&app.keys, &app.state).map_err(|e| fail(json, e))?;
    if json {
        return emit_json(&json!({ "route": route }));
    }
    stdout_line("Wallet removed from this device.")
}

pub fn receive(app: &App, chain: Chain, json: bool) -> eyre::Result<()> {
    app.require_wallet(json)?;
    let address = app.state.address(chain).unwrap_or_default();
    if json {
        return emit_json(&json!({
            "route": Route::Receive(chain),
            "chain": chain,
            "network": chain.network_label(app.cfg.network_mode),
            "address": address,
        }));
    }
    stdout_line(&address)
}

pub async fn balance(app: &App, chain: Chain, json: bool) -> eyre::Result<()> {
    app.require_wallet(json)?;
    let outcome = app.refresher().manual_refresh(chain).await;
    let snap = app.state.snapshot();
    let c = snap.chain(chain);
    if json {
        let mut v = app.chain_json(chain, c);
        if let Some(obj) = v.as_object_mut() {
            obj.insert("refreshed".into(), serde_json::to_value(outcome)?);
        }
        return emit_json(&v);
    }

    let balance = match c.balance {
        Some(b) => format!("{} {}", amount::format_base_units(b, chain.decimals())?, chain.ticker()),
        None => "unavailable".to_owned(),
    };
    let fiat = c
        .fiat_usd
        .map_or_else(|| "-".to_owned(), financial_math::format_usd);
    stdout_line(&format!("{balance}  ({fiat})"))?;
    for t in &c.transactions {
        stdout_line(&format!(
            "{}  {:?}  {}{} {}  {} -> {}",
            t.hash,
            t.direction,
            t.direction.sign(),
            t.value,
            t.asset,
            t.from,
            t.to.as_deref().unwrap_or("?"),
        ))?;
    }
    Ok(())
}

/// Poll until interrupted (or `updates` state changes were printed), one JSON line per change.
pub async fn watch(app: &App, chain: Chain, updates: Option<usize>) -> eyre::Result<()> {
    app.require_wallet(true)?;
    let refresher = app.refresher();
    let mut rx = app.state.subscribe();
    refresher.watch(chain).await?;
    emit_json(&app.chain_json(chain, app.state.snapshot().chain(chain)))?;

    let mut printed = 0_usize;
    loop {
        if updates.is_some_and(|n| printed >= n) {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = rx.borrow_and_update().clone();
                emit_json(&app.chain_json(chain, snap.chain(chain)))?;
                printed = printed.saturating_add(1);
            }
        }
    }
    refresher.unwatch()?;
    Ok(())
}

pub struct SendArgs {
    pub chain: Chain,
    pub to: String,
    pub amount: String,
    pub yes: bool,
    pub max_wait: Duration,
    pub json: bool,
}

pub async fn send(app: &App, args: SendArgs) -> eyre::Result<()> {
    let SendArgs {
        chain,
        to,
        amount: ui_amount,
        yes,
        max_wait,
        json,
    } = args;
    app.require_wallet(json)?;
    tracing::debug!(route = ?Route::Send(chain), "send flow started");
    let base = amount::parse_ui_amount(&ui_amount, chain.decimals()).context("parse amount")?;

    let session = Arc::new(SendSession::new(
        app.live_chains(),
        Arc::clone(&app.keys),
        app.state.clone(),
        chain,
        &to,
        base,
    ));
    // Re-estimation runs for as long as the confirmation is open, prompt included.
    let timer =
        submitter::spawn_estimation(Arc::clone(&session), app.cfg.polling.fee_estimate_period());
    let prices = BinancePriceFeed::new(&app.cfg.http);
    let (phase, price) = tokio::join!(session.estimate_cycle(), prices.spot_usd(chain));
    match price {
        Ok(usd) => app.state.dispatch(WalletAction::SetPrice { chain, usd }),
        Err(e) => tracing::debug!(%chain, error = %format!("{e:#}"), "no price for send summary"),
    }
    if phase != SendPhase::Ready {
        let waited = tokio::time::timeout(max_wait, async {
            loop {
                tokio::time::sleep(Duration::from_millis(250)).await;
                if session.phase() == SendPhase::Ready {
                    break;
                }
            }
        })
        .await;
        if waited.is_err() {
            return Err(fail(json, session.warning().unwrap_or(WalletError::NotReady)));
        }
    }

    let view = session.view();
    let fee = view.pending.fee_estimate.unwrap_or_default();
    let total = view.pending.total_cost.unwrap_or_default();
    let ticker = chain.ticker();
    let decimals = chain.decimals();
    cli_output::stderr_writeln(&format!(
        "Send {} {ticker} to {}\nNetwork fee (max) {} {ticker}\nTotal {} {ticker}",
        amount::format_base_units(base, decimals)?,
        view.pending.to,
        amount::format_base_units(fee, decimals)?,
        amount::format_base_units(total, decimals)?,
    ));
    if let Some(usd) = session.total_usd() {
        cli_output::stderr_writeln(&format!("Up to {}", financial_math::format_usd(usd)));
    }
    cli_output::confirm_or_bail(yes, "Submit this transaction?").await?;

    let done = session
        .recheck_and_submit()
        .await
        .map_err(|e| fail(json, e))?;
    timer.cancel();
    let explorer = chain.tx_explorer_url(app.cfg.network_mode, &done.hash);
    if json {
        return emit_json(&json!({
            "hash": done.hash,
            "explorer_url": explorer,
            "route": done.route,
            "fee_estimate_base_units": session.view().pending.fee_estimate.map(|f| f.to_string()),
        }));
    }
    stdout_line(&format!("{}\n{explorer}", done.hash))
}

pub fn explorer_url(cfg: &WalletConfig, chain: Chain, hash: &str, json: bool) -> eyre::Result<()> {
    let url = chain.tx_explorer_url(cfg.network_mode, hash.trim());
    if json {
        return emit_json(&json!({ "url": url }));
    }
    stdout_line(&url)
}
