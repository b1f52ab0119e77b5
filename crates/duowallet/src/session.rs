//! Launch-time session resolution and the onboarding flows that create or remove a wallet.

use crate::{
    chains::Chain,
    errors::WalletError,
    keystore::{KeyStore, SecretStorage},
    state::{WalletAction, WalletStateStore},
    wallet::{self, DerivedWallets},
};
use serde::Serialize;
use tracing::{info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletOrigin {
    Imported,
    Created,
}

/// Screens the session layer can send the user to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "screen", content = "params", rename_all = "snake_case")]
pub enum Route {
    Setup,
    SeedConfirmation,
    WalletCreated { success: WalletOrigin },
    Send(Chain),
    Receive(Chain),
    TokenDetail(Chain),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRoute {
    NeedsSetup,
    NeedsConfirmation,
    Ready,
}

/// Addresses of a freshly onboarded wallet plus where to go next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Onboarded {
    pub route: Route,
    pub ethereum_address: String,
    pub solana_address: String,
}

impl Onboarded {
    fn new(route: Route, wallets: &DerivedWallets) -> Self {
        Self {
            route,
            ethereum_address: wallets.ethereum.address.clone(),
            solana_address: wallets.solana.address.clone(),
        }
    }
}

/// A generated wallet. `phrase` must be shown once and then dropped.
#[derive(Debug)]
pub struct CreatedWallet {
    pub phrase: Zeroizing<String>,
    pub onboarded: Onboarded,
}

#[cfg_attr(
    not(test),
    expect(dead_code, reason = "navigation hook; the CLI has no screen stack")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackOutcome {
    Popped,
    ResetTo(Route),
}

fn publish_addresses(state: &WalletStateStore, wallets: &DerivedWallets) {
    for (chain, w) in [
        (Chain::Ethereum, &wallets.ethereum),
        (Chain::Solana, &wallets.solana),
    ] {
        state.dispatch(WalletAction::SetAddresses {
            chain,
            address: w.address.clone(),
            public_key: w.public_key.clone(),
        });
    }
}

/// Decide where a launch lands. "No keys" wins over whatever the confirmation flag says.
pub fn resolve_session<S: SecretStorage>(
    keys: &KeyStore<S>,
    state: &WalletStateStore,
) -> Result<SessionRoute, WalletError> {
    let Some(record) = keys.get()? else {
        state.dispatch(WalletAction::Reset);
        // A leftover flag must not survive; failing to remove it does not block setup.
        if let Err(e) = keys.clear() {
            warn!(error = %e, "could not clear stale secure storage");
        }
        info!(route = "needs_setup", "session resolved");
        return Ok(SessionRoute::NeedsSetup);
    };

    if !state.snapshot().has_addresses() {
        publish_addresses(state, &wallet::wallets_from_record(&record)?);
    }
    drop(record);

    let route = if keys.get_confirmation()? {
        SessionRoute::Ready
    } else {
        SessionRoute::NeedsConfirmation
    };
    info!(?route, "session resolved");
    Ok(route)
}

/// Store the record, then the flag. If the flag cannot be written the record is removed again.
fn persist<S: SecretStorage>(
    keys: &KeyStore<S>,
    wallets: &DerivedWallets,
    confirmed: bool,
) -> Result<(), WalletError> {
    keys.save(&wallets.master_key_record())?;
    if let Err(e) = keys.set_confirmation(confirmed) {
        if let Err(clear_err) = keys.clear() {
            warn!(error = %clear_err, "rollback after failed flag write incomplete");
        }
        return Err(e);
    }
    Ok(())
}

/// Import an existing phrase. Nothing is written unless the phrase derives cleanly.
pub fn import_wallet<S: SecretStorage>(
    keys: &KeyStore<S>,
    state: &WalletStateStore,
    phrase: &str,
) -> Result<Onboarded, WalletError> {
    let wallets = wallet::derive_wallets(&wallet::parse_phrase(phrase)?)?;

    // The user already holds this phrase, so there is nothing to confirm.
    persist(keys, &wallets, true)?;
    state.dispatch(WalletAction::Reset);
    publish_addresses(state, &wallets);
    info!(ethereum = %wallets.ethereum.address, solana = %wallets.solana.address, "wallet imported");
    Ok(Onboarded::new(
        Route::WalletCreated {
            success: WalletOrigin::Imported,
        },
        &wallets,
    ))
}

pub fn create_wallet<S: SecretStorage>(
    keys: &KeyStore<S>,
    state: &WalletStateStore,
) -> Result<CreatedWallet, WalletError> {
    let (wallets, phrase) = {
        let mnemonic = wallet::generate_phrase()?;
        (
            wallet::derive_wallets(&mnemonic)?,
            Zeroizing::new(mnemonic.to_string()),
        )
    };

    persist(keys, &wallets, false)?;
    state.dispatch(WalletAction::Reset);
    publish_addresses(state, &wallets);
    info!(ethereum = %wallets.ethereum.address, solana = %wallets.solana.address, "wallet created");
    Ok(CreatedWallet {
        phrase,
        onboarded: Onboarded::new(Route::SeedConfirmation, &wallets),
    })
}

/// The user re-entered their phrase. It must derive to the stored accounts.
pub fn confirm_seed_phrase<S: SecretStorage>(
    keys: &KeyStore<S>,
    entered: &str,
) -> Result<Route, WalletError> {
    let record = keys.get()?.ok_or(WalletError::MissingKeys)?;
    let stored = wallet::wallets_from_record(&record)?;
    drop(record);

    let typed = match wallet::parse_phrase(entered).and_then(|m| wallet::derive_wallets(&m)) {
        Ok(w) => w,
        Err(WalletError::InvalidPhraseFormat { .. } | WalletError::Derivation(_)) => {
            return Err(WalletError::ConfirmationMismatch);
        }
        Err(e) => return Err(e),
    };
    if typed.ethereum.address != stored.ethereum.address
        || typed.solana.address != stored.solana.address
    {
        return Err(WalletError::ConfirmationMismatch);
    }

    keys.set_confirmation(true)?;
    info!("seed phrase confirmed");
    Ok(Route::WalletCreated {
        success: WalletOrigin::Created,
    })
}

/// Explicit logout: forget the in-memory wallet and wipe secure storage.
pub fn reset_wallet<S: SecretStorage>(
    keys: &KeyStore<S>,
    state: &WalletStateStore,
) -> Result<Route, WalletError> {
    state.dispatch(WalletAction::Reset);
    keys.clear()?;
    info!("wallet reset");
    Ok(Route::Setup)
}

/// The router's back action: pop when there is somewhere to go, otherwise start over.
#[cfg_attr(
    not(test),
    expect(dead_code, reason = "navigation hook; the CLI has no screen stack")
)]
pub fn back_or_reset<S: SecretStorage>(
    keys: &KeyStore<S>,
    state: &WalletStateStore,
    can_go_back: bool,
) -> Result<BackOutcome, WalletError> {
    if can_go_back {
        return Ok(BackOutcome::Popped);
    }
    reset_wallet(keys, state).map(BackOutcome::ResetTo)
}
