use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A structured error suitable for printing to the user (or as `--json` output).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

impl ErrorReport {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("recovery phrase must be 12 or 24 words (got {words})")]
    InvalidPhraseFormat { words: usize },

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("secure storage write failed: {0}")]
    StorageWrite(String),

    #[error("secure storage read failed: {0}")]
    StorageRead(String),

    #[error("insufficient funds: need {needed} base units, have {available}")]
    InsufficientFunds { needed: u128, available: u128 },

    #[error("network error: {0}")]
    Network(String),

    #[error("no wallet keys stored")]
    MissingKeys,

    #[error("seed phrase confirmation did not match")]
    ConfirmationMismatch,

    #[error("seed phrase not confirmed yet")]
    SeedNotConfirmed,

    #[error("transfer is not ready to submit")]
    NotReady,
}

impl WalletError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidPhraseFormat { .. } => "invalid_phrase_format",
            Self::Derivation(_) => "derivation_error",
            Self::StorageWrite(_) => "storage_write_error",
            Self::StorageRead(_) => "storage_read_error",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::Network(_) => "network_error",
            Self::MissingKeys => "missing_keys",
            Self::ConfirmationMismatch => "confirmation_mismatch",
            Self::SeedNotConfirmed => "seed_not_confirmed",
            Self::NotReady => "not_ready",
        }
    }

    /// The copy shown to a person, as opposed to the diagnostic `Display` text.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidPhraseFormat { .. } | Self::Derivation(_) => {
                "Looks like the seed phrase is incorrect. Please try again.".to_owned()
            }
            Self::StorageWrite(_) | Self::StorageRead(_) => {
                "Could not access secure storage on this device.".to_owned()
            }
            Self::InsufficientFunds { .. } => "Not enough funds to send transaction.".to_owned(),
            Self::Network(_) => "Failed to send transaction. Please try again later.".to_owned(),
            Self::MissingKeys => "No wallet found. Set up or import a wallet first.".to_owned(),
            Self::ConfirmationMismatch => {
                "The words entered do not match your seed phrase.".to_owned()
            }
            Self::SeedNotConfirmed => {
                "Confirm your seed phrase first. Run `duowallet confirm`.".to_owned()
            }
            Self::NotReady => "Transaction is still being estimated.".to_owned(),
        }
    }

    /// Wrap an internal report, keeping the full cause chain in the message.
    pub fn storage_write(e: &eyre::Report) -> Self {
        Self::StorageWrite(format!("{e:#}"))
    }

    pub fn storage_read(e: &eyre::Report) -> Self {
        Self::StorageRead(format!("{e:#}"))
    }

    pub fn network(e: &eyre::Report) -> Self {
        Self::Network(format!("{e:#}"))
    }
}

impl From<&WalletError> for ErrorReport {
    fn from(e: &WalletError) -> Self {
        Self::new(e.code(), e.user_message())
    }
}
