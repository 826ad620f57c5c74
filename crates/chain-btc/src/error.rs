use thiserror::Error;

use crate::address::AddressValidationError;

/// Bitcoin chain operation errors.
#[derive(Debug, Error)]
pub enum BtcError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unsupported script type: {0}")]
    UnsupportedScriptType(String),

    #[error("invalid threshold: {m}-of-{n} (require 1 <= m <= n)")]
    Threshold { m: usize, n: usize },

    #[error("key count mismatch: expected {expected} public keys, got {actual}")]
    KeyCountMismatch { expected: usize, actual: usize },

    #[error("insufficient funds: have {available} sat, need {required} sat")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("dust output: {amount} sat is below the {threshold} sat minimum for this script")]
    DustOutput { amount: u64, threshold: u64 },

    #[error("transaction build error: {0}")]
    TransactionBuild(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("invalid draft state: {0}")]
    InvalidDraftState(String),

    #[error("invalid inscription: {0}")]
    InvalidInscription(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}

impl From<AddressValidationError> for BtcError {
    fn from(e: AddressValidationError) -> Self {
        BtcError::InvalidAddress(e.to_string())
    }
}
