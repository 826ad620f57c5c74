use chain_btc::error::BtcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Invalid extended key: {0}")]
    InvalidExtendedKey(String),

    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("Bitcoin: {0}")]
    Chain(BtcError),
}

impl From<BtcError> for WalletError {
    fn from(e: BtcError) -> Self {
        WalletError::Chain(e)
    }
}

impl From<bip32::Error> for WalletError {
    fn from(e: bip32::Error) -> Self {
        WalletError::DerivationFailed(e.to_string())
    }
}
