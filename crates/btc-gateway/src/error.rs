use chain_btc::BtcError;
use thiserror::Error;

/// Errors from talking to a block explorer.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network timeout after {attempts} attempts: {last_cause}")]
    NetworkTimeout { attempts: u32, last_cause: String },

    #[error("broadcast rejected: {0}")]
    Broadcast(String),

    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid gateway config: {0}")]
    Config(String),

    #[error("bitcoin: {0}")]
    Chain(BtcError),
}

impl From<BtcError> for GatewayError {
    fn from(e: BtcError) -> Self {
        GatewayError::Chain(e)
    }
}

impl GatewayError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::NetworkTimeout { .. } => true,
            GatewayError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
