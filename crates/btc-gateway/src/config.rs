use std::path::Path;
use std::time::Duration;

use chain_btc::BtcNetwork;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound on retries; the loop must stay small.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Connection and retry settings for an explorer gateway.
///
/// Every field has a default, so a TOML file only needs the values it
/// changes:
///
/// ```toml
/// network = "testnet"
/// timeout_ms = 5000
/// max_retries = 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub network: BtcNetwork,
    /// Explorer API base; the network's default when absent.
    pub base_url: Option<String>,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::for_network(BtcNetwork::default())
    }
}

impl GatewayConfig {
    pub fn for_network(network: BtcNetwork) -> Self {
        Self {
            network,
            base_url: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, GatewayError> {
        let config: Self = toml::from_str(s).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.timeout_ms == 0 {
            return Err(GatewayError::Config("timeout_ms must be positive".into()));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(GatewayError::Config(format!(
                "max_retries {} exceeds {MAX_RETRIES_LIMIT}",
                self.max_retries
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(GatewayError::Config(format!(
                "backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        let base = self.base_url();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(GatewayError::Config(format!("base_url must be http(s): {base}")));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.network.default_api_url())
            .trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Attempts in total, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}
