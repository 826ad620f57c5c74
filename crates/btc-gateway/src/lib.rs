//! Network access for the wallet core: an async [`NetworkGateway`] trait,
//! an Esplora-compatible HTTP implementation with bounded retries, and
//! broadcast / fee-estimate helpers.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod esplora;
pub mod fees;
pub mod gateway;

#[cfg(test)]
mod testing;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use esplora::EsploraGateway;
pub use fees::FeeEstimates;
pub use gateway::{AddressStats, NetworkGateway, TxInfo, TxStatus};
