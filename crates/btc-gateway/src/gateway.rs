use async_trait::async_trait;
use chain_btc::utxo::Utxo;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Read and broadcast access to a Bitcoin network.
///
/// Implementations retry transient failures themselves; an error returned
/// here is final for the call.
#[async_trait]
pub trait NetworkGateway: Send + Sync {
    /// Unspent outputs locked to `address`.
    async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, GatewayError>;

    /// Fee rate in sat/vB expected to confirm within `target_blocks`.
    async fn estimate_fee(&self, target_blocks: u16) -> Result<u64, GatewayError>;

    /// Submit a raw transaction, returning its txid.
    async fn broadcast_transaction(&self, raw_hex: &str) -> Result<String, GatewayError>;

    /// `None` when the network does not know the transaction.
    async fn get_transaction(&self, txid: &str) -> Result<Option<TxInfo>, GatewayError>;

    async fn get_address_info(&self, address: &str) -> Result<AddressStats, GatewayError>;
}

/// Confirmation status of a transaction or output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u32>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
}

/// Transaction summary as reported by the explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
    pub txid: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub status: TxStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxoStats {
    pub funded_txo_count: u64,
    pub funded_txo_sum: u64,
    pub spent_txo_count: u64,
    pub spent_txo_sum: u64,
    pub tx_count: u64,
}

/// Address activity split into confirmed and mempool totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressStats {
    pub address: String,
    #[serde(default)]
    pub chain_stats: TxoStats,
    #[serde(default)]
    pub mempool_stats: TxoStats,
}

impl AddressStats {
    pub fn confirmed_balance(&self) -> u64 {
        self.chain_stats
            .funded_txo_sum
            .saturating_sub(self.chain_stats.spent_txo_sum)
    }

    /// Mempool delta; negative while spends are pending.
    pub fn unconfirmed_balance(&self) -> i64 {
        self.mempool_stats.funded_txo_sum as i64 - self.mempool_stats.spent_txo_sum as i64
    }

    pub fn total_balance(&self) -> u64 {
        let total = self.confirmed_balance() as i64 + self.unconfirmed_balance();
        total.max(0) as u64
    }

    pub fn tx_count(&self) -> u64 {
        self.chain_stats.tx_count + self.mempool_stats.tx_count
    }
}
