use std::collections::BTreeMap;

use async_trait::async_trait;
use chain_btc::utxo::Utxo;

use crate::error::GatewayError;
use crate::gateway::{AddressStats, NetworkGateway, TxInfo, TxStatus};

/// In-memory gateway for helper tests.
#[derive(Default)]
pub(crate) struct MockGateway {
    fees: Option<BTreeMap<u16, u64>>,
    accepted_txid: Option<String>,
    confirmed: Option<(String, u32)>,
}

impl MockGateway {
    pub(crate) fn with_fees(fees: impl IntoIterator<Item = (u16, u64)>) -> Self {
        Self {
            fees: Some(fees.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn unreachable() -> Self {
        Self::default()
    }

    pub(crate) fn accepting(txid: String) -> Self {
        Self {
            accepted_txid: Some(txid),
            ..Self::default()
        }
    }

    pub(crate) fn with_confirmed(txid: String, height: u32) -> Self {
        Self {
            confirmed: Some((txid, height)),
            ..Self::default()
        }
    }

    fn down() -> GatewayError {
        GatewayError::NetworkTimeout {
            attempts: 1,
            last_cause: "mock gateway is down".into(),
        }
    }
}

#[async_trait]
impl NetworkGateway for MockGateway {
    async fn get_utxos(&self, _address: &str) -> Result<Vec<Utxo>, GatewayError> {
        Ok(Vec::new())
    }

    async fn estimate_fee(&self, target_blocks: u16) -> Result<u64, GatewayError> {
        let fees = self.fees.as_ref().ok_or_else(Self::down)?;
        fees.get(&target_blocks)
            .copied()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("no estimate for {target_blocks}")))
    }

    async fn broadcast_transaction(&self, _raw_hex: &str) -> Result<String, GatewayError> {
        self.accepted_txid
            .clone()
            .ok_or_else(|| GatewayError::Broadcast("mock gateway rejects everything".into()))
    }

    async fn get_transaction(&self, txid: &str) -> Result<Option<TxInfo>, GatewayError> {
        Ok(self
            .confirmed
            .as_ref()
            .filter(|(known, _)| known == txid)
            .map(|(known, height)| TxInfo {
                txid: known.clone(),
                size: 0,
                weight: 0,
                fee: 0,
                status: TxStatus {
                    confirmed: true,
                    block_height: Some(*height),
                    ..TxStatus::default()
                },
            }))
    }

    async fn get_address_info(&self, address: &str) -> Result<AddressStats, GatewayError> {
        Ok(AddressStats {
            address: address.to_string(),
            chain_stats: Default::default(),
            mempool_stats: Default::default(),
        })
    }
}
