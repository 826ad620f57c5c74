use std::cmp::Reverse;

use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut, Txid};
use serde::{Deserialize, Serialize};

use crate::error::BtcError;

/// An unspent output as reported by a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Display-order txid hex.
    pub txid: String,
    pub vout: u32,
    pub amount_sat: u64,
    /// Raw locking script.
    pub script_pubkey: Vec<u8>,
    pub address: Option<String>,
    pub confirmed: bool,
    pub block_height: Option<u32>,
}

impl Utxo {
    /// A confirmed output with no known owner address.
    pub fn new(txid: impl Into<String>, vout: u32, amount_sat: u64, script_pubkey: Vec<u8>) -> Self {
        Self {
            txid: txid.into(),
            vout,
            amount_sat,
            script_pubkey,
            address: None,
            confirmed: true,
            block_height: None,
        }
    }

    pub fn outpoint(&self) -> Result<OutPoint, BtcError> {
        let txid: Txid = self
            .txid
            .parse()
            .map_err(|e| BtcError::TransactionBuild(format!("invalid txid {}: {e}", self.txid)))?;
        Ok(OutPoint::new(txid, self.vout))
    }

    /// The output being spent, as needed for sighash computation.
    pub fn txout(&self) -> TxOut {
        TxOut {
            value: Amount::from_sat(self.amount_sat),
            script_pubkey: ScriptBuf::from(self.script_pubkey.clone()),
        }
    }
}

/// Sum of `utxos` in satoshis.
pub fn total_value(utxos: &[Utxo]) -> u64 {
    utxos.iter().map(|u| u.amount_sat).sum()
}

/// Outputs safe to spend: all of them, or only confirmed ones.
pub fn spendable(utxos: &[Utxo], confirmed_only: bool) -> Vec<Utxo> {
    utxos
        .iter()
        .filter(|u| !confirmed_only || u.confirmed)
        .cloned()
        .collect()
}

/// Coins picked by [`select_utxos`] and the fee they were sized against.
#[derive(Debug, Clone)]
pub struct UtxoSelection {
    pub selected: Vec<Utxo>,
    pub total_sat: u64,
    pub fee_sat: u64,
}

/// Largest-first coin selection.
///
/// Coins are taken in descending value until they cover `target_sat` plus
/// `fee_for(selected)`. The fee callback sees the current pick so the
/// caller can price each script type properly.
pub fn select_utxos<F>(utxos: &[Utxo], target_sat: u64, fee_for: F) -> Result<UtxoSelection, BtcError>
where
    F: Fn(&[Utxo]) -> u64,
{
    let mut by_value: Vec<&Utxo> = utxos.iter().collect();
    by_value.sort_by_key(|u| Reverse(u.amount_sat));

    let mut picked = UtxoSelection {
        selected: Vec::with_capacity(by_value.len()),
        total_sat: 0,
        fee_sat: fee_for(&[]),
    };
    for utxo in by_value {
        picked.selected.push(utxo.clone());
        picked.total_sat += utxo.amount_sat;
        picked.fee_sat = fee_for(&picked.selected);
        if picked.total_sat >= target_sat + picked.fee_sat {
            return Ok(picked);
        }
    }

    Err(BtcError::InsufficientFunds {
        available: picked.total_sat,
        required: target_sat + picked.fee_sat,
    })
}
