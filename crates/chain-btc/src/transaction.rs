use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::key::TapTweak;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Keypair, Message};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::transaction::Version;
use bitcoin::{ecdsa, taproot, Amount, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::{self, classify_script, ScriptType};
use crate::context::BtcContext;
use crate::error::BtcError;
use crate::keys::{require_compressed, KeyPair};
use crate::utxo::{select_utxos, Utxo};

/// Estimated virtual size of a P2WPKH input (in vbytes).
/// Breakdown: 41 bytes non-witness + ~27 witness bytes / 4 = ~68 vbytes per input.
pub const P2WPKH_INPUT_VBYTES: u64 = 68;

/// Estimated virtual size of any output (in vbytes).
pub const OUTPUT_VBYTES: u64 = 31;

/// Fixed transaction overhead (in vbytes): version + locktime + segwit marker/flag + counts.
pub const TX_OVERHEAD_VBYTES: u64 = 11;

/// Change at or below this value is not created; it goes to the fee instead.
pub const DUST_LIMIT: u64 = 546;

/// Largest payload accepted in a data-carrier (OP_RETURN) output.
pub const MAX_DATA_CARRIER_BYTES: usize = 80;

/// A payment to one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub address: String,
    pub amount_sat: u64,
}

impl Payment {
    pub fn new(address: impl Into<String>, amount_sat: u64) -> Self {
        Self {
            address: address.into(),
            amount_sat,
        }
    }
}

/// An unsigned Bitcoin transaction ready for signing.
#[derive(Debug, Clone)]
pub struct UnsignedBtcTx {
    /// The bitcoin transaction with empty witnesses.
    pub tx: Transaction,
    /// The outputs being spent, in input order. Needed for sighashes.
    pub prevouts: Vec<TxOut>,
    /// Inputs minus outputs.
    pub fee_sat: u64,
}

impl UnsignedBtcTx {
    pub fn total_in(&self) -> u64 {
        self.prevouts.iter().map(|o| o.value.to_sat()).sum()
    }

    pub fn total_out(&self) -> u64 {
        self.tx.output.iter().map(|o| o.value.to_sat()).sum()
    }
}

/// A fully signed transaction and the figures a caller usually reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub hex: String,
    pub txid: String,
    pub size: usize,
    pub vsize: usize,
    pub weight: u64,
    pub fee_sat: u64,
}

impl SignedTransaction {
    pub fn from_tx(tx: &Transaction, fee_sat: u64) -> Self {
        Self {
            hex: serialize_hex(tx),
            txid: tx.compute_txid().to_string(),
            size: tx.total_size(),
            vsize: tx.vsize(),
            weight: tx.weight().to_wu(),
            fee_sat,
        }
    }
}

/// Estimated vsize for `num_inputs` P2WPKH inputs and `num_outputs` outputs.
pub fn estimate_size(num_inputs: usize, num_outputs: usize) -> u64 {
    TX_OVERHEAD_VBYTES + (num_inputs as u64 * P2WPKH_INPUT_VBYTES) + (num_outputs as u64 * OUTPUT_VBYTES)
}

/// Estimate the fee for a P2WPKH transaction.
///
/// Computes `estimated_vsize * fee_rate_sat_vbyte` where the vsize is derived
/// from the number of inputs and outputs using P2WPKH weight estimates.
pub fn estimate_fee(num_inputs: usize, num_outputs: usize, fee_rate_sat_vbyte: u64) -> u64 {
    estimate_size(num_inputs, num_outputs) * fee_rate_sat_vbyte
}

/// Estimated vsize of spending an output locked by `script_pubkey`.
fn input_vbytes(script_pubkey: &[u8]) -> u64 {
    match classify_script(bitcoin::Script::from_bytes(script_pubkey)) {
        ScriptType::P2pkh => 148,
        ScriptType::P2sh => 91,
        ScriptType::P2tr => 58,
        _ => P2WPKH_INPUT_VBYTES,
    }
}

/// Serialized size of an output: value, script length and script.
fn output_vbytes(output: &TxOut) -> u64 {
    let len = output.script_pubkey.len() as u64;
    let prefix = if len < 0xfd { 1 } else { 3 };
    8 + prefix + len
}

/// Relay-policy dust threshold for `script`: 546 sat for P2PKH, 294 for
/// P2WPKH, 330 for P2TR.
fn check_dust(script: &Script, amount_sat: u64) -> Result<(), BtcError> {
    let threshold = script.minimal_non_dust().to_sat();
    if amount_sat < threshold {
        return Err(BtcError::DustOutput {
            amount: amount_sat,
            threshold,
        });
    }
    Ok(())
}

/// Build an unsigned payment of `amount_sat` from `from_address` to `to_address`.
///
/// Change goes to `change_address` or, when absent, back to `from_address`.
pub fn build(
    ctx: &BtcContext,
    from_address: &str,
    to_address: &str,
    amount_sat: u64,
    fee_rate_sat_vbyte: u64,
    utxos: &[Utxo],
    change_address: Option<&str>,
) -> Result<UnsignedBtcTx, BtcError> {
    if amount_sat == 0 {
        return Err(BtcError::InvalidAmount("amount must be greater than zero".into()));
    }

    let network = ctx.network();
    address::validate_for(from_address, network)?;
    let recipient = address::script_pubkey_for(to_address, network)?;
    check_dust(&recipient, amount_sat)?;
    let change = address::script_pubkey_for(change_address.unwrap_or(from_address), network)?;

    let outputs = vec![TxOut {
        value: Amount::from_sat(amount_sat),
        script_pubkey: recipient,
    }];
    fund_outputs(outputs, fee_rate_sat_vbyte, utxos, change)
}

/// Build an unsigned transaction paying every entry of `payments`.
pub fn build_payments(
    ctx: &BtcContext,
    payments: &[Payment],
    fee_rate_sat_vbyte: u64,
    utxos: &[Utxo],
    change_address: &str,
) -> Result<UnsignedBtcTx, BtcError> {
    if payments.is_empty() {
        return Err(BtcError::TransactionBuild("no outputs requested".into()));
    }
    let network = ctx.network();
    let mut outputs = Vec::with_capacity(payments.len());
    for payment in payments {
        if payment.amount_sat == 0 {
            return Err(BtcError::InvalidAmount(format!(
                "payment to {} has zero amount",
                payment.address
            )));
        }
        let script_pubkey = address::script_pubkey_for(&payment.address, network)?;
        check_dust(&script_pubkey, payment.amount_sat)?;
        outputs.push(TxOut {
            value: Amount::from_sat(payment.amount_sat),
            script_pubkey,
        });
    }
    let change = address::script_pubkey_for(change_address, network)?;
    fund_outputs(outputs, fee_rate_sat_vbyte, utxos, change)
}

/// Build an unsigned transaction carrying `message` in a zero-value OP_RETURN
/// output. Any change returns to `from_address`.
pub fn build_data_carrier(
    ctx: &BtcContext,
    message: &[u8],
    from_address: &str,
    utxos: &[Utxo],
    fee_rate_sat_vbyte: u64,
) -> Result<UnsignedBtcTx, BtcError> {
    if message.len() > MAX_DATA_CARRIER_BYTES {
        return Err(BtcError::PayloadTooLarge {
            size: message.len(),
            max: MAX_DATA_CARRIER_BYTES,
        });
    }
    let change = address::script_pubkey_for(from_address, ctx.network())?;

    let data = push_bytes(message.to_vec())?;
    let outputs = vec![TxOut {
        value: Amount::ZERO,
        script_pubkey: ScriptBuf::new_op_return(data),
    }];
    fund_outputs(outputs, fee_rate_sat_vbyte, utxos, change)
}

/// Select inputs for `outputs`, append change when it clears the dust limit
/// and assemble the unsigned transaction.
pub(crate) fn fund_outputs(
    mut outputs: Vec<TxOut>,
    fee_rate_sat_vbyte: u64,
    utxos: &[Utxo],
    change_script: ScriptBuf,
) -> Result<UnsignedBtcTx, BtcError> {
    let target: u64 = outputs.iter().map(|o| o.value.to_sat()).sum();
    let outputs_vbytes: u64 = outputs.iter().map(output_vbytes).sum();
    let change_vbytes = 8 + 1 + change_script.len() as u64;

    let fee_with_change = |selected: &[Utxo]| {
        let inputs: u64 = selected.iter().map(|u| input_vbytes(&u.script_pubkey)).sum();
        (TX_OVERHEAD_VBYTES + inputs + outputs_vbytes + change_vbytes) * fee_rate_sat_vbyte
    };
    let fee_without_change = |selected: &[Utxo]| {
        let inputs: u64 = selected.iter().map(|u| input_vbytes(&u.script_pubkey)).sum();
        (TX_OVERHEAD_VBYTES + inputs + outputs_vbytes) * fee_rate_sat_vbyte
    };

    let selection = select_utxos(utxos, target, fee_without_change)?;
    let fee_if_change = fee_with_change(&selection.selected);
    let change_sat = selection.total_sat.saturating_sub(target + fee_if_change);

    if change_sat > DUST_LIMIT {
        outputs.push(TxOut {
            value: Amount::from_sat(change_sat),
            script_pubkey: change_script,
        });
    }

    let mut inputs = Vec::with_capacity(selection.selected.len());
    let mut prevouts = Vec::with_capacity(selection.selected.len());
    for utxo in &selection.selected {
        inputs.push(TxIn {
            previous_output: utxo.outpoint()?,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        });
        prevouts.push(utxo.txout());
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: outputs,
    };
    let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
    let fee_sat = selection.total_sat - total_out;

    debug!(
        inputs = tx.input.len(),
        outputs = tx.output.len(),
        fee_sat,
        "built unsigned transaction"
    );

    Ok(UnsignedBtcTx { tx, prevouts, fee_sat })
}

/// Sign every input of `unsigned` with `key` and serialize the result.
///
/// Each input is signed according to the type of the output it spends:
/// P2WPKH, P2PKH, P2SH-wrapped P2WPKH or P2TR key path.
pub fn sign(
    ctx: &BtcContext,
    unsigned: &UnsignedBtcTx,
    key: &KeyPair,
) -> Result<SignedTransaction, BtcError> {
    let mut draft = unsigned.clone();
    for input_index in 0..draft.tx.input.len() {
        sign_input(ctx, &mut draft, key, input_index)?;
    }
    Ok(SignedTransaction::from_tx(&draft.tx, draft.fee_sat))
}

/// Sign a single input of `draft` in place.
pub fn sign_input(
    ctx: &BtcContext,
    draft: &mut UnsignedBtcTx,
    key: &KeyPair,
    input_index: usize,
) -> Result<(), BtcError> {
    if draft.prevouts.len() != draft.tx.input.len() {
        return Err(BtcError::TransactionBuild(format!(
            "{} prevouts for {} inputs",
            draft.prevouts.len(),
            draft.tx.input.len()
        )));
    }
    let prevout = draft.prevouts.get(input_index).ok_or_else(|| {
        BtcError::Signing(format!("input {input_index} out of range"))
    })?;
    let secp = ctx.secp();
    let public_key = *key.public_key();
    let secret = key.secret_key();
    let not_ours = || BtcError::Signing(format!("input {input_index} is not locked to this key"));

    match classify_script(&prevout.script_pubkey) {
        ScriptType::P2wpkh => {
            let cpk = require_compressed(public_key)?;
            if prevout.script_pubkey != ScriptBuf::new_p2wpkh(&cpk.wpubkey_hash()) {
                return Err(not_ours());
            }
            let sighash = SighashCache::new(&draft.tx)
                .p2wpkh_signature_hash(
                    input_index,
                    &prevout.script_pubkey,
                    prevout.value,
                    EcdsaSighashType::All,
                )
                .map_err(|e| BtcError::Signing(format!("sighash computation failed: {e}")))?;
            let signature = ecdsa::Signature::sighash_all(
                secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), &secret),
            );
            draft.tx.input[input_index].witness = Witness::p2wpkh(&signature, &cpk.0);
        }
        ScriptType::P2sh => {
            let cpk = require_compressed(public_key)?;
            let redeem = ScriptBuf::new_p2wpkh(&cpk.wpubkey_hash());
            if prevout.script_pubkey != ScriptBuf::new_p2sh(&redeem.script_hash()) {
                return Err(not_ours());
            }
            let sighash = SighashCache::new(&draft.tx)
                .p2wpkh_signature_hash(input_index, &redeem, prevout.value, EcdsaSighashType::All)
                .map_err(|e| BtcError::Signing(format!("sighash computation failed: {e}")))?;
            let signature = ecdsa::Signature::sighash_all(
                secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), &secret),
            );
            let input = &mut draft.tx.input[input_index];
            input.script_sig = Builder::new().push_slice(push_bytes(redeem.to_bytes())?).into_script();
            input.witness = Witness::p2wpkh(&signature, &cpk.0);
        }
        ScriptType::P2pkh => {
            if prevout.script_pubkey != ScriptBuf::new_p2pkh(&public_key.pubkey_hash()) {
                return Err(not_ours());
            }
            let sighash = SighashCache::new(&draft.tx)
                .legacy_signature_hash(
                    input_index,
                    &prevout.script_pubkey,
                    EcdsaSighashType::All.to_u32(),
                )
                .map_err(|e| BtcError::Signing(format!("sighash computation failed: {e}")))?;
            let signature = ecdsa::Signature::sighash_all(
                secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), &secret),
            );
            draft.tx.input[input_index].script_sig = Builder::new()
                .push_slice(push_bytes(signature.to_vec())?)
                .push_key(&public_key)
                .into_script();
        }
        ScriptType::P2tr => {
            let keypair = Keypair::from_secret_key(secp, &secret);
            let (internal_key, _parity) = keypair.x_only_public_key();
            if prevout.script_pubkey != ScriptBuf::new_p2tr(secp, internal_key, None) {
                return Err(not_ours());
            }
            let sighash = SighashCache::new(&draft.tx)
                .taproot_key_spend_signature_hash(
                    input_index,
                    &Prevouts::All(draft.prevouts.as_slice()),
                    TapSighashType::Default,
                )
                .map_err(|e| BtcError::Signing(format!("taproot sighash failed: {e}")))?;
            let tweaked = keypair.tap_tweak(secp, None).to_keypair();
            let signature = secp.sign_schnorr(&Message::from_digest(sighash.to_byte_array()), &tweaked);
            draft.tx.input[input_index].witness = Witness::p2tr_key_spend(&taproot::Signature {
                signature,
                sighash_type: TapSighashType::Default,
            });
        }
        other => {
            return Err(BtcError::UnsupportedScriptType(format!(
                "cannot sign input {input_index} spending {other}"
            )))
        }
    }
    Ok(())
}

pub(crate) fn push_bytes(data: Vec<u8>) -> Result<PushBytesBuf, BtcError> {
    let len = data.len();
    PushBytesBuf::try_from(data)
        .map_err(|_| BtcError::TransactionBuild(format!("{len} bytes exceed the push limit")))
}
