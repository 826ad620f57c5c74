use bech32::{hrp, segwit};
use bitcoin::secp256k1::{SecretKey, XOnlyPublicKey};
use bitcoin::{Address, PublicKey};
use rand::rngs::OsRng;

use crate::address::{classify_script, AddressValidationError, ScriptType};
use crate::context::BtcContext;
use crate::error::BtcError;
use crate::keys::KeyPair;
use crate::network::BtcNetwork;
use crate::transaction::{self, Payment, SignedTransaction, UnsignedBtcTx, TX_OVERHEAD_VBYTES};
use crate::utxo::Utxo;

/// Estimated vsize of a key-path P2TR input.
pub const TAPROOT_INPUT_VBYTES: u64 = 58;

/// Estimated vsize of a P2TR output.
pub const TAPROOT_OUTPUT_VBYTES: u64 = 43;

/// A BIP-86 key-path address together with the key that controls it.
#[derive(Debug, Clone)]
pub struct TaprootAddress {
    address: String,
    internal_key: XOnlyPublicKey,
    key: KeyPair,
    network: BtcNetwork,
}

impl TaprootAddress {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Untweaked x-only internal key.
    pub fn internal_key(&self) -> [u8; 32] {
        self.internal_key.serialize()
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key
    }

    /// Full 33-byte public key of the internal key.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.key.public_key_bytes()
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }
}

/// Create a taproot address from `secret` or, when absent, from a fresh key.
pub fn create_address(ctx: &BtcContext, secret: Option<&[u8; 32]>) -> Result<TaprootAddress, BtcError> {
    let secret = match secret {
        Some(bytes) => SecretKey::from_slice(bytes)
            .map_err(|e| BtcError::InvalidKey(format!("invalid secret key: {e}")))?,
        None => SecretKey::new(&mut OsRng),
    };
    let key = KeyPair::from_secret_key(ctx, secret, true)?;
    let (internal_key, _parity) = key.public_key().inner.x_only_public_key();
    let address = Address::p2tr(ctx.secp(), internal_key, None, ctx.network().to_bitcoin_network());

    Ok(TaprootAddress {
        address: address.to_string(),
        internal_key,
        key,
        network: ctx.network(),
    })
}

/// Spend taproot UTXOs owned by `owner` to `outputs`, signing every input by
/// key path. Change returns to `change_address` or the owner's address.
pub fn create_transaction(
    ctx: &BtcContext,
    owner: &TaprootAddress,
    inputs: &[Utxo],
    outputs: &[Payment],
    fee_rate_sat_vbyte: u64,
    change_address: Option<&str>,
) -> Result<SignedTransaction, BtcError> {
    for utxo in inputs {
        let script_type = classify_script(bitcoin::Script::from_bytes(&utxo.script_pubkey));
        if script_type != ScriptType::P2tr {
            return Err(BtcError::UnsupportedScriptType(format!(
                "utxo {}:{} is {script_type}, not p2tr",
                utxo.txid, utxo.vout
            )));
        }
    }

    let change = change_address.unwrap_or(owner.address());
    let mut draft = transaction::build_payments(ctx, outputs, fee_rate_sat_vbyte, inputs, change)?;
    for input_index in 0..draft.tx.input.len() {
        sign_input(ctx, &mut draft, owner.key_pair(), input_index)?;
    }
    Ok(SignedTransaction::from_tx(&draft.tx, draft.fee_sat))
}

/// Key-path sign one input (BIP-86 tweak, SIGHASH_DEFAULT).
pub fn sign_input(
    ctx: &BtcContext,
    draft: &mut UnsignedBtcTx,
    key: &KeyPair,
    input_index: usize,
) -> Result<(), BtcError> {
    let prevout = draft
        .prevouts
        .get(input_index)
        .ok_or_else(|| BtcError::Signing(format!("input {input_index} out of range")))?;
    if classify_script(&prevout.script_pubkey) != ScriptType::P2tr {
        return Err(BtcError::UnsupportedScriptType(format!(
            "input {input_index} does not spend a taproot output"
        )));
    }
    transaction::sign_input(ctx, draft, key, input_index)
}

pub fn estimate_fee(num_inputs: usize, num_outputs: usize, fee_rate_sat_vbyte: u64) -> u64 {
    let vsize = TX_OVERHEAD_VBYTES
        + num_inputs as u64 * TAPROOT_INPUT_VBYTES
        + num_outputs as u64 * TAPROOT_OUTPUT_VBYTES;
    vsize * fee_rate_sat_vbyte
}

/// Decode a bech32m witness-v1 address and return its 32-byte output key.
pub fn check_taproot_address(address: &str) -> Result<[u8; 32], AddressValidationError> {
    let (hrp, version, program) =
        segwit::decode(address).map_err(|e| AddressValidationError::Malformed(e.to_string()))?;
    if hrp != hrp::BC && hrp != hrp::TB {
        return Err(AddressValidationError::Malformed(format!("unexpected prefix {hrp}")));
    }
    if version != segwit::VERSION_1 {
        return Err(AddressValidationError::Malformed(format!(
            "witness version {} is not taproot",
            version.to_u8()
        )));
    }
    program
        .try_into()
        .map_err(|p: Vec<u8>| AddressValidationError::Malformed(format!("{}-byte witness program", p.len())))
}

pub fn is_taproot_address(address: &str) -> bool {
    check_taproot_address(address).is_ok()
}

/// Key-path address for a 33-byte compressed or 32-byte x-only public key.
pub fn public_key_to_address(ctx: &BtcContext, public_key: &[u8]) -> Result<String, BtcError> {
    let internal_key = match public_key.len() {
        32 => XOnlyPublicKey::from_slice(public_key)
            .map_err(|e| BtcError::InvalidKey(format!("invalid x-only key: {e}")))?,
        33 => {
            let pk = PublicKey::from_slice(public_key)
                .map_err(|e| BtcError::InvalidKey(format!("failed to parse public key: {e}")))?;
            pk.inner.x_only_public_key().0
        }
        len => {
            return Err(BtcError::InvalidKey(format!(
                "taproot needs a 32 or 33 byte public key, got {len}"
            )))
        }
    };
    let address = Address::p2tr(ctx.secp(), internal_key, None, ctx.network().to_bitcoin_network());
    Ok(address.to_string())
}
