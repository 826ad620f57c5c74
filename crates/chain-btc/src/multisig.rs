use std::collections::BTreeMap;
use std::fmt;

use bitcoin::absolute::LockTime;
use bitcoin::blockdata::constants::MAX_SCRIPT_ELEMENT_SIZE;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_CHECKSIG, OP_CHECKSIGADD, OP_NUMEQUAL, OP_PUSHBYTES_0};
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Keypair, Message, XOnlyPublicKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{LeafVersion, TapLeafHash, TaprootBuilder, TaprootSpendInfo};
use bitcoin::transaction::Version;
use bitcoin::{
    ecdsa, taproot, Address, Amount, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Witness,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::address;
use crate::context::BtcContext;
use crate::error::BtcError;
use crate::keys::KeyPair;
use crate::network::BtcNetwork;
use crate::transaction::{push_bytes, Payment, SignedTransaction, TX_OVERHEAD_VBYTES};
use crate::utxo::Utxo;

/// Standardness limit on keys in a bare CHECKMULTISIG redeem script.
pub const MAX_LEGACY_KEYS: usize = 15;

/// Key limit for witness-script and tapscript wallets.
pub const MAX_KEYS: usize = 20;

/// BIP-341 "nothing up my sleeve" point. Nobody knows its discrete log, so a
/// wallet whose internal key is this point can only be spent by script path.
const NUMS_INTERNAL_KEY: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a, 0x5e,
    0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80, 0x3a, 0xc0,
];

/// How the m-of-n condition is wrapped on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultisigScriptType {
    /// P2SH over a CHECKMULTISIG redeem script.
    Legacy,
    /// P2WSH over a CHECKMULTISIG witness script.
    Segwit,
    /// P2TR with a single CHECKSIGADD leaf under an unspendable internal key.
    TaprootScriptPath,
}

impl fmt::Display for MultisigScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultisigScriptType::Legacy => write!(f, "legacy"),
            MultisigScriptType::Segwit => write!(f, "segwit"),
            MultisigScriptType::TaprootScriptPath => write!(f, "taproot-script-path"),
        }
    }
}

/// An m-of-n wallet: its address and the script that governs spending.
#[derive(Debug, Clone)]
pub struct MultisigWallet {
    address: String,
    script: ScriptBuf,
    public_keys: Vec<PublicKey>,
    threshold: usize,
    script_type: MultisigScriptType,
    network: BtcNetwork,
    spend_info: Option<TaprootSpendInfo>,
}

impl MultisigWallet {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Redeem script (legacy), witness script (segwit) or tapscript leaf.
    pub fn script(&self) -> &ScriptBuf {
        &self.script
    }

    pub fn public_keys(&self) -> &[PublicKey] {
        &self.public_keys
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn total_keys(&self) -> usize {
        self.public_keys.len()
    }

    pub fn script_type(&self) -> MultisigScriptType {
        self.script_type
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    /// Locking script of the wallet address.
    pub fn script_pubkey(&self) -> ScriptBuf {
        match (self.script_type, &self.spend_info) {
            (MultisigScriptType::Legacy, _) => ScriptBuf::new_p2sh(&self.script.script_hash()),
            (MultisigScriptType::Segwit, _) => ScriptBuf::new_p2wsh(&self.script.wscript_hash()),
            (MultisigScriptType::TaprootScriptPath, Some(info)) => {
                ScriptBuf::new_p2tr_tweaked(info.output_key())
            }
            (MultisigScriptType::TaprootScriptPath, None) => ScriptBuf::new(),
        }
    }

    /// Serialized control block proving the leaf for a script-path spend.
    pub fn control_block(&self) -> Option<Vec<u8>> {
        let info = self.spend_info.as_ref()?;
        info.control_block(&(self.script.clone(), LeafVersion::TapScript))
            .map(|cb| cb.serialize())
    }

    fn signer_index(&self, public_key: &PublicKey) -> Option<usize> {
        self.public_keys.iter().position(|pk| pk.inner == public_key.inner)
    }
}

/// Generate `n` fresh compressed key pairs for a new wallet.
pub fn generate_keys(ctx: &BtcContext, n: usize) -> Result<Vec<KeyPair>, BtcError> {
    if n == 0 || n > MAX_KEYS {
        return Err(BtcError::Threshold { m: 1, n });
    }
    (0..n).map(|_| KeyPair::generate(ctx, true)).collect()
}

fn check_threshold(m: usize, n: usize) -> Result<(), BtcError> {
    if m < 1 || m > n {
        return Err(BtcError::Threshold { m, n });
    }
    Ok(())
}

/// `OP_m <pk1> ... <pkn> OP_n OP_CHECKMULTISIG`, keys in the given order.
pub fn build_redeem_script(public_keys: &[PublicKey], m: usize, n: usize) -> Result<ScriptBuf, BtcError> {
    check_threshold(m, n)?;
    if public_keys.len() != n {
        return Err(BtcError::KeyCountMismatch {
            expected: n,
            actual: public_keys.len(),
        });
    }

    let mut builder = Builder::new().push_int(m as i64);
    for pk in public_keys {
        builder = builder.push_key(pk);
    }
    Ok(builder.push_int(n as i64).push_opcode(OP_CHECKMULTISIG).into_script())
}

/// `<pk1> OP_CHECKSIG <pk2> OP_CHECKSIGADD ... <pkn> OP_CHECKSIGADD <m> OP_NUMEQUAL`.
///
/// CHECKMULTISIG is disabled inside tapscript, so the threshold is counted
/// with CHECKSIGADD instead.
pub fn build_tapscript_leaf(public_keys: &[PublicKey], m: usize) -> Result<ScriptBuf, BtcError> {
    check_threshold(m, public_keys.len())?;

    let mut builder = Builder::new();
    for (i, pk) in public_keys.iter().enumerate() {
        let (xonly, _parity) = pk.inner.x_only_public_key();
        let op = if i == 0 { OP_CHECKSIG } else { OP_CHECKSIGADD };
        builder = builder.push_x_only_key(&xonly).push_opcode(op);
    }
    Ok(builder.push_int(m as i64).push_opcode(OP_NUMEQUAL).into_script())
}

/// Create an m-of-n wallet from SEC1-encoded public keys.
pub fn create_wallet(
    ctx: &BtcContext,
    public_keys: &[Vec<u8>],
    m: usize,
    n: usize,
    script_type: MultisigScriptType,
) -> Result<MultisigWallet, BtcError> {
    check_threshold(m, n)?;
    if public_keys.len() != n {
        return Err(BtcError::KeyCountMismatch {
            expected: n,
            actual: public_keys.len(),
        });
    }
    let limit = match script_type {
        MultisigScriptType::Legacy => MAX_LEGACY_KEYS,
        _ => MAX_KEYS,
    };
    if n > limit {
        return Err(BtcError::UnsupportedScriptType(format!(
            "{script_type} multisig supports at most {limit} keys, got {n}"
        )));
    }

    let mut keys: Vec<PublicKey> = Vec::with_capacity(n);
    for (i, bytes) in public_keys.iter().enumerate() {
        let pk = PublicKey::from_slice(bytes)
            .map_err(|e| BtcError::InvalidKey(format!("public key {i}: {e}")))?;
        if script_type != MultisigScriptType::Legacy && !pk.compressed {
            return Err(BtcError::InvalidKey(format!(
                "public key {i}: {script_type} multisig needs compressed keys"
            )));
        }
        if keys.iter().any(|k| k.inner == pk.inner) {
            return Err(BtcError::InvalidKey(format!("public key {i} is a duplicate")));
        }
        keys.push(pk);
    }

    let net = ctx.network().to_bitcoin_network();
    let (script, address, spend_info) = match script_type {
        MultisigScriptType::Legacy => {
            let script = build_redeem_script(&keys, m, n)?;
            if script.len() > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(BtcError::UnsupportedScriptType(format!(
                    "redeem script is {} bytes, p2sh allows at most {MAX_SCRIPT_ELEMENT_SIZE}; use fewer or compressed keys",
                    script.len()
                )));
            }
            let address = Address::p2sh(&script, net)
                .map_err(|e| BtcError::TransactionBuild(format!("redeem script: {e}")))?;
            (script, address, None)
        }
        MultisigScriptType::Segwit => {
            let script = build_redeem_script(&keys, m, n)?;
            let address = Address::p2wsh(&script, net);
            (script, address, None)
        }
        MultisigScriptType::TaprootScriptPath => {
            let script = build_tapscript_leaf(&keys, m)?;
            let internal = XOnlyPublicKey::from_slice(&NUMS_INTERNAL_KEY)
                .map_err(|e| BtcError::InvalidKey(format!("internal key: {e}")))?;
            let info = TaprootBuilder::new()
                .add_leaf(0, script.clone())
                .map_err(|e| BtcError::TransactionBuild(format!("taproot tree: {e}")))?
                .finalize(ctx.secp(), internal)
                .map_err(|_| BtcError::TransactionBuild("taproot tree is incomplete".into()))?;
            let address = Address::p2tr_tweaked(info.output_key(), net);
            (script, address, Some(info))
        }
    };

    debug!(m, n, %script_type, network = %ctx.network(), "created multisig wallet");

    Ok(MultisigWallet {
        address: address.to_string(),
        script,
        public_keys: keys,
        threshold: m,
        script_type,
        network: ctx.network(),
        spend_info,
    })
}

/// Lifecycle of a multisig spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftState {
    Unsigned,
    /// Number of distinct signers on the least-signed input.
    PartiallySigned(usize),
    /// Every input has enough signatures; not yet assembled.
    Complete,
    Finalized { txid: String, raw_hex: String },
}

impl fmt::Display for DraftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DraftState::Unsigned => write!(f, "unsigned"),
            DraftState::PartiallySigned(k) => write!(f, "partially signed ({k})"),
            DraftState::Complete => write!(f, "complete"),
            DraftState::Finalized { txid, .. } => write!(f, "finalized ({txid})"),
        }
    }
}

/// A transaction spending from a multisig wallet, collecting signatures.
#[derive(Debug, Clone)]
pub struct MultisigDraft {
    wallet: MultisigWallet,
    tx: Transaction,
    prevouts: Vec<TxOut>,
    /// Per input: signer index into the wallet keys → signature bytes.
    signatures: Vec<BTreeMap<usize, Vec<u8>>>,
    state: DraftState,
    fee_sat: u64,
}

/// Build a draft spending `utxos` of `wallet` to `outputs`.
///
/// The fee is whatever the inputs leave over; no change output is added.
pub fn create_draft(
    ctx: &BtcContext,
    wallet: &MultisigWallet,
    utxos: &[Utxo],
    outputs: &[Payment],
) -> Result<MultisigDraft, BtcError> {
    if wallet.network() != ctx.network() {
        return Err(BtcError::InvalidNetwork(format!(
            "wallet is on {}, context is on {}",
            wallet.network(),
            ctx.network()
        )));
    }
    if utxos.is_empty() {
        return Err(BtcError::TransactionBuild("no inputs supplied".into()));
    }
    if outputs.is_empty() {
        return Err(BtcError::TransactionBuild("no outputs requested".into()));
    }

    let locking = wallet.script_pubkey();
    let mut inputs = Vec::with_capacity(utxos.len());
    let mut prevouts = Vec::with_capacity(utxos.len());
    for utxo in utxos {
        if utxo.script_pubkey != locking.as_bytes() {
            return Err(BtcError::TransactionBuild(format!(
                "utxo {}:{} is not locked to {}",
                utxo.txid,
                utxo.vout,
                wallet.address()
            )));
        }
        inputs.push(TxIn {
            previous_output: utxo.outpoint()?,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        });
        prevouts.push(utxo.txout());
    }

    let mut tx_outputs = Vec::with_capacity(outputs.len());
    for payment in outputs {
        if payment.amount_sat == 0 {
            return Err(BtcError::InvalidAmount(format!(
                "payment to {} has zero amount",
                payment.address
            )));
        }
        tx_outputs.push(TxOut {
            value: Amount::from_sat(payment.amount_sat),
            script_pubkey: address::script_pubkey_for(&payment.address, ctx.network())?,
        });
    }

    let total_in: u64 = utxos.iter().map(|u| u.amount_sat).sum();
    let total_out: u64 = outputs.iter().map(|p| p.amount_sat).sum();
    if total_out > total_in {
        return Err(BtcError::InsufficientFunds {
            available: total_in,
            required: total_out,
        });
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: tx_outputs,
    };
    let fee_sat = total_in - total_out;
    info!(
        inputs = tx.input.len(),
        outputs = tx.output.len(),
        fee_sat,
        address = wallet.address(),
        "created multisig draft"
    );

    Ok(MultisigDraft {
        wallet: wallet.clone(),
        signatures: vec![BTreeMap::new(); tx.input.len()],
        tx,
        prevouts,
        state: DraftState::Unsigned,
        fee_sat,
    })
}

impl MultisigDraft {
    pub fn state(&self) -> &DraftState {
        &self.state
    }

    pub fn wallet(&self) -> &MultisigWallet {
        &self.wallet
    }

    pub fn fee_sat(&self) -> u64 {
        self.fee_sat
    }

    pub fn required_signatures(&self) -> usize {
        self.wallet.threshold
    }

    pub fn input_count(&self) -> usize {
        self.tx.input.len()
    }

    /// Distinct signers recorded on `input_index`.
    pub fn signature_count(&self, input_index: usize) -> usize {
        self.signatures.get(input_index).map_or(0, BTreeMap::len)
    }

    /// The transaction as it stands: unsigned until finalized.
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Add one signature on `input_index`.
    ///
    /// The draft is left untouched when any check fails. Once every input has
    /// at least m signers the transaction is assembled and the draft moves to
    /// `Finalized`.
    pub fn sign(
        &mut self,
        ctx: &BtcContext,
        key: &KeyPair,
        input_index: usize,
    ) -> Result<&DraftState, BtcError> {
        if let DraftState::Finalized { .. } = self.state {
            return Err(BtcError::InvalidDraftState("draft is already finalized".into()));
        }
        if input_index >= self.tx.input.len() {
            return Err(BtcError::Signing(format!(
                "input {input_index} out of range ({} inputs)",
                self.tx.input.len()
            )));
        }
        let signer = self.wallet.signer_index(key.public_key()).ok_or_else(|| {
            BtcError::Signing(format!("input {input_index}: key is not a member of this wallet"))
        })?;
        if self.signatures[input_index].contains_key(&signer) {
            return Err(BtcError::Signing(format!(
                "input {input_index}: key {signer} has already signed"
            )));
        }

        let signature = self.signature_for(ctx, key, input_index)?;
        let mut signatures = self.signatures.clone();
        signatures[input_index].insert(signer, signature);

        let next = self.next_state(&signatures);
        if next == DraftState::Complete {
            let tx = self.assemble(&signatures)?;
            let txid = tx.compute_txid().to_string();
            let raw_hex = serialize_hex(&tx);
            info!(%txid, "multisig draft finalized");
            self.tx = tx;
            self.signatures = signatures;
            self.state = DraftState::Finalized { txid, raw_hex };
        } else {
            debug!(input_index, signer, state = %next, "multisig signature recorded");
            self.signatures = signatures;
            self.state = next;
        }
        Ok(&self.state)
    }

    /// Sign every input with `key`.
    pub fn sign_all_inputs(&mut self, ctx: &BtcContext, key: &KeyPair) -> Result<&DraftState, BtcError> {
        for input_index in 0..self.tx.input.len() {
            self.sign(ctx, key, input_index)?;
        }
        Ok(&self.state)
    }

    /// The broadcastable transaction, available once finalized.
    pub fn signed_transaction(&self) -> Result<SignedTransaction, BtcError> {
        match self.state {
            DraftState::Finalized { .. } => Ok(SignedTransaction::from_tx(&self.tx, self.fee_sat)),
            ref other => Err(BtcError::InvalidDraftState(format!(
                "draft is {other}, not finalized"
            ))),
        }
    }

    fn next_state(&self, signatures: &[BTreeMap<usize, Vec<u8>>]) -> DraftState {
        let total: usize = signatures.iter().map(BTreeMap::len).sum();
        let least = signatures.iter().map(BTreeMap::len).min().unwrap_or(0);
        if total == 0 {
            DraftState::Unsigned
        } else if least >= self.wallet.threshold {
            DraftState::Complete
        } else {
            DraftState::PartiallySigned(least)
        }
    }

    fn signature_for(&self, ctx: &BtcContext, key: &KeyPair, input_index: usize) -> Result<Vec<u8>, BtcError> {
        let secp = ctx.secp();
        let secret = key.secret_key();
        let script = &self.wallet.script;
        let prevout = &self.prevouts[input_index];
        let mut cache = SighashCache::new(&self.tx);

        match self.wallet.script_type {
            MultisigScriptType::Legacy => {
                let sighash = cache
                    .legacy_signature_hash(input_index, script, EcdsaSighashType::All.to_u32())
                    .map_err(|e| BtcError::Signing(format!("input {input_index}: {e}")))?;
                let sig = secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), &secret);
                Ok(ecdsa::Signature::sighash_all(sig).to_vec())
            }
            MultisigScriptType::Segwit => {
                let sighash = cache
                    .p2wsh_signature_hash(input_index, script, prevout.value, EcdsaSighashType::All)
                    .map_err(|e| BtcError::Signing(format!("input {input_index}: {e}")))?;
                let sig = secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), &secret);
                Ok(ecdsa::Signature::sighash_all(sig).to_vec())
            }
            MultisigScriptType::TaprootScriptPath => {
                let leaf_hash = TapLeafHash::from_script(script, LeafVersion::TapScript);
                let sighash = cache
                    .taproot_script_spend_signature_hash(
                        input_index,
                        &Prevouts::All(self.prevouts.as_slice()),
                        leaf_hash,
                        TapSighashType::Default,
                    )
                    .map_err(|e| BtcError::Signing(format!("input {input_index}: {e}")))?;
                let keypair = Keypair::from_secret_key(secp, &secret);
                let sig = secp.sign_schnorr(&Message::from_digest(sighash.to_byte_array()), &keypair);
                Ok(taproot::Signature {
                    signature: sig,
                    sighash_type: TapSighashType::Default,
                }
                .to_vec())
            }
        }
    }

    /// Put the collected signatures into script_sig / witness of each input.
    fn assemble(&self, signatures: &[BTreeMap<usize, Vec<u8>>]) -> Result<Transaction, BtcError> {
        let m = self.wallet.threshold;
        let script = &self.wallet.script;
        let mut tx = self.tx.clone();

        for (input_index, (input, sigs)) in tx.input.iter_mut().zip(signatures).enumerate() {
            // BTreeMap iterates in key order, which CHECKMULTISIG requires.
            let chosen: Vec<(usize, &Vec<u8>)> = sigs.iter().take(m).map(|(i, s)| (*i, s)).collect();
            if chosen.len() < m {
                return Err(BtcError::InvalidDraftState(format!(
                    "input {input_index} has {} of {m} signatures",
                    chosen.len()
                )));
            }

            match self.wallet.script_type {
                MultisigScriptType::Legacy => {
                    let mut builder = Builder::new().push_opcode(OP_PUSHBYTES_0);
                    for (_, sig) in &chosen {
                        builder = builder.push_slice(push_bytes(sig.to_vec())?);
                    }
                    input.script_sig = builder.push_slice(push_bytes(script.to_bytes())?).into_script();
                }
                MultisigScriptType::Segwit => {
                    let mut witness = Witness::new();
                    witness.push(Vec::<u8>::new());
                    for (_, sig) in &chosen {
                        witness.push(sig.as_slice());
                    }
                    witness.push(script.as_bytes());
                    input.witness = witness;
                }
                MultisigScriptType::TaprootScriptPath => {
                    let control_block = self.wallet.control_block().ok_or_else(|| {
                        BtcError::TransactionBuild("wallet has no taproot spend info".into())
                    })?;
                    // The first key's signature must end up on top of the stack,
                    // so signatures are pushed in reverse key order.
                    let mut witness = Witness::new();
                    for key_index in (0..self.wallet.total_keys()).rev() {
                        match chosen.iter().find(|(i, _)| *i == key_index) {
                            Some((_, sig)) => witness.push(sig.as_slice()),
                            None => witness.push(Vec::<u8>::new()),
                        }
                    }
                    witness.push(script.as_bytes());
                    witness.push(control_block);
                    input.witness = witness;
                }
            }
        }
        Ok(tx)
    }
}

/// Closed-form fee estimate for spending a multisig wallet.
///
/// Per-input costs assume 73-byte ECDSA and 65-byte Schnorr signatures and
/// 34 bytes per pushed key. The script path pays for its control block, one
/// empty slot per non-signer and 8 bytes per leaf key, which keeps it below
/// both ECDSA variants for every m and n.
pub fn estimate_fee(
    num_inputs: usize,
    num_outputs: usize,
    m: usize,
    n: usize,
    script_type: MultisigScriptType,
    fee_rate_sat_vbyte: u64,
) -> u64 {
    let (m, n) = (m as u64, n as u64);
    let input_vbytes = match script_type {
        MultisigScriptType::Legacy => 41 + 4 + 73 * m + 34 * n,
        MultisigScriptType::Segwit => 41 + (8 + 73 * m + 34 * n).div_ceil(4),
        MultisigScriptType::TaprootScriptPath => 41 + (34 + 65 * m + n.saturating_sub(m) + 8 * n).div_ceil(4),
    };
    let vsize = TX_OVERHEAD_VBYTES + num_inputs as u64 * input_vbytes + num_outputs as u64 * 43;
    vsize * fee_rate_sat_vbyte
}
