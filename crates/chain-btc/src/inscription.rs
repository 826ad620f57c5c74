//! Two-phase commit/reveal inscriptions.
//!
//! The commit transaction pays into a taproot output whose single leaf is
//! `<x-only key> OP_CHECKSIG` followed by the inscription envelope:
//!
//! ```text
//! OP_FALSE OP_IF "ord" 1 <content-type> OP_0 <content chunks> OP_ENDIF
//! ```
//!
//! The reveal transaction spends that output by script path, which puts the
//! envelope in the witness.

use std::collections::BTreeMap;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_ENDIF, OP_IF, OP_PUSHBYTES_0};
use bitcoin::script::{Builder, Instruction};
use bitcoin::secp256k1::{Keypair, Message, XOnlyPublicKey};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{LeafVersion, TapLeafHash, TaprootBuilder, TaprootSpendInfo};
use bitcoin::transaction::Version;
use bitcoin::{
    taproot, Address, Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::address;
use crate::context::BtcContext;
use crate::error::BtcError;
use crate::keys::{require_compressed, KeyPair};
use crate::transaction::{self, push_bytes, SignedTransaction, DUST_LIMIT};
use crate::utxo::Utxo;

/// Protocol marker pushed right after `OP_FALSE OP_IF`.
pub const PROTOCOL_MARKER: &[u8] = b"ord";

/// Tag preceding the content-type push.
const CONTENT_TYPE_TAG: [u8; 1] = [1];

/// Largest single data push allowed by script.
pub const MAX_CHUNK_BYTES: usize = 520;

/// Keeps the reveal transaction under the standard weight limit.
pub const MAX_CONTENT_BYTES: usize = 390_000;

/// Value left on the inscribed output.
pub const POSTAGE_SAT: u64 = 10_000;

/// Reveal transaction without its envelope: input, signature, control block
/// and one output.
pub const REVEAL_BASE_VBYTES: u64 = 150;

/// Marker, tags and push opcodes around the content.
pub const ENVELOPE_OVERHEAD_VBYTES: u64 = 50;

/// Content to inscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inscription {
    pub content_type: String,
    pub content: Vec<u8>,
}

impl Inscription {
    pub fn new(content_type: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    fn validate(&self) -> Result<(), BtcError> {
        if self.content_type.is_empty() {
            return Err(BtcError::InvalidInscription("content type is empty".into()));
        }
        if self.content_type.len() > MAX_CHUNK_BYTES {
            return Err(BtcError::InvalidInscription("content type is too long".into()));
        }
        if self.content.is_empty() {
            return Err(BtcError::InvalidInscription("content is empty".into()));
        }
        if self.content.len() > MAX_CONTENT_BYTES {
            return Err(BtcError::PayloadTooLarge {
                size: self.content.len(),
                max: MAX_CONTENT_BYTES,
            });
        }
        Ok(())
    }
}

/// Append the envelope for `inscription` to `builder`.
fn push_envelope(mut builder: Builder, inscription: &Inscription) -> Result<Builder, BtcError> {
    builder = builder
        .push_opcode(OP_PUSHBYTES_0)
        .push_opcode(OP_IF)
        .push_slice(push_bytes(PROTOCOL_MARKER.to_vec())?)
        .push_slice(push_bytes(CONTENT_TYPE_TAG.to_vec())?)
        .push_slice(push_bytes(inscription.content_type.as_bytes().to_vec())?)
        .push_opcode(OP_PUSHBYTES_0);
    for chunk in inscription.content.chunks(MAX_CHUNK_BYTES) {
        builder = builder.push_slice(push_bytes(chunk.to_vec())?);
    }
    Ok(builder.push_opcode(OP_ENDIF))
}

/// The bare envelope script.
pub fn build_envelope(inscription: &Inscription) -> Result<ScriptBuf, BtcError> {
    inscription.validate()?;
    Ok(push_envelope(Builder::new(), inscription)?.into_script())
}

/// `<x-only key> OP_CHECKSIG` followed by the envelope.
pub fn build_reveal_script(key: &XOnlyPublicKey, inscription: &Inscription) -> Result<ScriptBuf, BtcError> {
    inscription.validate()?;
    let builder = Builder::new().push_x_only_key(key).push_opcode(OP_CHECKSIG);
    Ok(push_envelope(builder, inscription)?.into_script())
}

/// Find an envelope in `script` and decode it.
pub fn parse_envelope(script: &Script) -> Option<Inscription> {
    let instructions: Vec<Instruction> = script.instructions().collect::<Result<_, _>>().ok()?;
    let start = instructions.windows(3).position(|w| {
        matches!(
            (&w[0], &w[1], &w[2]),
            (Instruction::PushBytes(f), Instruction::Op(op), Instruction::PushBytes(marker))
                if f.is_empty() && *op == OP_IF && marker.as_bytes() == PROTOCOL_MARKER
        )
    })?;

    let mut rest = instructions[start + 3..].iter();
    let mut content_type = None;
    let mut content = Vec::new();
    while let Some(instruction) = rest.next() {
        match instruction {
            Instruction::PushBytes(tag) if tag.as_bytes() == &CONTENT_TYPE_TAG[..] => {
                if let Some(Instruction::PushBytes(value)) = rest.next() {
                    content_type = Some(String::from_utf8(value.as_bytes().to_vec()).ok()?);
                }
            }
            Instruction::PushBytes(separator) if separator.is_empty() => {
                for body in rest.by_ref() {
                    match body {
                        Instruction::PushBytes(chunk) => content.extend_from_slice(chunk.as_bytes()),
                        Instruction::Op(op) if *op == OP_ENDIF => break,
                        Instruction::Op(_) => return None,
                    }
                }
                break;
            }
            _ => return None,
        }
    }

    Some(Inscription {
        content_type: content_type?,
        content,
    })
}

/// Decode the inscription revealed by the first input of `tx`.
pub fn extract_from_reveal(tx: &Transaction) -> Option<Inscription> {
    let leaf = tx.input.first()?.witness.taproot_leaf_script()?;
    if leaf.version != LeafVersion::TapScript {
        return None;
    }
    parse_envelope(leaf.script)
}

/// Fee budgeted for the reveal transaction.
pub fn estimate_fee(content_len: usize, fee_rate_sat_vbyte: u64) -> u64 {
    (REVEAL_BASE_VBYTES + ENVELOPE_OVERHEAD_VBYTES + content_len as u64) * fee_rate_sat_vbyte
}

/// Result of the commit phase; everything the reveal needs.
#[derive(Debug, Clone)]
pub struct InscriptionCommit {
    pub transaction: SignedTransaction,
    pub commit_address: String,
    pub commit_vout: u32,
    pub commit_value_sat: u64,
    pub inscription: Inscription,
    reveal_script: ScriptBuf,
    spend_info: TaprootSpendInfo,
    internal_key: XOnlyPublicKey,
}

impl InscriptionCommit {
    pub fn reveal_script(&self) -> &ScriptBuf {
        &self.reveal_script
    }
}

/// Result of the reveal phase.
#[derive(Debug, Clone)]
pub struct InscriptionReveal {
    pub transaction: SignedTransaction,
    /// `"{reveal_txid}:0"`.
    pub inscription_id: String,
}

/// Build and sign the commit transaction.
///
/// `utxos` must be locked to `key`; change returns to the key's address.
pub fn create_commit(
    ctx: &BtcContext,
    key: &KeyPair,
    inscription: &Inscription,
    utxos: &[Utxo],
    fee_rate_sat_vbyte: u64,
) -> Result<InscriptionCommit, BtcError> {
    let (internal_key, _parity) = require_compressed(*key.public_key())?.0.x_only_public_key();
    let reveal_script = build_reveal_script(&internal_key, inscription)?;

    let spend_info = TaprootBuilder::new()
        .add_leaf(0, reveal_script.clone())
        .map_err(|e| BtcError::TransactionBuild(format!("taproot tree: {e}")))?
        .finalize(ctx.secp(), internal_key)
        .map_err(|_| BtcError::TransactionBuild("taproot tree is incomplete".into()))?;
    let commit_address = Address::p2tr(
        ctx.secp(),
        internal_key,
        spend_info.merkle_root(),
        ctx.network().to_bitcoin_network(),
    );

    let commit_value_sat = POSTAGE_SAT + estimate_fee(inscription.content.len(), fee_rate_sat_vbyte);
    let outputs = vec![TxOut {
        value: Amount::from_sat(commit_value_sat),
        script_pubkey: commit_address.script_pubkey(),
    }];
    let change = address::script_pubkey_for(key.address(), ctx.network())?;
    let unsigned = transaction::fund_outputs(outputs, fee_rate_sat_vbyte, utxos, change)?;
    let signed = transaction::sign(ctx, &unsigned, key)?;

    info!(
        txid = %signed.txid,
        content_type = %inscription.content_type,
        content_len = inscription.content.len(),
        commit_value_sat,
        "inscription commit built"
    );

    Ok(InscriptionCommit {
        transaction: signed,
        commit_address: commit_address.to_string(),
        commit_vout: 0,
        commit_value_sat,
        inscription: inscription.clone(),
        reveal_script,
        spend_info,
        internal_key,
    })
}

/// Spend the commit output by script path, revealing the envelope.
pub fn create_reveal(
    ctx: &BtcContext,
    commit: &InscriptionCommit,
    key: &KeyPair,
    destination: &str,
    fee_rate_sat_vbyte: u64,
) -> Result<InscriptionReveal, BtcError> {
    let (signer_key, _parity) = key.public_key().inner.x_only_public_key();
    if signer_key != commit.internal_key {
        return Err(BtcError::Signing("key does not match the commit's reveal leaf".into()));
    }
    let destination_script = address::script_pubkey_for(destination, ctx.network())?;

    let fee = estimate_fee(commit.inscription.content.len(), fee_rate_sat_vbyte);
    let output_value = commit.commit_value_sat.saturating_sub(fee);
    if output_value <= DUST_LIMIT {
        return Err(BtcError::InsufficientFunds {
            available: commit.commit_value_sat,
            required: fee + DUST_LIMIT + 1,
        });
    }

    let commit_txid: Txid = commit
        .transaction
        .txid
        .parse()
        .map_err(|e| BtcError::TransactionBuild(format!("invalid commit txid: {e}")))?;
    let prevout = TxOut {
        value: Amount::from_sat(commit.commit_value_sat),
        script_pubkey: Address::p2tr(
            ctx.secp(),
            commit.internal_key,
            commit.spend_info.merkle_root(),
            ctx.network().to_bitcoin_network(),
        )
        .script_pubkey(),
    };

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(commit_txid, commit.commit_vout),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(output_value),
            script_pubkey: destination_script,
        }],
    };

    let leaf_hash = TapLeafHash::from_script(&commit.reveal_script, LeafVersion::TapScript);
    let sighash = SighashCache::new(&tx)
        .taproot_script_spend_signature_hash(
            0,
            &Prevouts::All(std::slice::from_ref(&prevout)),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(|e| BtcError::Signing(format!("reveal sighash failed: {e}")))?;
    let keypair = Keypair::from_secret_key(ctx.secp(), &key.secret_key());
    let signature = ctx
        .secp()
        .sign_schnorr(&Message::from_digest(sighash.to_byte_array()), &keypair);

    let control_block = commit
        .spend_info
        .control_block(&(commit.reveal_script.clone(), LeafVersion::TapScript))
        .ok_or_else(|| BtcError::TransactionBuild("reveal leaf missing from taproot tree".into()))?;

    let mut witness = Witness::new();
    witness.push(
        taproot::Signature {
            signature,
            sighash_type: TapSighashType::Default,
        }
        .to_vec(),
    );
    witness.push(commit.reveal_script.as_bytes());
    witness.push(control_block.serialize());
    tx.input[0].witness = witness;

    let signed = SignedTransaction::from_tx(&tx, fee);
    let inscription_id = format!("{}:0", signed.txid);
    info!(%inscription_id, "inscription revealed");

    Ok(InscriptionReveal {
        transaction: signed,
        inscription_id,
    })
}

/// Achievement badge minted as a JSON inscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub name: String,
    pub description: String,
    pub recipient: String,
    pub issued_at: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct MintedBadge {
    pub commit: InscriptionCommit,
    pub reveal: InscriptionReveal,
}

impl MintedBadge {
    pub fn inscription_id(&self) -> &str {
        &self.reveal.inscription_id
    }
}

/// Serialize `badge` to JSON and run both phases.
pub fn mint_badge(
    ctx: &BtcContext,
    badge: &Badge,
    key: &KeyPair,
    utxos: &[Utxo],
    fee_rate_sat_vbyte: u64,
    destination: &str,
) -> Result<MintedBadge, BtcError> {
    let content = serde_json::to_vec(badge)
        .map_err(|e| BtcError::InvalidInscription(format!("badge serialization failed: {e}")))?;
    let inscription = Inscription::new("application/json", content);

    let commit = create_commit(ctx, key, &inscription, utxos, fee_rate_sat_vbyte)?;
    let reveal = create_reveal(ctx, &commit, key, destination, fee_rate_sat_vbyte)?;
    Ok(MintedBadge { commit, reveal })
}

/// Parsed `"<txid>:<index>"` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InscriptionMetadata {
    pub inscription_id: String,
    pub reveal_txid: String,
    pub index: u32,
}

pub fn parse_inscription_id(inscription_id: &str) -> Result<InscriptionMetadata, BtcError> {
    let (txid, index) = inscription_id
        .split_once(':')
        .ok_or_else(|| BtcError::InvalidInscription(format!("malformed id {inscription_id}")))?;
    let txid: Txid = txid
        .parse()
        .map_err(|e| BtcError::InvalidInscription(format!("malformed txid in {inscription_id}: {e}")))?;
    let index: u32 = index
        .parse()
        .map_err(|e| BtcError::InvalidInscription(format!("malformed index in {inscription_id}: {e}")))?;
    Ok(InscriptionMetadata {
        inscription_id: inscription_id.to_string(),
        reveal_txid: txid.to_string(),
        index,
    })
}

/// Checks that the id and the address are well formed for this network.
///
/// Whether the address actually holds the inscription needs an ordinals
/// indexer, which this crate does not talk to.
pub fn verify_ownership(ctx: &BtcContext, inscription_id: &str, address: &str) -> Result<bool, BtcError> {
    parse_inscription_id(inscription_id)?;
    address::validate_for(address, ctx.network())?;
    Ok(true)
}

/// Metadata derivable from the id alone; content lookup needs an indexer.
pub fn get_metadata(inscription_id: &str) -> Result<InscriptionMetadata, BtcError> {
    parse_inscription_id(inscription_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{schnorr, SecretKey};
    use bitcoin::taproot::ControlBlock;

    const DESTINATION: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

    fn ctx() -> BtcContext {
        BtcContext::signet()
    }

    fn key(byte: u8) -> KeyPair {
        KeyPair::from_secret_key(&ctx(), SecretKey::from_slice(&[byte; 32]).unwrap(), true).unwrap()
    }

    fn funding(key: &KeyPair, amount: u64) -> Vec<Utxo> {
        let script = address::script_pubkey_for(key.address(), ctx().network()).unwrap();
        vec![Utxo::new("9f".repeat(32), 0, amount, script.to_bytes())]
    }

    #[test]
    fn envelope_layout() {
        let envelope = build_envelope(&Inscription::new("text/plain", b"hi".to_vec())).unwrap();
        let bytes = envelope.as_bytes();

        let mut expected = vec![0x00, 0x63, 0x03];
        expected.extend_from_slice(b"ord");
        expected.extend_from_slice(&[0x01, 0x01, 0x0a]);
        expected.extend_from_slice(b"text/plain");
        expected.extend_from_slice(&[0x00, 0x02]);
        expected.extend_from_slice(b"hi");
        expected.push(0x68);
        assert_eq!(bytes, expected.as_slice());
    }

    #[test]
    fn large_content_is_chunked() {
        let inscription = Inscription::new("application/octet-stream", vec![7u8; 1_200]);
        let envelope = build_envelope(&inscription).unwrap();
        let pushes: Vec<usize> = envelope
            .instructions()
            .filter_map(|i| match i.unwrap() {
                Instruction::PushBytes(p) if p.len() > 100 => Some(p.len()),
                _ => None,
            })
            .collect();
        assert_eq!(pushes, vec![520, 520, 160]);
        assert_eq!(parse_envelope(&envelope).unwrap(), inscription);
    }

    #[test]
    fn rejects_empty_content() {
        assert!(matches!(
            build_envelope(&Inscription::new("text/plain", Vec::new())),
            Err(BtcError::InvalidInscription(_))
        ));
        assert!(build_envelope(&Inscription::new("", b"x".to_vec())).is_err());
    }

    #[test]
    fn fee_formula() {
        assert_eq!(estimate_fee(0, 1), REVEAL_BASE_VBYTES + ENVELOPE_OVERHEAD_VBYTES);
        assert_eq!(estimate_fee(100, 3), (REVEAL_BASE_VBYTES + ENVELOPE_OVERHEAD_VBYTES + 100) * 3);
    }

    #[test]
    fn commit_and_reveal() {
        let key = key(21);
        let inscription = Inscription::new("text/plain;charset=utf-8", b"hello signet".to_vec());

        let commit = create_commit(&ctx(), &key, &inscription, &funding(&key, 100_000), 2).unwrap();
        assert!(commit.commit_address.starts_with("tb1p"));
        assert_eq!(commit.commit_value_sat, POSTAGE_SAT + estimate_fee(12, 2));

        let commit_tx: Transaction =
            bitcoin::consensus::encode::deserialize_hex(&commit.transaction.hex).unwrap();
        let expected = address::script_pubkey_for(&commit.commit_address, ctx().network()).unwrap();
        assert_eq!(commit_tx.output[0].script_pubkey, expected);
        // the envelope is not visible before the reveal
        assert!(!commit.transaction.hex.contains(&hex::encode(b"hello signet")));

        let reveal = create_reveal(&ctx(), &commit, &key, DESTINATION, 2).unwrap();
        assert_eq!(reveal.inscription_id, format!("{}:0", reveal.transaction.txid));

        let reveal_tx: Transaction =
            bitcoin::consensus::encode::deserialize_hex(&reveal.transaction.hex).unwrap();
        assert_eq!(reveal_tx.input[0].previous_output.txid.to_string(), commit.transaction.txid);
        let witness = &reveal_tx.input[0].witness;
        assert_eq!(witness.len(), 3);
        assert_eq!(witness.nth(0).unwrap().len(), 64);
        assert_eq!(witness.nth(1).unwrap(), commit.reveal_script().as_bytes());
        assert_eq!(witness.nth(2).unwrap()[0] & 0xfe, 0xc0);
        assert_eq!(extract_from_reveal(&reveal_tx).unwrap(), inscription);

        let prevout = &commit_tx.output[commit.commit_vout as usize];
        let output_key = XOnlyPublicKey::from_slice(&prevout.script_pubkey.as_bytes()[2..]).unwrap();
        let control_block = ControlBlock::decode(witness.nth(2).unwrap()).unwrap();
        assert_eq!(control_block.leaf_version, LeafVersion::TapScript);
        assert!(control_block.verify_taproot_commitment(ctx().secp(), output_key, commit.reveal_script()));

        let leaf_hash = TapLeafHash::from_script(commit.reveal_script(), LeafVersion::TapScript);
        let sighash = SighashCache::new(&reveal_tx)
            .taproot_script_spend_signature_hash(
                0,
                &Prevouts::All(std::slice::from_ref(prevout)),
                leaf_hash,
                TapSighashType::Default,
            )
            .unwrap();
        let sig = schnorr::Signature::from_slice(witness.nth(0).unwrap()).unwrap();
        let (signer, _) = key.public_key().inner.x_only_public_key();
        ctx()
            .secp()
            .verify_schnorr(&sig, &Message::from_digest(sighash.to_byte_array()), &signer)
            .unwrap();
    }

    #[test]
    fn envelope_under_unknown_leaf_version_is_ignored() {
        let key = key(26);
        let inscription = Inscription::new("text/plain", b"versioned".to_vec());
        let commit = create_commit(&ctx(), &key, &inscription, &funding(&key, 100_000), 1).unwrap();
        let reveal = create_reveal(&ctx(), &commit, &key, DESTINATION, 1).unwrap();
        let mut reveal_tx: Transaction =
            bitcoin::consensus::encode::deserialize_hex(&reveal.transaction.hex).unwrap();
        assert!(extract_from_reveal(&reveal_tx).is_some());

        let mut items: Vec<Vec<u8>> = reveal_tx.input[0].witness.iter().map(<[u8]>::to_vec).collect();
        items[2][0] = 0xc2 | (items[2][0] & 0x01);
        reveal_tx.input[0].witness = Witness::from_slice(&items);
        assert!(extract_from_reveal(&reveal_tx).is_none());
    }

    #[test]
    fn reveal_requires_the_commit_key() {
        let owner = key(22);
        let other = key(23);
        let inscription = Inscription::new("text/plain", b"mine".to_vec());
        let commit = create_commit(&ctx(), &owner, &inscription, &funding(&owner, 100_000), 1).unwrap();

        assert!(matches!(
            create_reveal(&ctx(), &commit, &other, DESTINATION, 1),
            Err(BtcError::Signing(_))
        ));
    }

    #[test]
    fn commit_without_funds_fails() {
        let key = key(24);
        let inscription = Inscription::new("text/plain", b"broke".to_vec());
        assert!(matches!(
            create_commit(&ctx(), &key, &inscription, &funding(&key, 1_000), 1),
            Err(BtcError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn mint_badge_inscribes_json() {
        let key = key(25);
        let badge = Badge {
            name: "Script Path".into(),
            description: "Completed the taproot module".into(),
            recipient: DESTINATION.into(),
            issued_at: "2026-01-01".into(),
            attributes: BTreeMap::new(),
        };

        let minted = mint_badge(&ctx(), &badge, &key, &funding(&key, 200_000), 1, DESTINATION).unwrap();
        assert!(minted.inscription_id().ends_with(":0"));
        assert_eq!(minted.commit.inscription.content_type, "application/json");
        let decoded: Badge = serde_json::from_slice(&minted.commit.inscription.content).unwrap();
        assert_eq!(decoded, badge);
    }

    #[test]
    fn metadata_and_ownership_are_structural() {
        let id = format!("{}:0", "ab".repeat(32));
        let meta = get_metadata(&id).unwrap();
        assert_eq!(meta.index, 0);
        assert_eq!(meta.reveal_txid, "ab".repeat(32));

        assert!(verify_ownership(&ctx(), &id, DESTINATION).unwrap());
        assert!(verify_ownership(&ctx(), "nope", DESTINATION).is_err());
        assert!(get_metadata(&format!("{}:x", "ab".repeat(32))).is_err());
    }
}
