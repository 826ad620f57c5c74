//! Cross-crate integration tests exercising the full pipeline:
//! mnemonic -> derive key -> build and sign -> inspect the wire bytes.
//!
//! These go through the public APIs of wallet_core and chain_btc only, to
//! catch regressions at crate boundaries.

use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::Transaction;
use chain_btc::address::{self, ScriptType};
use chain_btc::inscription::{self, Badge, Inscription};
use chain_btc::multisig::{self, DraftState, MultisigScriptType};
use chain_btc::transaction::{self, Payment};
use chain_btc::utxo::Utxo;
use chain_btc::{keys, taproot, BtcContext, BtcError, BtcNetwork};
use wallet_core::*;

const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn signet_wallet() -> HdWallet {
    generate_wallet(Some(TEST_MNEMONIC), "", BtcNetwork::Signet).unwrap()
}

fn funding(address: &str, seed: u8, amount_sat: u64) -> Utxo {
    let script = address::script_pubkey_for(address, BtcNetwork::Signet).unwrap();
    let mut utxo = Utxo::new(format!("{seed:02x}").repeat(32), 0, amount_sat, script.to_bytes());
    utxo.address = Some(address.to_string());
    utxo
}

fn decode(hex: &str) -> Transaction {
    deserialize_hex(hex).unwrap()
}

// ─── HD: mnemonic -> derive -> validate ────────────────────────────

#[test]
fn derived_test_addresses_are_distinct_and_valid() {
    let ctx = BtcContext::new(BtcNetwork::Testnet);
    let wallet = generate_wallet(Some(TEST_MNEMONIC), "", BtcNetwork::Testnet).unwrap();

    let first = derive_address(&ctx, &wallet, "m/44'/1'/0'/0/0", ScriptType::P2wpkh).unwrap();
    let second = derive_address(&ctx, &wallet, "m/44'/1'/0'/0/1", ScriptType::P2wpkh).unwrap();
    assert_ne!(first.address, second.address);
    for derived in [&first, &second] {
        let info = address::validate(&derived.address, true).unwrap();
        assert!(info.is_test_network());
        assert_eq!(info.script_type, ScriptType::P2wpkh);
    }
}

#[test]
fn fresh_wallet_round_trips_through_its_mnemonic() {
    let ctx = BtcContext::signet();
    let fresh = generate_wallet(None, "", BtcNetwork::Signet).unwrap();
    assert!(validate_mnemonic(fresh.mnemonic()).is_ok());

    let restored = generate_wallet(Some(fresh.mnemonic()), "", BtcNetwork::Signet).unwrap();
    let a = derive_batch(&ctx, &fresh, 3, 0, 0, ScriptType::P2tr).unwrap();
    let b = derive_batch(&ctx, &restored, 3, 0, 0, ScriptType::P2tr).unwrap();
    let addrs = |v: &[DerivedAddress]| v.iter().map(|d| d.address.clone()).collect::<Vec<_>>();
    assert_eq!(addrs(&a), addrs(&b));
}

// ─── Single key: derive -> build -> sign ───────────────────────────

#[test]
fn p2wpkh_spend_from_derived_key() {
    let ctx = BtcContext::signet();
    let wallet = signet_wallet();
    let sender = derive_address(&ctx, &wallet, "m/84'/1'/0'/0/0", ScriptType::P2wpkh).unwrap();
    let change = derive_address(&ctx, &wallet, "m/84'/1'/0'/1/0", ScriptType::P2wpkh).unwrap();
    let recipient = derive_address(&ctx, &wallet, "m/84'/1'/0'/0/1", ScriptType::P2wpkh).unwrap();
    let utxos = vec![funding(&sender.address, 0x11, 100_000)];

    let unsigned = transaction::build(
        &ctx,
        &sender.address,
        &recipient.address,
        40_000,
        2,
        &utxos,
        Some(&change.address),
    )
    .unwrap();
    let signed = transaction::sign(&ctx, &unsigned, &sender.key_pair(&ctx).unwrap()).unwrap();

    let tx = decode(&signed.hex);
    assert_eq!(tx.compute_txid().to_string(), signed.txid);
    assert_eq!(tx.input[0].witness.len(), 2);
    assert_eq!(tx.output[0].value.to_sat(), 40_000);
    assert_eq!(
        tx.output[1].script_pubkey,
        address::script_pubkey_for(&change.address, BtcNetwork::Signet).unwrap()
    );
    let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
    assert_eq!(100_000 - total_out, signed.fee_sat);
}

#[test]
fn spending_with_the_wrong_derived_key_fails() {
    let ctx = BtcContext::signet();
    let wallet = signet_wallet();
    let sender = derive_address(&ctx, &wallet, "m/84'/1'/0'/0/0", ScriptType::P2wpkh).unwrap();
    let other = derive_address(&ctx, &wallet, "m/84'/1'/0'/0/9", ScriptType::P2wpkh).unwrap();
    let utxos = vec![funding(&sender.address, 0x12, 100_000)];

    let unsigned =
        transaction::build(&ctx, &sender.address, &other.address, 20_000, 1, &utxos, None).unwrap();
    assert!(transaction::sign(&ctx, &unsigned, &other.key_pair(&ctx).unwrap()).is_err());
}

#[test]
fn data_carrier_limits() {
    let ctx = BtcContext::signet();
    let wallet = signet_wallet();
    let sender = derive_address(&ctx, &wallet, "m/84'/1'/0'/0/2", ScriptType::P2wpkh).unwrap();
    let utxos = vec![funding(&sender.address, 0x13, 50_000)];

    let ok = transaction::build_data_carrier(&ctx, &[b'x'; 80], &sender.address, &utxos, 1).unwrap();
    assert!(ok.tx.output.iter().any(|o| o.script_pubkey.is_op_return()));

    let too_big = transaction::build_data_carrier(&ctx, &[b'x'; 81], &sender.address, &utxos, 1);
    assert!(matches!(too_big, Err(BtcError::PayloadTooLarge { size: 81, max: 80 })));
}

#[test]
fn signed_messages_verify_with_derived_keys() {
    let ctx = BtcContext::signet();
    let wallet = signet_wallet();
    let derived = derive_address(&ctx, &wallet, "m/84'/1'/0'/0/0", ScriptType::P2wpkh).unwrap();
    let sig = keys::sign_message(&ctx, b"proof of funds", &derived.private_key, true).unwrap();
    assert!(keys::verify_message(&ctx, b"proof of funds", &sig, &derived.public_key).unwrap());
    assert!(!keys::verify_message(&ctx, b"proof of fun", &sig, &derived.public_key).unwrap());
}

// ─── Multisig: create -> draft -> sign to threshold ────────────────

#[test]
fn two_of_three_segwit_multisig_with_derived_keys() {
    let ctx = BtcContext::signet();
    let wallet = signet_wallet();
    let signers = derive_batch(&ctx, &wallet, 3, 0, 0, ScriptType::P2wpkh).unwrap();
    let public_keys: Vec<Vec<u8>> = signers.iter().map(|d| d.public_key.to_vec()).collect();

    let ms = multisig::create_wallet(&ctx, &public_keys, 2, 3, MultisigScriptType::Segwit).unwrap();
    assert_eq!(address::classify(ms.address()), ScriptType::P2wsh);

    let utxos = vec![funding(ms.address(), 0x21, 90_000)];
    let outputs = vec![Payment::new(signers[0].address.clone(), 85_000)];
    let mut draft = multisig::create_draft(&ctx, &ms, &utxos, &outputs).unwrap();
    assert_eq!(draft.fee_sat(), 5_000);

    let first = signers[0].key_pair(&ctx).unwrap();
    assert_eq!(*draft.sign(&ctx, &first, 0).unwrap(), DraftState::PartiallySigned(1));
    assert!(draft.signed_transaction().is_err());

    let third = signers[2].key_pair(&ctx).unwrap();
    assert!(matches!(draft.sign(&ctx, &third, 0).unwrap(), DraftState::Finalized { .. }));

    let signed = draft.signed_transaction().unwrap();
    let tx = decode(&signed.hex);
    // empty dummy, two signatures, witness script
    assert_eq!(tx.input[0].witness.len(), 4);
    assert_eq!(tx.input[0].witness.nth(3).unwrap(), ms.script().as_bytes());
}

#[test]
fn multisig_rejects_outsiders_and_overspend() {
    let ctx = BtcContext::signet();
    let wallet = signet_wallet();
    let signers = derive_batch(&ctx, &wallet, 2, 0, 0, ScriptType::P2wpkh).unwrap();
    let public_keys: Vec<Vec<u8>> = signers.iter().map(|d| d.public_key.to_vec()).collect();
    let ms = multisig::create_wallet(&ctx, &public_keys, 2, 2, MultisigScriptType::Legacy).unwrap();

    let utxos = vec![funding(ms.address(), 0x22, 10_000)];
    let overspend = vec![Payment::new(signers[0].address.clone(), 20_000)];
    assert!(matches!(
        multisig::create_draft(&ctx, &ms, &utxos, &overspend),
        Err(BtcError::InsufficientFunds { .. })
    ));

    let outputs = vec![Payment::new(signers[0].address.clone(), 9_000)];
    let mut draft = multisig::create_draft(&ctx, &ms, &utxos, &outputs).unwrap();
    let outsider = derive_address(&ctx, &wallet, "m/84'/1'/0'/0/7", ScriptType::P2wpkh)
        .unwrap()
        .key_pair(&ctx)
        .unwrap();
    assert!(draft.sign(&ctx, &outsider, 0).is_err());
    assert_eq!(*draft.state(), DraftState::Unsigned);
}

// ─── Taproot: derive -> spend by key path ──────────────────────────

#[test]
fn taproot_spend_from_bip86_key() {
    let ctx = BtcContext::signet();
    let wallet = signet_wallet();
    let derived = derive_address(&ctx, &wallet, "m/86'/1'/0'/0/0", ScriptType::P2tr).unwrap();
    let owner = taproot::create_address(&ctx, Some(&derived.private_key)).unwrap();
    assert_eq!(owner.address(), derived.address);

    let utxos = vec![funding(owner.address(), 0x31, 60_000)];
    let outputs = vec![Payment::new(owner.address(), 25_000)];
    let signed = taproot::create_transaction(&ctx, &owner, &utxos, &outputs, 2, None).unwrap();

    let tx = decode(&signed.hex);
    assert_eq!(tx.input[0].witness.len(), 1);
    assert_eq!(tx.input[0].witness.nth(0).unwrap().len(), 64);
}

// ─── Inscription: commit -> reveal ─────────────────────────────────

#[test]
fn badge_inscription_commit_and_reveal() {
    let ctx = BtcContext::signet();
    let wallet = signet_wallet();
    let derived = derive_address(&ctx, &wallet, "m/84'/1'/0'/0/5", ScriptType::P2wpkh).unwrap();
    let key = derived.key_pair(&ctx).unwrap();
    let utxos = vec![funding(&derived.address, 0x41, 200_000)];

    let badge = Badge {
        name: "Script Path Explorer".into(),
        description: "Spent a taproot leaf".into(),
        recipient: derived.address.clone(),
        issued_at: "2026-01-01T00:00:00Z".into(),
        attributes: Default::default(),
    };
    let minted = inscription::mint_badge(&ctx, &badge, &key, &utxos, 3, &derived.address).unwrap();

    let reveal = decode(&minted.reveal.transaction.hex);
    assert_eq!(
        minted.inscription_id(),
        format!("{}:0", reveal.compute_txid())
    );
    assert_eq!(reveal.input[0].previous_output.txid.to_string(), minted.commit.transaction.txid);

    let carried = inscription::extract_from_reveal(&reveal).unwrap();
    assert_eq!(carried.content_type, "application/json");
    let decoded: Badge = serde_json::from_slice(&carried.content).unwrap();
    assert_eq!(decoded, badge);
}

#[test]
fn inscription_rejects_unfunded_commit() {
    let ctx = BtcContext::signet();
    let wallet = signet_wallet();
    let derived = derive_address(&ctx, &wallet, "m/84'/1'/0'/0/6", ScriptType::P2wpkh).unwrap();
    let key = derived.key_pair(&ctx).unwrap();
    let utxos = vec![funding(&derived.address, 0x42, 1_000)];

    let content = Inscription::new("text/plain", b"hello".to_vec());
    assert!(matches!(
        inscription::create_commit(&ctx, &key, &content, &utxos, 2),
        Err(BtcError::InsufficientFunds { .. })
    ));
}
