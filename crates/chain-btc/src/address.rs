use bitcoin::address::{Address, NetworkUnchecked};
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160, OP_PUSHBYTES_0, OP_PUSHBYTES_20,
    OP_PUSHBYTES_32, OP_PUSHNUM_1,
};
use bitcoin::{PubkeyHash, Script, ScriptBuf, WPubkeyHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::BtcError;
use crate::network::BtcNetwork;

/// Shortest address string worth attempting to decode.
pub const MIN_ADDRESS_LEN: usize = 26;

/// Longest address string worth attempting to decode.
pub const MAX_ADDRESS_LEN: usize = 62;

/// Locking-script families recognised by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
    Unknown,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::P2pkh => "p2pkh",
            ScriptType::P2sh => "p2sh",
            ScriptType::P2wpkh => "p2wpkh",
            ScriptType::P2wsh => "p2wsh",
            ScriptType::P2tr => "p2tr",
            ScriptType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network family an address was encoded for. Testnet and signet share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressNetwork {
    Main,
    Test,
}

impl AddressNetwork {
    pub fn of(network: BtcNetwork) -> Self {
        if network.is_test() {
            AddressNetwork::Test
        } else {
            AddressNetwork::Main
        }
    }
}

/// Why an address was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressValidationError {
    #[error("address too short: {0} characters (min 26)")]
    TooShort(usize),

    #[error("address too long: {0} characters (max 62)")]
    TooLong(usize),

    #[error("malformed address: {0}")]
    Malformed(String),

    #[error("address is for the {found:?} network, expected {expected:?}")]
    WrongNetwork {
        expected: AddressNetwork,
        found: AddressNetwork,
    },

    #[error("locking script matches no recognised script type")]
    UnrecognizedScript,

    #[error("cannot convert {from} address to {to}")]
    UnsupportedConversion { from: ScriptType, to: ScriptType },
}

/// Decoded view of a valid address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub address: String,
    pub script_type: ScriptType,
    pub network: AddressNetwork,
    pub script_pubkey: Vec<u8>,
}

impl AddressInfo {
    pub fn is_test_network(&self) -> bool {
        self.network == AddressNetwork::Test
    }
}

/// Classify a locking script by its fixed length/opcode pattern.
pub fn classify_script(script: &Script) -> ScriptType {
    let b = script.as_bytes();
    match b.len() {
        25 if b[0] == OP_DUP.to_u8()
            && b[1] == OP_HASH160.to_u8()
            && b[2] == OP_PUSHBYTES_20.to_u8()
            && b[23] == OP_EQUALVERIFY.to_u8()
            && b[24] == OP_CHECKSIG.to_u8() =>
        {
            ScriptType::P2pkh
        }
        23 if b[0] == OP_HASH160.to_u8()
            && b[1] == OP_PUSHBYTES_20.to_u8()
            && b[22] == OP_EQUAL.to_u8() =>
        {
            ScriptType::P2sh
        }
        22 if b[0] == OP_PUSHBYTES_0.to_u8() && b[1] == OP_PUSHBYTES_20.to_u8() => {
            ScriptType::P2wpkh
        }
        34 if b[0] == OP_PUSHBYTES_0.to_u8() && b[1] == OP_PUSHBYTES_32.to_u8() => {
            ScriptType::P2wsh
        }
        34 if b[0] == OP_PUSHNUM_1.to_u8() && b[1] == OP_PUSHBYTES_32.to_u8() => {
            ScriptType::P2tr
        }
        _ => ScriptType::Unknown,
    }
}

fn check_length(address: &str) -> Result<(), AddressValidationError> {
    let len = address.len();
    if len < MIN_ADDRESS_LEN {
        return Err(AddressValidationError::TooShort(len));
    }
    if len > MAX_ADDRESS_LEN {
        return Err(AddressValidationError::TooLong(len));
    }
    Ok(())
}

fn decode(address: &str) -> Result<Address<NetworkUnchecked>, AddressValidationError> {
    check_length(address)?;
    address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| AddressValidationError::Malformed(e.to_string()))
}

/// Determine the network family of an address from its prefix.
///
/// Bech32 addresses are inspected by human-readable part, base58 addresses by
/// their version byte after checksum verification.
pub fn network_of(address: &str) -> Result<AddressNetwork, AddressValidationError> {
    check_length(address)?;
    let lower = address.to_ascii_lowercase();
    if lower.starts_with("bc1") {
        return Ok(AddressNetwork::Main);
    }
    if lower.starts_with("tb1") {
        return Ok(AddressNetwork::Test);
    }

    let data = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| AddressValidationError::Malformed(format!("base58check: {e}")))?;
    match data.first() {
        Some(0x00) | Some(0x05) => Ok(AddressNetwork::Main),
        Some(0x6f) | Some(0xc4) => Ok(AddressNetwork::Test),
        Some(v) => Err(AddressValidationError::Malformed(format!(
            "unknown version byte 0x{v:02x}"
        ))),
        None => Err(AddressValidationError::Malformed("empty payload".into())),
    }
}

/// Validate an address, optionally requiring the test-network family.
pub fn validate(
    address: &str,
    require_test_network: bool,
) -> Result<AddressInfo, AddressValidationError> {
    let parsed = decode(address)?;
    let network = network_of(address)?;
    if require_test_network && network != AddressNetwork::Test {
        return Err(AddressValidationError::WrongNetwork {
            expected: AddressNetwork::Test,
            found: network,
        });
    }

    let script = parsed.assume_checked_ref().script_pubkey();
    let script_type = classify_script(&script);
    if script_type == ScriptType::Unknown {
        return Err(AddressValidationError::UnrecognizedScript);
    }

    Ok(AddressInfo {
        address: address.to_string(),
        script_type,
        network,
        script_pubkey: script.into_bytes(),
    })
}

/// Validate an address for exactly the family of `network`.
pub fn validate_for(
    address: &str,
    network: BtcNetwork,
) -> Result<AddressInfo, AddressValidationError> {
    let info = validate(address, false)?;
    let expected = AddressNetwork::of(network);
    if info.network != expected {
        return Err(AddressValidationError::WrongNetwork {
            expected,
            found: info.network,
        });
    }
    Ok(info)
}

/// Classify an address; anything undecodable is `Unknown`.
pub fn classify(address: &str) -> ScriptType {
    match decode(address) {
        Ok(parsed) => classify_script(&parsed.assume_checked_ref().script_pubkey()),
        Err(_) => ScriptType::Unknown,
    }
}

/// Whether two address strings lock to the same script.
pub fn equivalent(a: &str, b: &str) -> Result<bool, AddressValidationError> {
    let sa = decode(a)?.assume_checked().script_pubkey();
    let sb = decode(b)?.assume_checked().script_pubkey();
    Ok(sa == sb)
}

/// Re-wrap the public-key hash of a P2PKH/P2WPKH address as the other type.
pub fn convert(
    address: &str,
    target: ScriptType,
    network: BtcNetwork,
) -> Result<String, AddressValidationError> {
    let info = validate_for(address, network)?;
    if info.script_type == target {
        return Ok(info.address);
    }

    let script = &info.script_pubkey;
    let converted = match (info.script_type, target) {
        (ScriptType::P2pkh, ScriptType::P2wpkh) => {
            let hash = WPubkeyHash::from_slice(&script[3..23])
                .map_err(|e| AddressValidationError::Malformed(e.to_string()))?;
            ScriptBuf::new_p2wpkh(&hash)
        }
        (ScriptType::P2wpkh, ScriptType::P2pkh) => {
            let hash = PubkeyHash::from_slice(&script[2..22])
                .map_err(|e| AddressValidationError::Malformed(e.to_string()))?;
            ScriptBuf::new_p2pkh(&hash)
        }
        (from, to) => return Err(AddressValidationError::UnsupportedConversion { from, to }),
    };

    let address = Address::from_script(&converted, network.to_bitcoin_network())
        .map_err(|e| AddressValidationError::Malformed(e.to_string()))?;
    Ok(address.to_string())
}

/// Parse an address for `network` and return its locking script.
pub fn script_pubkey_for(address: &str, network: BtcNetwork) -> Result<ScriptBuf, BtcError> {
    let info = validate_for(address, network)?;
    Ok(ScriptBuf::from_bytes(info.script_pubkey))
}
