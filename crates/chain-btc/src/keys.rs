//! Single-key lifecycle: generation, import/export, address derivation and
//! Bitcoin signed-message signing.

use bitcoin::address::Address;
use bitcoin::consensus::encode::{serialize, VarInt};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{Message, SecretKey};
use bitcoin::sign_message::MessageSignature;
use bitcoin::{CompressedPublicKey, PrivateKey, PublicKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::address::ScriptType;
use crate::context::BtcContext;
use crate::error::BtcError;
use crate::network::BtcNetwork;

/// A secp256k1 key pair bound to one network.
///
/// The default address is native SegWit (P2WPKH) for compressed keys and
/// P2PKH for uncompressed keys. The secret scalar is erased on drop.
#[derive(Clone)]
pub struct KeyPair {
    private_key: PrivateKey,
    public_key: PublicKey,
    address: String,
    network: BtcNetwork,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate(ctx: &BtcContext, compressed: bool) -> Result<Self, BtcError> {
        let secret = SecretKey::new(&mut OsRng);
        Self::from_secret_key(ctx, secret, compressed)
    }

    /// Build a key pair from an existing secret scalar.
    pub fn from_secret_key(
        ctx: &BtcContext,
        secret: SecretKey,
        compressed: bool,
    ) -> Result<Self, BtcError> {
        let private_key = PrivateKey {
            compressed,
            network: ctx.network().kind(),
            inner: secret,
        };
        let public_key = private_key.public_key(ctx.secp());
        let address = default_address(ctx, &public_key)?;

        Ok(Self {
            private_key,
            public_key,
            address,
            network: ctx.network(),
        })
    }

    /// Import a private key from 64 hex characters (raw scalar, compressed)
    /// or from WIF. WIF keys must belong to the context's network family.
    pub fn from_imported_key(ctx: &BtcContext, material: &str) -> Result<Self, BtcError> {
        let material = material.trim();

        if material.len() == 64 && material.chars().all(|c| c.is_ascii_hexdigit()) {
            let bytes = Zeroizing::new(
                hex::decode(material)
                    .map_err(|e| BtcError::InvalidKey(format!("invalid hex key: {e}")))?,
            );
            let secret = SecretKey::from_slice(&bytes)
                .map_err(|e| BtcError::InvalidKey(format!("invalid secret key: {e}")))?;
            return Self::from_secret_key(ctx, secret, true);
        }

        let wif = PrivateKey::from_wif(material)
            .map_err(|e| BtcError::InvalidKey(format!("invalid WIF: {e}")))?;
        if wif.network != ctx.network().kind() {
            return Err(BtcError::InvalidKey(format!(
                "WIF key does not belong to {}",
                ctx.network()
            )));
        }
        Self::from_secret_key(ctx, wif.inner, wif.compressed)
    }

    /// Export the private key in wallet import format.
    pub fn to_wif(&self) -> String {
        self.private_key.to_wif()
    }

    pub fn private_key_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.private_key.inner.secret_bytes())
    }

    /// 33-byte compressed or 65-byte uncompressed SEC1 encoding.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.to_bytes()
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn secret_key(&self) -> SecretKey {
        self.private_key.inner
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_compressed(&self) -> bool {
        self.private_key.compressed
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    /// Sign `message` with this key using the signed-message framing.
    pub fn sign_message(&self, ctx: &BtcContext, message: &[u8]) -> Result<Vec<u8>, BtcError> {
        sign_message(ctx, message, self.private_key_bytes().as_slice(), self.is_compressed())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key.to_string())
            .field("address", &self.address)
            .field("compressed", &self.private_key.compressed)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.private_key.inner.non_secure_erase();
    }
}

fn default_address(ctx: &BtcContext, public_key: &PublicKey) -> Result<String, BtcError> {
    let script_type = if public_key.compressed {
        ScriptType::P2wpkh
    } else {
        ScriptType::P2pkh
    };
    derive_address(ctx, &public_key.to_bytes(), script_type)
}

pub(crate) fn require_compressed(public_key: PublicKey) -> Result<CompressedPublicKey, BtcError> {
    CompressedPublicKey::try_from(public_key)
        .map_err(|_| BtcError::InvalidKey("segwit and taproot need a compressed key".into()))
}

/// Derive an address of `script_type` from a SEC1 public key.
///
/// `P2sh` yields a P2SH-wrapped P2WPKH address and `P2tr` a BIP-86 key-path
/// address. `P2wsh` has no single-key form and is rejected.
pub fn derive_address(
    ctx: &BtcContext,
    public_key: &[u8],
    script_type: ScriptType,
) -> Result<String, BtcError> {
    let pk = PublicKey::from_slice(public_key)
        .map_err(|e| BtcError::InvalidKey(format!("failed to parse public key: {e}")))?;
    let net = ctx.network().to_bitcoin_network();

    let address = match script_type {
        ScriptType::P2pkh => Address::p2pkh(pk.pubkey_hash(), net),
        ScriptType::P2sh => Address::p2shwpkh(&require_compressed(pk)?, net),
        ScriptType::P2wpkh => Address::p2wpkh(&require_compressed(pk)?, net),
        ScriptType::P2tr => {
            let (internal_key, _parity) = require_compressed(pk)?.0.x_only_public_key();
            Address::p2tr(ctx.secp(), internal_key, None, net)
        }
        other => return Err(BtcError::UnsupportedScriptType(other.to_string())),
    };

    Ok(address.to_string())
}

/// Digest signed by `sign_message`: double SHA-256 over the length-prefixed
/// network message prefix followed by the length-prefixed message.
pub fn message_hash(network: BtcNetwork, message: &[u8]) -> sha256d::Hash {
    let prefix = network.message_prefix().as_bytes();
    let mut data = Vec::with_capacity(prefix.len() + message.len() + 10);
    data.extend_from_slice(&serialize(&VarInt(prefix.len() as u64)));
    data.extend_from_slice(prefix);
    data.extend_from_slice(&serialize(&VarInt(message.len() as u64)));
    data.extend_from_slice(message);
    sha256d::Hash::hash(&data)
}

/// Sign a message, returning the 65-byte recoverable compact signature.
pub fn sign_message(
    ctx: &BtcContext,
    message: &[u8],
    private_key: &[u8],
    compressed: bool,
) -> Result<Vec<u8>, BtcError> {
    if private_key.is_empty() {
        return Err(BtcError::Signing("no private key material supplied".into()));
    }
    let secret = SecretKey::from_slice(private_key)
        .map_err(|e| BtcError::InvalidKey(format!("invalid secret key: {e}")))?;

    let digest = message_hash(ctx.network(), message);
    let msg = Message::from_digest(digest.to_byte_array());
    let signature = ctx.secp().sign_ecdsa_recoverable(&msg, &secret);

    Ok(MessageSignature::new(signature, compressed).serialize().to_vec())
}

/// Verify a signed message against the expected public key.
///
/// Malformed key or signature bytes are errors; a well-formed signature that
/// does not match the key and message yields `Ok(false)`.
pub fn verify_message(
    ctx: &BtcContext,
    message: &[u8],
    signature: &[u8],
    public_key: &[u8],
) -> Result<bool, BtcError> {
    let expected = PublicKey::from_slice(public_key)
        .map_err(|e| BtcError::InvalidKey(format!("failed to parse public key: {e}")))?;
    let signature = MessageSignature::from_slice(signature)
        .map_err(|e| BtcError::Signing(format!("malformed signature: {e}")))?;

    let digest = message_hash(ctx.network(), message);
    match signature.recover_pubkey(ctx.secp(), digest) {
        Ok(recovered) => Ok(recovered.inner == expected.inner),
        Err(_) => Ok(false),
    }
}
