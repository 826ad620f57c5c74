//! Bitcoin transaction construction for the practice wallet.
//!
//! Key generation and import, address validation, multisig and taproot
//! spending conditions, UTXO-based transaction building and signing, and
//! commit/reveal inscriptions. Every operation takes an explicit
//! [`BtcContext`] naming the network and carrying the secp256k1 context.

pub mod address;
pub mod context;
pub mod error;
pub mod inscription;
pub mod keys;
pub mod multisig;
pub mod network;
pub mod taproot;
pub mod transaction;
pub mod utxo;

pub use context::BtcContext;
pub use error::BtcError;
pub use network::BtcNetwork;
