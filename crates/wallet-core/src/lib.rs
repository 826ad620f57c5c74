//! Hierarchical deterministic wallet layer over `chain-btc`: BIP-39
//! mnemonics, BIP-32 derivation along BIP-44/84/86 paths, batch address
//! generation and extended key export/import.

pub mod address;
pub mod error;
pub mod hd_derivation;
pub mod mnemonic;
pub mod types;

pub use error::WalletError;
pub use hd_derivation::{
    derive_address, derive_batch, export_extended_key, generate_wallet, import_extended_key,
    Bip44Path,
};
pub use mnemonic::{
    generate_mnemonic, is_valid_word, mnemonic_to_seed, validate_mnemonic, word_list, WordCount,
    ZeroizingMnemonic,
};
pub use types::{DerivedAddress, ExtendedKeyHandle, HdWallet, KeyVisibility, Purpose};
