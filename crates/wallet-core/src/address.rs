use chain_btc::address::ScriptType;
use chain_btc::BtcContext;

use crate::error::WalletError;
use crate::hd_derivation::{self, Bip44Path};
use crate::types::{DerivedAddress, HdWallet, Purpose};

/// Script types with a single-key derivation purpose.
pub const SINGLE_KEY_TYPES: [ScriptType; 4] = [
    ScriptType::P2pkh,
    ScriptType::P2sh,
    ScriptType::P2wpkh,
    ScriptType::P2tr,
];

fn derive_on_chain(
    ctx: &BtcContext,
    wallet: &HdWallet,
    account: u32,
    change: u32,
    index: u32,
    script_type: ScriptType,
) -> Result<DerivedAddress, WalletError> {
    let purpose = Purpose::for_script_type(script_type).ok_or_else(|| {
        chain_btc::BtcError::UnsupportedScriptType(format!("{script_type} has no single-key path"))
    })?;
    let path = Bip44Path::new(purpose, ctx.network(), account, change, index);
    hd_derivation::derive_address(ctx, wallet, &path.to_string(), script_type)
}

/// Derive a receive (external chain) address.
pub fn receive_address(
    ctx: &BtcContext,
    wallet: &HdWallet,
    account: u32,
    index: u32,
    script_type: ScriptType,
) -> Result<DerivedAddress, WalletError> {
    derive_on_chain(ctx, wallet, account, 0, index, script_type)
}

/// Derive a change (internal chain) address.
pub fn change_address(
    ctx: &BtcContext,
    wallet: &HdWallet,
    account: u32,
    index: u32,
    script_type: ScriptType,
) -> Result<DerivedAddress, WalletError> {
    derive_on_chain(ctx, wallet, account, 1, index, script_type)
}

/// Derive the receive address at `index` for every single-key script type.
pub fn derive_all_types(
    ctx: &BtcContext,
    wallet: &HdWallet,
    account: u32,
    index: u32,
) -> Result<Vec<DerivedAddress>, WalletError> {
    SINGLE_KEY_TYPES
        .iter()
        .map(|script_type| receive_address(ctx, wallet, account, index, *script_type))
        .collect()
}
