use bip32::{XPrv, XPub};
use chain_btc::address::{AddressNetwork, ScriptType};
use chain_btc::keys::KeyPair;
use chain_btc::{BtcContext, BtcError, BtcNetwork};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::mnemonic::ZeroizingMnemonic;

/// BIP-43 purpose level of a derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Purpose {
    /// BIP-44: legacy and wrapped single-key addresses.
    Bip44,
    /// BIP-84: native SegWit.
    Bip84,
    /// BIP-86: single-key taproot.
    Bip86,
}

impl Purpose {
    pub fn index(self) -> u32 {
        match self {
            Purpose::Bip44 => 44,
            Purpose::Bip84 => 84,
            Purpose::Bip86 => 86,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            44 => Some(Purpose::Bip44),
            84 => Some(Purpose::Bip84),
            86 => Some(Purpose::Bip86),
            _ => None,
        }
    }

    /// Purpose used for addresses of `script_type`.
    pub fn for_script_type(script_type: ScriptType) -> Option<Self> {
        match script_type {
            ScriptType::P2pkh | ScriptType::P2sh => Some(Purpose::Bip44),
            ScriptType::P2wpkh => Some(Purpose::Bip84),
            ScriptType::P2tr => Some(Purpose::Bip86),
            ScriptType::P2wsh | ScriptType::Unknown => None,
        }
    }
}

/// Master key material of a hierarchical deterministic wallet.
pub struct HdWallet {
    pub(crate) mnemonic: ZeroizingMnemonic,
    pub(crate) seed: Zeroizing<[u8; 64]>,
    pub(crate) master: XPrv,
    pub(crate) fingerprint: [u8; 4],
    pub(crate) network: BtcNetwork,
}

impl HdWallet {
    pub fn mnemonic(&self) -> &str {
        self.mnemonic.as_str()
    }

    pub fn seed(&self) -> &[u8; 64] {
        &self.seed
    }

    pub fn master_key(&self) -> &XPrv {
        &self.master
    }

    pub fn fingerprint(&self) -> [u8; 4] {
        self.fingerprint
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }
}

impl std::fmt::Debug for HdWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdWallet")
            .field("fingerprint", &hex::encode(self.fingerprint))
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// A single derived address and the key behind it.
pub struct DerivedAddress {
    pub address: String,
    pub private_key: [u8; 32],
    pub public_key: [u8; 33],
    pub derivation_path: String,
    pub index: u32,
    pub script_type: ScriptType,
}

impl DerivedAddress {
    /// Key pair for signing with this address's key.
    pub fn key_pair(&self, ctx: &BtcContext) -> Result<KeyPair, BtcError> {
        let encoded = Zeroizing::new(hex::encode(self.private_key));
        KeyPair::from_imported_key(ctx, &encoded)
    }
}

impl Drop for DerivedAddress {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl std::fmt::Debug for DerivedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedAddress")
            .field("address", &self.address)
            .field("derivation_path", &self.derivation_path)
            .field("script_type", &self.script_type)
            .finish_non_exhaustive()
    }
}

/// Which half of an extended key to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVisibility {
    Public,
    Private,
}

/// An imported extended key and the network family its prefix names.
#[derive(Clone)]
pub enum ExtendedKeyHandle {
    Private { key: XPrv, network: AddressNetwork },
    Public { key: XPub, network: AddressNetwork },
}

impl ExtendedKeyHandle {
    pub fn network(&self) -> AddressNetwork {
        match self {
            ExtendedKeyHandle::Private { network, .. } | ExtendedKeyHandle::Public { network, .. } => {
                *network
            }
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, ExtendedKeyHandle::Private { .. })
    }

    /// Public half, whichever kind was imported.
    pub fn public_key(&self) -> XPub {
        match self {
            ExtendedKeyHandle::Private { key, .. } => key.public_key(),
            ExtendedKeyHandle::Public { key, .. } => key.clone(),
        }
    }

    pub fn depth(&self) -> u8 {
        match self {
            ExtendedKeyHandle::Private { key, .. } => key.attrs().depth,
            ExtendedKeyHandle::Public { key, .. } => key.attrs().depth,
        }
    }
}

impl std::fmt::Debug for ExtendedKeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedKeyHandle")
            .field("private", &self.is_private())
            .field("network", &self.network())
            .field("depth", &self.depth())
            .finish()
    }
}
