use std::fmt;
use std::str::FromStr;

use bip32::{ChildNumber, ExtendedKey, Prefix, XPrv, XPub};
use chain_btc::address::{AddressNetwork, ScriptType};
use chain_btc::keys;
use chain_btc::{BtcContext, BtcError, BtcNetwork};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::WalletError;
use crate::mnemonic::{generate_mnemonic, WordCount, ZeroizingMnemonic};
use crate::types::{DerivedAddress, ExtendedKeyHandle, HdWallet, KeyVisibility, Purpose};

const HARDENED_MARKERS: [char; 2] = ['\'', 'h'];

/// A fully specified `m/purpose'/coin_type'/account'/change/index` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bip44Path {
    pub purpose: Purpose,
    pub coin_type: u32,
    pub account: u32,
    pub change: u32,
    pub index: u32,
}

impl Bip44Path {
    pub fn new(purpose: Purpose, network: BtcNetwork, account: u32, change: u32, index: u32) -> Self {
        Self {
            purpose,
            coin_type: network.coin_type(),
            account,
            change,
            index,
        }
    }

    /// Parse a six-segment path. The first three levels must be hardened, the
    /// last two must not, and change is 0 (receive) or 1 (change).
    pub fn parse(path: &str) -> Result<Self, WalletError> {
        let segments: Vec<&str> = path.trim().split('/').collect();
        if segments.len() != 6 {
            return Err(WalletError::InvalidPath(format!(
                "expected 6 segments, got {}",
                segments.len()
            )));
        }
        if segments[0] != "m" {
            return Err(WalletError::InvalidPath(format!(
                "path must start with 'm', got '{}'",
                segments[0]
            )));
        }

        let purpose_index = parse_segment(segments[1], true)?;
        let purpose = Purpose::from_index(purpose_index).ok_or_else(|| {
            WalletError::InvalidPath(format!("unsupported purpose {purpose_index}"))
        })?;
        let coin_type = parse_segment(segments[2], true)?;
        let account = parse_segment(segments[3], true)?;
        let change = parse_segment(segments[4], false)?;
        if change > 1 {
            return Err(WalletError::InvalidPath(format!(
                "change level must be 0 or 1, got {change}"
            )));
        }
        let index = parse_segment(segments[5], false)?;

        Ok(Self {
            purpose,
            coin_type,
            account,
            change,
            index,
        })
    }

    fn account_levels(&self) -> Result<[ChildNumber; 3], WalletError> {
        Ok([
            ChildNumber::new(self.purpose.index(), true)?,
            ChildNumber::new(self.coin_type, true)?,
            ChildNumber::new(self.account, true)?,
        ])
    }
}

impl fmt::Display for Bip44Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "m/{}'/{}'/{}'/{}/{}",
            self.purpose.index(),
            self.coin_type,
            self.account,
            self.change,
            self.index
        )
    }
}

impl FromStr for Bip44Path {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_segment(segment: &str, hardened: bool) -> Result<u32, WalletError> {
    let digits = segment.strip_suffix(HARDENED_MARKERS);
    let number = match (digits, hardened) {
        (Some(digits), true) => digits,
        (None, false) => segment,
        (Some(_), false) => {
            return Err(WalletError::InvalidPath(format!(
                "segment '{segment}' must not be hardened"
            )))
        }
        (None, true) => {
            return Err(WalletError::InvalidPath(format!(
                "segment '{segment}' must be hardened"
            )))
        }
    };
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(WalletError::InvalidPath(format!("segment '{segment}' is not a number")));
    }
    let value: u32 = number
        .parse()
        .map_err(|_| WalletError::InvalidPath(format!("segment '{segment}' is out of range")))?;
    if value >= ChildNumber::HARDENED_FLAG {
        return Err(WalletError::InvalidPath(format!("segment '{segment}' is out of range")));
    }
    Ok(value)
}

/// Create a wallet from `mnemonic`, or from a fresh 24-word phrase.
pub fn generate_wallet(
    mnemonic: Option<&str>,
    passphrase: &str,
    network: BtcNetwork,
) -> Result<HdWallet, WalletError> {
    let mnemonic = match mnemonic {
        Some(phrase) => ZeroizingMnemonic::new(phrase)?,
        None => generate_mnemonic(WordCount::TwentyFour)?,
    };
    let seed = mnemonic.to_seed(passphrase)?;
    let master = XPrv::new(seed.as_slice())
        .map_err(|e| WalletError::InvalidSeed(e.to_string()))?;
    let fingerprint = master.public_key().fingerprint();
    debug!(network = %network, fingerprint = %hex::encode(fingerprint), "hd wallet ready");

    Ok(HdWallet {
        mnemonic,
        seed,
        master,
        fingerprint,
        network,
    })
}

/// Derive the key at `path` and encode its address as `script_type`.
///
/// The path's coin type must match the context network.
pub fn derive_address(
    ctx: &BtcContext,
    wallet: &HdWallet,
    path: &str,
    script_type: ScriptType,
) -> Result<DerivedAddress, WalletError> {
    let path = Bip44Path::parse(path)?;
    check_coin_type(ctx, &path)?;

    let mut key = wallet.master.clone();
    for child in path.account_levels()? {
        key = key.derive_child(child)?;
    }
    key = key.derive_child(ChildNumber::new(path.change, false)?)?;
    key = key.derive_child(ChildNumber::new(path.index, false)?)?;

    address_from_key(ctx, &key, path, script_type)
}

/// Derive `count` consecutive addresses starting at `start_index` on
/// `m/purpose'/coin'/0'/change/i`.
pub fn derive_batch(
    ctx: &BtcContext,
    wallet: &HdWallet,
    count: u32,
    start_index: u32,
    change: u32,
    script_type: ScriptType,
) -> Result<Vec<DerivedAddress>, WalletError> {
    let purpose = Purpose::for_script_type(script_type)
        .ok_or_else(|| BtcError::UnsupportedScriptType(script_type.to_string()))?;
    if change > 1 {
        return Err(WalletError::InvalidPath(format!(
            "change level must be 0 or 1, got {change}"
        )));
    }
    let end = start_index
        .checked_add(count)
        .filter(|end| *end <= ChildNumber::HARDENED_FLAG)
        .ok_or_else(|| {
            WalletError::InvalidPath(format!(
                "{count} addresses from index {start_index} leave the non-hardened range"
            ))
        })?;

    // account and change levels are shared, derive them once
    let base = Bip44Path::new(purpose, ctx.network(), 0, change, start_index);
    let mut parent = wallet.master.clone();
    for child in base.account_levels()? {
        parent = parent.derive_child(child)?;
    }
    parent = parent.derive_child(ChildNumber::new(change, false)?)?;

    let mut addresses = Vec::with_capacity(count as usize);
    for index in start_index..end {
        let key = parent.derive_child(ChildNumber::new(index, false)?)?;
        let path = Bip44Path { index, ..base };
        addresses.push(address_from_key(ctx, &key, path, script_type)?);
    }
    debug!(count, start_index, change, script_type = %script_type, "derived address batch");
    Ok(addresses)
}

fn check_coin_type(ctx: &BtcContext, path: &Bip44Path) -> Result<(), WalletError> {
    let expected = ctx.network().coin_type();
    if path.coin_type != expected {
        return Err(WalletError::InvalidPath(format!(
            "coin type {} does not match {} (expected {expected})",
            path.coin_type,
            ctx.network()
        )));
    }
    Ok(())
}

fn address_from_key(
    ctx: &BtcContext,
    key: &XPrv,
    path: Bip44Path,
    script_type: ScriptType,
) -> Result<DerivedAddress, WalletError> {
    let private_key = Zeroizing::new(key.to_bytes());
    let public_key = key.public_key().to_bytes();
    let address = keys::derive_address(ctx, &public_key, script_type)?;

    Ok(DerivedAddress {
        address,
        private_key: *private_key,
        public_key,
        derivation_path: path.to_string(),
        index: path.index,
        script_type,
    })
}

/// Serialize the extended key at `path` (for example `m/84'/0'/0'`).
///
/// Main network keys use xprv/xpub prefixes, test networks tprv/tpub.
pub fn export_extended_key(
    wallet: &HdWallet,
    path: &str,
    visibility: KeyVisibility,
    network: BtcNetwork,
) -> Result<Zeroizing<String>, WalletError> {
    let key = derive_path(&wallet.master, path)?;
    let encoded = match (visibility, network.is_test()) {
        (KeyVisibility::Private, false) => key.to_string(Prefix::XPRV),
        (KeyVisibility::Private, true) => key.to_string(Prefix::TPRV),
        (KeyVisibility::Public, false) => Zeroizing::new(key.public_key().to_string(Prefix::XPUB)),
        (KeyVisibility::Public, true) => Zeroizing::new(key.public_key().to_string(Prefix::TPUB)),
    };
    Ok(encoded)
}

/// Walk an arbitrary `m/...` path; used for account-level exports.
fn derive_path(master: &XPrv, path: &str) -> Result<XPrv, WalletError> {
    let mut segments = path.trim().split('/');
    if segments.next() != Some("m") {
        return Err(WalletError::InvalidPath(format!("path must start with 'm': {path}")));
    }
    let mut key = master.clone();
    for segment in segments {
        let hardened = segment.ends_with(HARDENED_MARKERS);
        let index = parse_segment(segment, hardened)?;
        key = key.derive_child(ChildNumber::new(index, hardened)?)?;
    }
    Ok(key)
}

/// Parse an xprv, xpub, tprv or tpub string.
pub fn import_extended_key(encoded: &str) -> Result<ExtendedKeyHandle, WalletError> {
    let extended = ExtendedKey::from_str(encoded.trim())
        .map_err(|e| WalletError::InvalidExtendedKey(e.to_string()))?;
    let prefix = extended.prefix;

    let handle = if prefix == Prefix::XPRV || prefix == Prefix::TPRV {
        let network = if prefix == Prefix::XPRV { AddressNetwork::Main } else { AddressNetwork::Test };
        let key = XPrv::try_from(extended)
            .map_err(|e| WalletError::InvalidExtendedKey(e.to_string()))?;
        ExtendedKeyHandle::Private { key, network }
    } else if prefix == Prefix::XPUB || prefix == Prefix::TPUB {
        let network = if prefix == Prefix::XPUB { AddressNetwork::Main } else { AddressNetwork::Test };
        let key = XPub::try_from(extended)
            .map_err(|e| WalletError::InvalidExtendedKey(e.to_string()))?;
        ExtendedKeyHandle::Public { key, network }
    } else {
        return Err(WalletError::InvalidExtendedKey(format!(
            "unsupported version prefix {}",
            prefix.as_str()
        )));
    };
    Ok(handle)
}

impl ExtendedKeyHandle {
    /// Address of child `change/index` below this key, using only the public
    /// half so watch-only handles work too.
    pub fn derive_child_address(
        &self,
        ctx: &BtcContext,
        change: u32,
        index: u32,
        script_type: ScriptType,
    ) -> Result<String, WalletError> {
        if AddressNetwork::of(ctx.network()) != self.network() {
            return Err(BtcError::InvalidNetwork(format!(
                "extended key is for {:?} networks, context is {}",
                self.network(),
                ctx.network()
            ))
            .into());
        }
        let child = self
            .public_key()
            .derive_child(ChildNumber::new(change, false)?)?
            .derive_child(ChildNumber::new(index, false)?)?;
        Ok(keys::derive_address(ctx, &child.to_bytes(), script_type)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_btc::address;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn wallet(network: BtcNetwork) -> HdWallet {
        generate_wallet(Some(TEST_MNEMONIC), "", network).unwrap()
    }

    #[test]
    fn parse_and_display_round_trip() {
        let path = Bip44Path::parse("m/84'/1'/0'/1/7").unwrap();
        assert_eq!(path.purpose, Purpose::Bip84);
        assert_eq!(path.coin_type, 1);
        assert_eq!(path.change, 1);
        assert_eq!(path.index, 7);
        assert_eq!(path.to_string(), "m/84'/1'/0'/1/7");
        assert_eq!("m/86h/0h/2h/0/3".parse::<Bip44Path>().unwrap().account, 2);
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for bad in [
            "",
            "m/84'/0'/0'/0",
            "m/84'/0'/0'/0/0/0",
            "x/84'/0'/0'/0/0",
            "m/84/0'/0'/0/0",
            "m/84'/0'/0'/0'/0",
            "m/84'/0'/0'/2/0",
            "m/49'/0'/0'/0/0",
            "m/84'/0'/0'/0/abc",
            "m/84'/0'/0'/0/-1",
            "m/84'/0'/0'/0/2147483648",
        ] {
            assert!(
                matches!(Bip44Path::parse(bad), Err(WalletError::InvalidPath(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn master_fingerprint_and_root_key() {
        let w = wallet(BtcNetwork::Mainnet);
        assert_eq!(hex::encode(w.fingerprint()), "73c5da0a");
        assert_eq!(
            hex::encode(w.seed()),
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc19a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4"
        );
        let root = export_extended_key(&w, "m", KeyVisibility::Private, BtcNetwork::Mainnet).unwrap();
        assert_eq!(
            root.as_str(),
            "xprv9s21ZrQH143K3GJpoapnV8SFfukcVBSfeCficPSGfubmSFDxo1kuHnLisriDvSnRRuL2Qrg5ggqHKNVpxR86QEC8w35uxmGoggxtQTPvfUu"
        );
    }

    #[test]
    fn bip84_first_receive_address() {
        let ctx = BtcContext::new(BtcNetwork::Mainnet);
        let derived =
            derive_address(&ctx, &wallet(BtcNetwork::Mainnet), "m/84'/0'/0'/0/0", ScriptType::P2wpkh)
                .unwrap();
        assert_eq!(derived.address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        assert_eq!(derived.derivation_path, "m/84'/0'/0'/0/0");
        assert_eq!(derived.index, 0);
    }

    #[test]
    fn bip86_first_receive_address() {
        let ctx = BtcContext::new(BtcNetwork::Mainnet);
        let derived =
            derive_address(&ctx, &wallet(BtcNetwork::Mainnet), "m/86'/0'/0'/0/0", ScriptType::P2tr)
                .unwrap();
        assert_eq!(
            derived.address,
            "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr"
        );
    }

    #[test]
    fn bip44_first_receive_address() {
        let ctx = BtcContext::new(BtcNetwork::Mainnet);
        let derived =
            derive_address(&ctx, &wallet(BtcNetwork::Mainnet), "m/44'/0'/0'/0/0", ScriptType::P2pkh)
                .unwrap();
        assert_eq!(derived.address, "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
    }

    #[test]
    fn derived_key_matches_key_engine() {
        let ctx = BtcContext::signet();
        let derived =
            derive_address(&ctx, &wallet(BtcNetwork::Signet), "m/84'/1'/0'/0/3", ScriptType::P2wpkh)
                .unwrap();
        let key = keys::KeyPair::from_imported_key(&ctx, &hex::encode(derived.private_key)).unwrap();
        assert_eq!(key.address(), derived.address);
        assert_eq!(key.public_key_bytes(), derived.public_key.to_vec());
    }

    #[test]
    fn coin_type_must_match_network() {
        let ctx = BtcContext::signet();
        let result = derive_address(&ctx, &wallet(BtcNetwork::Signet), "m/84'/0'/0'/0/0", ScriptType::P2wpkh);
        assert!(matches!(result, Err(WalletError::InvalidPath(_))));
    }

    #[test]
    fn neighbouring_indices_are_distinct_and_valid() {
        let ctx = BtcContext::new(BtcNetwork::Testnet);
        let w = wallet(BtcNetwork::Testnet);
        let a = derive_address(&ctx, &w, "m/44'/1'/0'/0/0", ScriptType::P2wpkh).unwrap();
        let b = derive_address(&ctx, &w, "m/44'/1'/0'/0/1", ScriptType::P2wpkh).unwrap();
        assert_ne!(a.address, b.address);
        for derived in [&a, &b] {
            assert!(address::validate_for(&derived.address, BtcNetwork::Testnet).is_ok());
        }
        let again = derive_address(&ctx, &w, "m/44'/1'/0'/0/0", ScriptType::P2wpkh).unwrap();
        assert_eq!(a.address, again.address);
    }

    #[test]
    fn batch_matches_single_derivation() {
        let ctx = BtcContext::new(BtcNetwork::Mainnet);
        let w = wallet(BtcNetwork::Mainnet);
        let batch = derive_batch(&ctx, &w, 5, 3, 1, ScriptType::P2wpkh).unwrap();
        assert_eq!(batch.len(), 5);
        for (offset, derived) in batch.iter().enumerate() {
            let index = 3 + offset as u32;
            assert_eq!(derived.index, index);
            let single = derive_address(
                &ctx,
                &w,
                &format!("m/84'/0'/0'/1/{index}"),
                ScriptType::P2wpkh,
            )
            .unwrap();
            assert_eq!(single.address, derived.address);
        }
        let unique: std::collections::HashSet<_> = batch.iter().map(|d| &d.address).collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn batch_rejects_bad_arguments() {
        let ctx = BtcContext::new(BtcNetwork::Mainnet);
        let w = wallet(BtcNetwork::Mainnet);
        assert!(matches!(
            derive_batch(&ctx, &w, 2, 0, 2, ScriptType::P2wpkh),
            Err(WalletError::InvalidPath(_))
        ));
        assert!(matches!(
            derive_batch(&ctx, &w, 10, ChildNumber::HARDENED_FLAG - 5, 0, ScriptType::P2wpkh),
            Err(WalletError::InvalidPath(_))
        ));
        assert!(matches!(
            derive_batch(&ctx, &w, 1, 0, 0, ScriptType::P2wsh),
            Err(WalletError::Chain(BtcError::UnsupportedScriptType(_)))
        ));
        assert!(derive_batch(&ctx, &w, 0, 0, 0, ScriptType::P2tr).unwrap().is_empty());
    }

    #[test]
    fn invalid_mnemonic_is_rejected() {
        let result = generate_wallet(Some("abandon abandon abandon"), "", BtcNetwork::Mainnet);
        assert!(matches!(result, Err(WalletError::InvalidMnemonic(_))));
    }

    #[test]
    fn fresh_wallets_differ() {
        let a = generate_wallet(None, "", BtcNetwork::Signet).unwrap();
        let b = generate_wallet(None, "", BtcNetwork::Signet).unwrap();
        assert_eq!(a.mnemonic().split(' ').count(), 24);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn passphrase_changes_the_tree() {
        let plain = wallet(BtcNetwork::Mainnet);
        let salted = generate_wallet(Some(TEST_MNEMONIC), "TREZOR", BtcNetwork::Mainnet).unwrap();
        assert_ne!(plain.fingerprint(), salted.fingerprint());
    }

    #[test]
    fn export_uses_network_prefixes() {
        let w = wallet(BtcNetwork::Signet);
        let tpub = export_extended_key(&w, "m/84'/1'/0'", KeyVisibility::Public, BtcNetwork::Signet).unwrap();
        assert!(tpub.starts_with("tpub"));
        let tprv = export_extended_key(&w, "m/84'/1'/0'", KeyVisibility::Private, BtcNetwork::Signet).unwrap();
        assert!(tprv.starts_with("tprv"));
        let xpub = export_extended_key(&w, "m/84'/0'/0'", KeyVisibility::Public, BtcNetwork::Mainnet).unwrap();
        assert!(xpub.starts_with("xpub"));
        assert!(export_extended_key(&w, "84'/0'", KeyVisibility::Public, BtcNetwork::Mainnet).is_err());
    }

    #[test]
    fn import_round_trips_and_detects_network() {
        let w = wallet(BtcNetwork::Mainnet);
        let xprv = export_extended_key(&w, "m/84'/0'/0'", KeyVisibility::Private, BtcNetwork::Mainnet).unwrap();
        let handle = import_extended_key(&xprv).unwrap();
        assert!(handle.is_private());
        assert_eq!(handle.network(), AddressNetwork::Main);
        assert_eq!(handle.depth(), 3);

        let tpub = export_extended_key(&w, "m/84'/1'/0'", KeyVisibility::Public, BtcNetwork::Testnet).unwrap();
        let handle = import_extended_key(&tpub).unwrap();
        assert!(!handle.is_private());
        assert_eq!(handle.network(), AddressNetwork::Test);
    }

    #[test]
    fn watch_only_xpub_derives_same_addresses() {
        let ctx = BtcContext::new(BtcNetwork::Mainnet);
        let w = wallet(BtcNetwork::Mainnet);
        let xpub = export_extended_key(&w, "m/84'/0'/0'", KeyVisibility::Public, BtcNetwork::Mainnet).unwrap();
        let handle = import_extended_key(&xpub).unwrap();
        let watched = handle.derive_child_address(&ctx, 0, 0, ScriptType::P2wpkh).unwrap();
        assert_eq!(watched, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");

        let signet = BtcContext::signet();
        assert!(matches!(
            handle.derive_child_address(&signet, 0, 0, ScriptType::P2wpkh),
            Err(WalletError::Chain(BtcError::InvalidNetwork(_)))
        ));
    }

    #[test]
    fn import_rejects_garbage() {
        for bad in ["", "xpub", "not-a-key", "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs"] {
            assert!(
                matches!(import_extended_key(bad), Err(WalletError::InvalidExtendedKey(_))),
                "accepted {bad:?}"
            );
        }
    }
}
