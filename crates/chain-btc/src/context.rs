use bitcoin::secp256k1::{All, Secp256k1};

use crate::network::BtcNetwork;

/// Signing/verification context handed to every engine call.
///
/// Holds the secp256k1 precomputation tables and the network all produced
/// addresses and keys belong to. Build one per caller and pass it by reference;
/// nothing in this crate keeps process-wide crypto state.
#[derive(Debug, Clone)]
pub struct BtcContext {
    secp: Secp256k1<All>,
    network: BtcNetwork,
}

impl BtcContext {
    pub fn new(network: BtcNetwork) -> Self {
        Self {
            secp: Secp256k1::new(),
            network,
        }
    }

    /// Context for the practice network.
    pub fn signet() -> Self {
        Self::new(BtcNetwork::Signet)
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }
}

impl Default for BtcContext {
    fn default() -> Self {
        Self::signet()
    }
}
