use bitcoin::{Network, NetworkKind};

/// Default block-explorer API base for Bitcoin mainnet.
pub const MAINNET_API: &str = "https://mempool.space/api";

/// Default block-explorer API base for Bitcoin testnet.
pub const TESTNET_API: &str = "https://mempool.space/testnet/api";

/// Default block-explorer API base for Bitcoin signet.
pub const SIGNET_API: &str = "https://mempool.space/signet/api";

/// Prefix framed into every signed message before hashing.
pub const SIGNED_MESSAGE_PREFIX: &str = "Bitcoin Signed Message:\n";

/// Supported Bitcoin networks. Signet is the practice network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtcNetwork {
    Mainnet,
    Testnet,
    #[default]
    Signet,
}

impl BtcNetwork {
    /// Convert to the `bitcoin` crate's `Network` type.
    pub fn to_bitcoin_network(self) -> Network {
        match self {
            BtcNetwork::Mainnet => Network::Bitcoin,
            BtcNetwork::Testnet => Network::Testnet,
            BtcNetwork::Signet => Network::Signet,
        }
    }

    /// Address/WIF version family (testnet and signet share encodings).
    pub fn kind(self) -> NetworkKind {
        NetworkKind::from(self.to_bitcoin_network())
    }

    /// Whether this is one of the test networks.
    pub fn is_test(self) -> bool {
        !matches!(self, BtcNetwork::Mainnet)
    }

    /// BIP-44 coin type: 0 for mainnet, 1 for every test network.
    pub fn coin_type(self) -> u32 {
        match self {
            BtcNetwork::Mainnet => 0,
            BtcNetwork::Testnet | BtcNetwork::Signet => 1,
        }
    }

    /// Return the default explorer API base for this network.
    pub fn default_api_url(self) -> &'static str {
        match self {
            BtcNetwork::Mainnet => MAINNET_API,
            BtcNetwork::Testnet => TESTNET_API,
            BtcNetwork::Signet => SIGNET_API,
        }
    }

    /// Prefix used when framing messages for signing.
    pub fn message_prefix(self) -> &'static str {
        SIGNED_MESSAGE_PREFIX
    }
}

impl std::fmt::Display for BtcNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BtcNetwork::Mainnet => write!(f, "mainnet"),
            BtcNetwork::Testnet => write!(f, "testnet"),
            BtcNetwork::Signet => write!(f, "signet"),
        }
    }
}

impl std::str::FromStr for BtcNetwork {
    type Err = crate::error::BtcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" => Ok(BtcNetwork::Mainnet),
            "testnet" => Ok(BtcNetwork::Testnet),
            "signet" => Ok(BtcNetwork::Signet),
            other => Err(crate::error::BtcError::InvalidNetwork(other.to_string())),
        }
    }
}
