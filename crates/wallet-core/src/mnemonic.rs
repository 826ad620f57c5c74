use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::error::WalletError;

/// Supported phrase lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordCount {
    Twelve,
    #[default]
    TwentyFour,
}

impl WordCount {
    fn entropy_len(self) -> usize {
        match self {
            WordCount::Twelve => 16,
            WordCount::TwentyFour => 32,
        }
    }
}

/// Generate a new BIP-39 mnemonic; 24 words carry 256 bits of entropy.
pub fn generate_mnemonic(words: WordCount) -> Result<ZeroizingMnemonic, WalletError> {
    let mut entropy = [0u8; 32];
    let len = words.entropy_len();
    rand::rngs::OsRng.fill_bytes(&mut entropy[..len]);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy[..len])
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()));
    entropy.zeroize();
    Ok(ZeroizingMnemonic {
        phrase: mnemonic?.to_string(),
    })
}

/// Validate a mnemonic phrase, reporting why it was rejected.
pub fn validate_mnemonic(phrase: &str) -> Result<(), WalletError> {
    Mnemonic::parse_in_normalized(Language::English, phrase)
        .map(|_| ())
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))
}

/// Derive the 64-byte BIP-39 seed from a phrase and optional passphrase.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Zeroizing<[u8; 64]>, WalletError> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_seed(passphrase)))
}

/// English BIP-39 words, in index order.
pub fn word_list() -> &'static [&'static str] {
    Language::English.word_list()
}

/// Whether `word` is one of the 2048 English BIP-39 words.
pub fn is_valid_word(word: &str) -> bool {
    Language::English.find_word(word).is_some()
}

/// A validated phrase, wiped from memory on drop.
pub struct ZeroizingMnemonic {
    phrase: String,
}

impl ZeroizingMnemonic {
    pub fn new(phrase: &str) -> Result<Self, WalletError> {
        validate_mnemonic(phrase)?;
        Ok(Self {
            phrase: phrase.split_whitespace().collect::<Vec<_>>().join(" "),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.phrase
    }

    pub fn to_seed(&self, passphrase: &str) -> Result<Zeroizing<[u8; 64]>, WalletError> {
        mnemonic_to_seed(&self.phrase, passphrase)
    }

    pub fn words(&self) -> Vec<&str> {
        self.phrase.split_whitespace().collect()
    }
}

impl Drop for ZeroizingMnemonic {
    fn drop(&mut self) {
        self.phrase.zeroize();
    }
}

impl std::fmt::Debug for ZeroizingMnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ZeroizingMnemonic({} words)", self.words().len())
    }
}
