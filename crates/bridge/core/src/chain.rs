//! Chains the wallet recognizes

use alloy_primitives::ChainId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Errors raised when parsing a `0x`-prefixed chain id
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChainIdError {
    #[error("chain id {0:?} must be a 0x-prefixed hexadecimal string")]
    NotHex(String),
    #[error("chain id {0:?} is out of range")]
    OutOfRange(String),
}

/// A chain id as it travels over the provider channel: a `0x`-prefixed hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexChainId(pub ChainId);

impl HexChainId {
    pub const fn id(self) -> ChainId {
        self.0
    }
}

impl FromStr for HexChainId {
    type Err = ChainIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .filter(|digits| !digits.is_empty())
            .ok_or_else(|| ChainIdError::NotHex(s.to_string()))?;
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChainIdError::NotHex(s.to_string()));
        }
        u64::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| ChainIdError::OutOfRange(s.to_string()))
    }
}

impl fmt::Display for HexChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for HexChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<ChainId> for HexChainId {
    fn from(id: ChainId) -> Self {
        Self(id)
    }
}

impl Serialize for HexChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HexChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A chain known to the wallet, with the endpoint used to relay read calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    pub chain_id: ChainId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    pub symbol: String,
    pub decimals: u8,
}

impl ChainDescriptor {
    /// Creates a descriptor, naming it after the well known chain if there is one.
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            name: alloy_chains::Chain::from_id(chain_id).to_string(),
            rpc_url: None,
            symbol: "ETH".to_string(),
            decimals: 18,
        }
    }

    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }
}

/// The set of chains a site may switch to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainRegistry {
    chains: BTreeMap<ChainId, ChainDescriptor>,
}

impl ChainRegistry {
    pub fn new(chains: impl IntoIterator<Item = ChainDescriptor>) -> Self {
        Self { chains: chains.into_iter().map(|chain| (chain.chain_id, chain)).collect() }
    }

    /// The chains recognized out of the box.
    pub fn with_defaults() -> Self {
        Self::new([
            ChainDescriptor::new(1),
            ChainDescriptor::new(10),
            ChainDescriptor::new(56).with_symbol("BNB"),
            ChainDescriptor::new(137).with_symbol("POL"),
            ChainDescriptor::new(8453),
            ChainDescriptor::new(42161),
            ChainDescriptor::new(11155111),
        ])
    }

    pub fn get(&self, chain_id: ChainId) -> Option<&ChainDescriptor> {
        self.chains.get(&chain_id)
    }

    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.chains.contains_key(&chain_id)
    }

    pub fn insert(&mut self, chain: ChainDescriptor) {
        self.chains.insert(chain.chain_id, chain);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// Params of `wallet_switchEthereumChain`, see [EIP-3326](https://eips.ethereum.org/EIPS/eip-3326)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchChainParams {
    pub chain_id: HexChainId,
}

/// Native currency section of `wallet_addEthereumChain`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Params of `wallet_addEthereumChain`, see [EIP-3085](https://eips.ethereum.org/EIPS/eip-3085)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParams {
    pub chain_id: HexChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_name: Option<String>,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_currency: Option<NativeCurrency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_explorer_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_urls: Option<Vec<String>>,
}
