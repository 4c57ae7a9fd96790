//! Bridge configuration, layered from defaults, a TOML file and the environment

use alloy_primitives::{ChainId, U256};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use provider_bridge_core::{ChainDescriptor, ChainRegistry};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tracing::warn;

/// File name looked up in the working directory by [`BridgeConfig::load`]
pub const CONFIG_FILE_NAME: &str = "bridge.toml";

/// Prefix of environment overrides, nested keys are separated by `__`, e.g.
/// `PROVIDER_BRIDGE_RISK__REPUTATION_TIMEOUT_MS=500`
pub const ENV_PREFIX: &str = "PROVIDER_BRIDGE_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] figment::Error),
    #[error("default chain {0} is not among the configured chains")]
    UnknownDefaultChain(ChainId),
    #[error("invalid rpc url {url:?} for chain {chain_id}: {reason}")]
    InvalidRpcUrl { chain_id: ChainId, url: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// The chains a site may switch to.
    ///
    /// The built-in chains carry no `rpc_url`, passthrough calls on a chain without one fail
    /// with an internal error until an endpoint is configured.
    pub chains: Vec<ChainConfig>,
    /// The wallet's active chain at startup
    pub default_chain_id: ChainId,
    pub risk: RiskConfig,
    pub approval: ApprovalConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            chains: ChainRegistry::with_defaults().iter().map(ChainConfig::from).collect(),
            default_chain_id: 1,
            risk: RiskConfig::default(),
            approval: ApprovalConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Loads the config from `bridge.toml` in the working directory, if present, and the
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE_NAME)
    }

    /// Loads the config from the TOML file at `path`, if present, and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment().merge(Toml::file(path.as_ref())).merge(Self::env()))
    }

    /// Parses a config from TOML text, without looking at the environment.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment().merge(Toml::string(s)))
    }

    /// The defaults as a figment, to merge further providers on top of.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the default chain is configured and every rpc url parses.
    ///
    /// A default chain without an rpc url is allowed but logged, reads relayed to the network
    /// can't be answered on it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(default_chain) =
            self.chains.iter().find(|chain| chain.chain_id == self.default_chain_id)
        else {
            return Err(ConfigError::UnknownDefaultChain(self.default_chain_id));
        };
        if default_chain.rpc_url.is_none() {
            warn!(target: "bridge::config", chain_id = self.default_chain_id, "default chain has no rpc url, passthrough calls will fail");
        }
        for chain in &self.chains {
            if let Some(url) = &chain.rpc_url {
                url::Url::parse(url).map_err(|err| ConfigError::InvalidRpcUrl {
                    chain_id: chain.chain_id,
                    url: url.clone(),
                    reason: err.to_string(),
                })?;
            }
        }
        Ok(())
    }

    /// Returns the configured chains that have no rpc url
    pub fn chains_without_rpc_url(&self) -> Vec<ChainId> {
        self.chains
            .iter()
            .filter(|chain| chain.rpc_url.is_none())
            .map(|chain| chain.chain_id)
            .collect()
    }

    /// The recognized-chain registry described by this config.
    pub fn registry(&self) -> ChainRegistry {
        ChainRegistry::new(self.chains.iter().map(ChainConfig::descriptor))
    }
}

/// A chain entry of the config
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

impl ChainConfig {
    pub fn descriptor(&self) -> ChainDescriptor {
        let mut chain = ChainDescriptor::new(self.chain_id);
        if let Some(name) = &self.name {
            chain.name = name.clone();
        }
        if let Some(url) = &self.rpc_url {
            chain = chain.with_rpc_url(url.clone());
        }
        if let Some(symbol) = &self.symbol {
            chain = chain.with_symbol(symbol.clone());
        }
        if let Some(decimals) = self.decimals {
            chain.decimals = decimals;
        }
        chain
    }
}

impl From<&ChainDescriptor> for ChainConfig {
    fn from(chain: &ChainDescriptor) -> Self {
        Self {
            chain_id: chain.chain_id,
            name: None,
            rpc_url: chain.rpc_url.clone(),
            symbol: Some(chain.symbol.clone()),
            decimals: None,
        }
    }
}

const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

/// Thresholds and lists used by the risk pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Origins or domains that are never trusted. An exact origin or host match is forbidden,
    /// a subdomain of a listed domain is dangerous.
    pub blacklist: Vec<String>,
    /// Origins or domains exempt from the first-time connection warning
    pub whitelist: Vec<String>,
    /// Approvals of at least this amount count as unlimited
    pub unlimited_approval_threshold: U256,
    /// Native outflow that warrants a warning
    pub value_warning_wei: U256,
    /// Native outflow that is dangerous
    pub value_danger_wei: U256,
    /// Priced outflow that warrants a warning
    pub value_warning_usd: f64,
    /// Priced outflow that is dangerous
    pub value_danger_usd: f64,
    /// How long the reputation service gets before its check is skipped
    pub reputation_timeout_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            unlimited_approval_threshold: (U256::from(1) << 96) - U256::from(1),
            value_warning_wei: U256::from(ONE_ETHER),
            value_danger_wei: U256::from(10 * ONE_ETHER),
            value_warning_usd: 1_000.0,
            value_danger_usd: 10_000.0,
            reputation_timeout_ms: 1_500,
        }
    }
}

impl RiskConfig {
    pub fn reputation_timeout(&self) -> Duration {
        Duration::from_millis(self.reputation_timeout_ms)
    }
}

/// Approval flow settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Seconds a presented case may wait for a decision before it is rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
