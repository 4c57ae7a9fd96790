//! Risk verdicts and the balance changes they are computed from

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Safety classification of a single request, ordered from least to most severe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RiskLevel {
    #[default]
    Safe,
    Warning,
    Danger,
    Forbidden,
}

impl RiskLevel {
    /// Whether approving at this level needs an explicit acknowledgement on top of the approval.
    pub fn requires_acknowledgement(&self) -> bool {
        *self >= Self::Danger
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Safe => "safe",
            Self::Warning => "warning",
            Self::Danger => "danger",
            Self::Forbidden => "forbidden",
        };
        f.write_str(s)
    }
}

/// One advisory line of a verdict
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: RiskLevel,
    pub message: String,
}

/// The computed classification of a request plus the findings supporting it.
///
/// The level only ever goes up as findings are added.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub level: RiskLevel,
    pub findings: Vec<Finding>,
}

impl RiskVerdict {
    pub fn safe() -> Self {
        Self::default()
    }

    /// Records a finding, raising the level to `severity` if it is higher.
    pub fn raise(&mut self, severity: RiskLevel, message: impl Into<String>) {
        self.level = self.level.max(severity);
        self.findings.push(Finding { severity, message: message.into() });
    }

    pub fn is_safe(&self) -> bool {
        self.level == RiskLevel::Safe
    }
}

/// A token amount that may not be known
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum Amount {
    Known(U256),
    Unknown,
}

impl Amount {
    pub fn known(&self) -> Option<U256> {
        match self {
            Self::Known(value) => Some(*value),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(value) => value.fmt(f),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// The asset a balance change moves
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "address")]
pub enum Asset {
    Native,
    Erc20(Address),
    Nft(Address),
}

/// A single movement of value, as reported by a simulation or decoded from calldata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    pub asset: Asset,
    pub amount: Amount,
    /// Estimated value in USD, when the simulation service priced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usd_value: Option<f64>,
}

impl BalanceChange {
    pub fn new(asset: Asset, amount: Amount) -> Self {
        Self { asset, amount, usd_value: None }
    }
}

/// Send and receive lists of a request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceChanges {
    #[serde(default)]
    pub send: Vec<BalanceChange>,
    #[serde(default)]
    pub receive: Vec<BalanceChange>,
}

impl BalanceChanges {
    /// Whether anything flows out with nothing coming back.
    pub fn is_pure_outflow(&self) -> bool {
        !self.send.is_empty() && self.receive.is_empty()
    }
}

/// An allowance a request grants to a spender
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalGrant {
    pub token: Address,
    pub spender: Address,
    /// `Unknown` for operator approvals that cover every token of a collection
    pub amount: Amount,
}
