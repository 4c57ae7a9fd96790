use crate::origin::Origin;
use alloy_primitives::{Address, ChainId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The capability the wallet has extended to a single origin: the connected account and the
/// chain the origin is on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub origin: Origin,
    pub address: Address,
    pub chain_id: ChainId,
    pub granted_at: DateTime<Utc>,
}

impl PermissionGrant {
    pub fn new(origin: Origin, address: Address, chain_id: ChainId) -> Self {
        Self { origin, address, chain_id, granted_at: Utc::now() }
    }

    /// Whether `address` is the granted account. Addresses compare by value, so checksum casing
    /// in the request doesn't matter.
    pub fn is_signer(&self, address: &Address) -> bool {
        self.address == *address
    }

    /// The [EIP-2255](https://eips.ethereum.org/EIPS/eip-2255) view of this grant.
    pub fn as_permission(&self) -> Permission {
        Permission {
            invoker: self.origin.clone(),
            parent_capability: ETH_ACCOUNTS_CAPABILITY.to_string(),
            caveats: vec![Caveat {
                kind: RESTRICT_RETURNED_ACCOUNTS.to_string(),
                value: serde_json::json!([self.address]),
            }],
            date: self.granted_at.timestamp_millis(),
        }
    }
}

/// The only capability a site can request.
pub const ETH_ACCOUNTS_CAPABILITY: &str = "eth_accounts";

/// Caveat restricting the accounts returned to a site.
pub const RESTRICT_RETURNED_ACCOUNTS: &str = "restrictReturnedAccounts";

/// A permission as returned by `wallet_getPermissions`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub invoker: Origin,
    pub parent_capability: String,
    pub caveats: Vec<Caveat>,
    pub date: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caveat {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
}
