//! Per-origin permission grants

use crate::{
    error::{BridgeError, Result},
    notifier::{ChangeListeners, StateChange},
};
use alloy_primitives::{Address, ChainId};
use futures::channel::mpsc::UnboundedReceiver;
use parking_lot::RwLock;
use provider_bridge_core::{IntoOrigin, Origin, PermissionGrant};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Permissions {
    grants: BTreeMap<Origin, PermissionGrant>,
    /// address the user chose to reconnect an origin with without asking again
    auto_connect: BTreeMap<Origin, Address>,
    /// origins that were connected at some point
    known: BTreeSet<Origin>,
}

/// Serializable copy of the store, for the wallet's persistent storage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSnapshot {
    pub grants: Vec<PermissionGrant>,
    #[serde(default)]
    pub auto_connect: BTreeMap<Origin, Address>,
    #[serde(default)]
    pub known_origins: BTreeSet<Origin>,
}

/// Mapping from origin to its [`PermissionGrant`], with at most one grant per origin.
///
/// Clones share the same state. Every write happens under a single lock, so readers never
/// observe a partially written grant and concurrent writes for one origin are serialized.
#[derive(Clone, Debug, Default)]
pub struct PermissionStore {
    inner: Arc<RwLock<Permissions>>,
    listeners: ChangeListeners,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the grant of the origin. Malformed origins simply have none.
    pub fn get(&self, origin: impl IntoOrigin) -> Option<PermissionGrant> {
        let origin = origin.into_origin().ok()?;
        self.inner.read().grants.get(&origin).cloned()
    }

    pub fn is_connected(&self, origin: impl IntoOrigin) -> bool {
        self.get(origin).is_some()
    }

    /// Grants `address` on `chain_id` to the origin, replacing any existing grant.
    pub fn set(
        &self,
        origin: impl IntoOrigin,
        address: Address,
        chain_id: ChainId,
    ) -> Result<PermissionGrant> {
        let origin = origin.into_origin()?;
        let current = PermissionGrant::new(origin.clone(), address, chain_id);
        // changes are emitted under the write lock so listeners see them in write order
        let mut inner = self.inner.write();
        inner.known.insert(origin.clone());
        let previous = inner.grants.insert(origin, current.clone());
        debug!(target: "bridge::store", origin = %current.origin, %address, chain_id, "grant set");
        self.listeners.notify(StateChange::GrantChanged { previous, current: current.clone() });
        Ok(current)
    }

    /// Removes the grant of the origin, returning it. Clearing an origin without a grant is a
    /// no-op.
    pub fn clear(&self, origin: impl IntoOrigin) -> Result<Option<PermissionGrant>> {
        let origin = origin.into_origin()?;
        let mut inner = self.inner.write();
        let removed = inner.grants.remove(&origin);
        if let Some(grant) = &removed {
            debug!(target: "bridge::store", %origin, "grant cleared");
            self.listeners.notify(StateChange::GrantRemoved { grant: grant.clone() });
        } else {
            trace!(target: "bridge::store", %origin, "no grant to clear");
        }
        Ok(removed)
    }

    /// Disconnects the origin from the wallet side: clears its grant and forgets any
    /// auto-connect preference.
    pub fn disconnect(&self, origin: impl IntoOrigin) -> Result<Option<PermissionGrant>> {
        let origin = origin.into_origin()?;
        self.inner.write().auto_connect.remove(&origin);
        self.clear(origin)
    }

    /// Switches the account connected to an origin.
    pub fn set_account(&self, origin: impl IntoOrigin, address: Address) -> Result<PermissionGrant> {
        self.update(origin, |grant| grant.address = address)
    }

    /// Switches the chain of a connected origin.
    pub fn set_chain(&self, origin: impl IntoOrigin, chain_id: ChainId) -> Result<PermissionGrant> {
        self.update(origin, |grant| grant.chain_id = chain_id)
    }

    fn update(
        &self,
        origin: impl IntoOrigin,
        f: impl FnOnce(&mut PermissionGrant),
    ) -> Result<PermissionGrant> {
        let origin = origin.into_origin()?;
        let mut inner = self.inner.write();
        let grant = inner.grants.get_mut(&origin).ok_or(BridgeError::Unauthorized)?;
        let previous = grant.clone();
        f(grant);
        let current = grant.clone();
        debug!(target: "bridge::store", %origin, address = %current.address, chain_id = current.chain_id, "grant updated");
        self.listeners
            .notify(StateChange::GrantChanged { previous: Some(previous), current: current.clone() });
        Ok(current)
    }

    /// Wallet wide reset: drops every grant, preference and known origin.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let removed = std::mem::take(&mut *inner);
        debug!(target: "bridge::store", grants = removed.grants.len(), "permissions reset");
        for grant in removed.grants.into_values() {
            self.listeners.notify(StateChange::GrantRemoved { grant });
        }
    }

    /// Remembers the address an origin may be reconnected with without asking.
    pub fn remember(&self, origin: impl IntoOrigin, address: Address) -> Result<()> {
        let origin = origin.into_origin()?;
        self.inner.write().auto_connect.insert(origin, address);
        Ok(())
    }

    /// Takes the remembered address of an origin. A preference is good for one reconnect.
    pub fn take_remembered(&self, origin: &Origin) -> Option<Address> {
        self.inner.write().auto_connect.remove(origin)
    }

    /// Whether the origin was connected before.
    pub fn is_known(&self, origin: &Origin) -> bool {
        self.inner.read().known.contains(origin)
    }

    /// Returns all grants
    pub fn grants(&self) -> Vec<PermissionGrant> {
        self.inner.read().grants.values().cloned().collect()
    }

    pub fn snapshot(&self) -> PermissionSnapshot {
        let inner = self.inner.read();
        PermissionSnapshot {
            grants: inner.grants.values().cloned().collect(),
            auto_connect: inner.auto_connect.clone(),
            known_origins: inner.known.clone(),
        }
    }

    /// Replaces the whole state with the snapshot. Meant for startup, no changes are emitted.
    pub fn restore(&self, snapshot: PermissionSnapshot) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.grants =
            snapshot.grants.into_iter().map(|grant| (grant.origin.clone(), grant)).collect();
        inner.known = snapshot.known_origins;
        inner.known.extend(inner.grants.keys().cloned());
        inner.auto_connect = snapshot.auto_connect;
    }

    /// Returns a stream of grant changes
    pub fn changes(&self) -> UnboundedReceiver<StateChange> {
        self.listeners.subscribe()
    }
}
