//! Turns permission and chain mutations into provider events for loaded pages

use alloy_primitives::ChainId;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use parking_lot::Mutex;
use provider_bridge_core::{HexChainId, Origin, PermissionGrant, event::ProviderEvent};
use std::sync::Arc;

/// A mutation of the permission store or the active chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateChange {
    /// A grant was written, `previous` is the grant it replaced
    GrantChanged { previous: Option<PermissionGrant>, current: PermissionGrant },
    /// A grant was removed
    GrantRemoved { grant: PermissionGrant },
    /// The wallet wide active chain changed
    ActiveChainChanged { previous: ChainId, current: ChainId },
}

/// Which pages an event is meant for
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    /// Every page loaded from the origin
    Origin(Origin),
    /// Every page whose origin holds no grant, they follow the wallet's active chain
    Unconnected,
}

/// Listeners of [`StateChange`]s, shared by the clones of a store.
#[derive(Clone, Debug, Default)]
pub struct ChangeListeners {
    listeners: Arc<Mutex<Vec<UnboundedSender<StateChange>>>>,
}

impl ChangeListeners {
    /// Returns a new stream of all changes made from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<StateChange> {
        let (tx, rx) = unbounded();
        self.listeners.lock().push(tx);
        rx
    }

    /// Sends the change to every listener, dropping the ones that went away.
    pub fn notify(&self, change: StateChange) {
        self.listeners.lock().retain(|listener| listener.unbounded_send(change.clone()).is_ok());
    }
}

/// Maps a change to the events pages must see.
///
/// `active_chain` is the wallet's active chain when the change is delivered. A fresh grant on a
/// chain other than it means the page saw a different chain before connecting.
pub fn events_for(change: &StateChange, active_chain: ChainId) -> Vec<(Audience, ProviderEvent)> {
    let mut events = Vec::new();
    match change {
        StateChange::GrantChanged { previous, current } => {
            let audience = Audience::Origin(current.origin.clone());
            let (address_changed, chain_changed) = match previous {
                Some(previous) => {
                    (previous.address != current.address, previous.chain_id != current.chain_id)
                }
                None => (true, current.chain_id != active_chain),
            };
            if address_changed {
                events.push((
                    audience.clone(),
                    ProviderEvent::AccountsChanged(vec![current.address]),
                ));
            }
            if chain_changed {
                events.push((audience, ProviderEvent::ChainChanged(HexChainId(current.chain_id))));
            }
        }
        StateChange::GrantRemoved { grant } => {
            events.push((
                Audience::Origin(grant.origin.clone()),
                ProviderEvent::AccountsChanged(Vec::new()),
            ));
            if grant.chain_id != active_chain {
                // the page falls back to the wallet's chain
                events.push((
                    Audience::Origin(grant.origin.clone()),
                    ProviderEvent::ChainChanged(HexChainId(active_chain)),
                ));
            }
        }
        StateChange::ActiveChainChanged { previous, current } => {
            if previous != current {
                events.push((Audience::Unconnected, ProviderEvent::ChainChanged(HexChainId(*current))));
            }
        }
    }
    events
}
