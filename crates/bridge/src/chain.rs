//! The wallet's recognized chains and its active chain

use crate::{
    error::{BridgeError, Result},
    notifier::{ChangeListeners, StateChange},
};
use alloy_primitives::ChainId;
use futures::channel::mpsc::UnboundedReceiver;
use parking_lot::RwLock;
use provider_bridge_core::{ChainDescriptor, ChainRegistry};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct ChainState {
    registry: ChainRegistry,
    active: ChainId,
}

/// Shared selector of the active chain. All mutation goes through its methods, which notify
/// the listeners.
#[derive(Clone, Debug)]
pub struct ChainSelector {
    state: Arc<RwLock<ChainState>>,
    listeners: ChangeListeners,
}

impl ChainSelector {
    pub fn new(registry: ChainRegistry, active: ChainId) -> Self {
        Self {
            state: Arc::new(RwLock::new(ChainState { registry, active })),
            listeners: ChangeListeners::default(),
        }
    }

    /// Returns the active chain id
    pub fn active(&self) -> ChainId {
        self.state.read().active
    }

    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.state.read().registry.contains(chain_id)
    }

    pub fn get(&self, chain_id: ChainId) -> Option<ChainDescriptor> {
        self.state.read().registry.get(chain_id).cloned()
    }

    /// Returns a copy of the registry
    pub fn registry(&self) -> ChainRegistry {
        self.state.read().registry.clone()
    }

    /// Makes `chain_id` the active chain.
    ///
    /// Fails with [`BridgeError::UnrecognizedChain`] and leaves the active chain untouched if
    /// the chain is not in the registry.
    pub fn set_active(&self, chain_id: ChainId) -> Result<()> {
        let previous = {
            let mut state = self.state.write();
            if !state.registry.contains(chain_id) {
                return Err(BridgeError::UnrecognizedChain(chain_id));
            }
            std::mem::replace(&mut state.active, chain_id)
        };
        if previous != chain_id {
            debug!(target: "bridge::store", previous, current = chain_id, "active chain changed");
            self.listeners.notify(StateChange::ActiveChainChanged { previous, current: chain_id });
        }
        Ok(())
    }

    /// Adds a chain to the registry, returns false if it was already known.
    pub fn add_chain(&self, chain: ChainDescriptor) -> bool {
        let mut state = self.state.write();
        if state.registry.contains(chain.chain_id) {
            return false;
        }
        debug!(target: "bridge::store", chain_id = chain.chain_id, name = %chain.name, "chain added");
        state.registry.insert(chain);
        true
    }

    /// Returns a stream of active chain changes
    pub fn changes(&self) -> UnboundedReceiver<StateChange> {
        self.listeners.subscribe()
    }
}
