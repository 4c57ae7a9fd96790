//! User facing logs

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{Metadata, subscriber::Interest};
use tracing_subscriber::{EnvFilter, Layer, layer::Context, prelude::*};

/// The target that identifies the events intended to be logged to the wallet user
pub(crate) const BRIDGE_USER_LOG_TARGET: &str = "bridge::user";

/// A logger that listens for logs with target `bridge::user` and only lets them through if
/// logging is enabled
#[derive(Debug)]
pub struct BridgeLogLayer {
    state: LoggingManager,
}

impl BridgeLogLayer {
    pub fn new(state: LoggingManager) -> Self {
        Self { state }
    }
}

// use `Layer`'s filter function to globally enable/disable `bridge::user` events
impl<S> Layer<S> for BridgeLogLayer
where
    S: tracing::Subscriber,
{
    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        if metadata.target() == BRIDGE_USER_LOG_TARGET {
            Interest::sometimes()
        } else {
            Interest::never()
        }
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        self.state.is_enabled() && metadata.target() == BRIDGE_USER_LOG_TARGET
    }
}

/// Contains the configuration of the logger
#[derive(Clone, Debug)]
pub struct LoggingManager {
    /// Whether the logger is currently enabled
    pub enabled: Arc<RwLock<bool>>,
}

impl LoggingManager {
    /// Returns true if logging is currently enabled
    pub fn is_enabled(&self) -> bool {
        *self.enabled.read()
    }

    /// Updates the `enabled` state
    pub fn set_enabled(&self, enabled: bool) {
        let mut current = self.enabled.write();
        *current = enabled;
    }
}

impl Default for LoggingManager {
    fn default() -> Self {
        Self { enabled: Arc::new(RwLock::new(true)) }
    }
}

/// Installs a global subscriber.
///
/// If `RUST_LOG` is set its filter decides what is printed, otherwise only the `bridge::user`
/// target is printed, and only while the returned manager has logging enabled.
pub fn init_tracing() -> LoggingManager {
    let manager = LoggingManager::default();
    let _ = try_init_tracing(manager.clone());
    manager
}

/// Like [`init_tracing`] but reports whether a global subscriber was already set, which is the
/// case when several tests in one binary call it.
pub fn try_init_tracing(
    manager: LoggingManager,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(BridgeLogLayer::new(manager))
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    }
}
