/// A `info!` helper macro that emits to the target, the wallet user logger listens for
macro_rules! bridge_info {
    ($($arg:tt)*) => {
        tracing::info!(target: $crate::logging::BRIDGE_USER_LOG_TARGET, $($arg)*);
    };
}

pub(crate) use bridge_info;
