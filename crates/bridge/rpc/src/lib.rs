//! Wire envelope for the page ↔ host provider channel.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

/// Error bindings
pub mod error;

/// Page → host frames
pub mod request;

/// Host → page frames
pub mod response;
