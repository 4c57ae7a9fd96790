//! # provider-bridge-core
//!
//! Core types for the provider bridge: normalized origins, grants, the method enum a page may
//! call, risk verdicts and the events pushed back into pages.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod chain;
pub mod event;
pub mod origin;
pub mod permission;
pub mod request;
pub mod risk;
pub mod serde_helpers;

pub use chain::{ChainDescriptor, ChainRegistry, HexChainId};
pub use origin::{IntoOrigin, Origin, OriginError};
pub use permission::PermissionGrant;
pub use request::{MethodKind, ProviderRequest};
pub use risk::{Finding, RiskLevel, RiskVerdict};
