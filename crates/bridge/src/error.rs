//! Aggregated error type for the bridge

use crate::{approval::RejectReason, signer::SignerError};
use alloy_primitives::{Address, ChainId};
use provider_bridge_core::{HexChainId, OriginError};
use provider_bridge_rpc::{
    error::{ErrorCode, RpcError},
    response::ResponseResult,
};
use serde::Serialize;
use tracing::error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    InvalidOrigin(#[from] OriginError),
    #[error("The requested account and/or method has not been authorized by the user.")]
    Unauthorized,
    #[error("Account {requested} is not the account {granted} connected to this site")]
    AccountMismatch { requested: Address, granted: Address },
    #[error(
        "Unrecognized chain ID \"{}\". Try adding the chain using wallet_addEthereumChain first.",
        hex_id(.0)
    )]
    UnrecognizedChain(ChainId),
    #[error("The method \"{0}\" is not supported")]
    UnsupportedMethod(String),
    #[error("User rejected the request ({0})")]
    UserRejected(RejectReason),
    #[error("{0}")]
    InvalidParams(String),
    /// The frame is not a valid call
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upstream service unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// An error relayed verbatim from a network endpoint
    #[error("{0}")]
    Rpc(RpcError),
    #[error("Internal error: {0}")]
    Internal(String),
}

fn hex_id(id: &ChainId) -> HexChainId {
    HexChainId(*id)
}

impl BridgeError {
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The code delivered to the page for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidOrigin(_) | Self::Unauthorized | Self::AccountMismatch { .. } => {
                ErrorCode::Unauthorized
            }
            Self::UnrecognizedChain(_) => ErrorCode::UnrecognizedChain,
            Self::UnsupportedMethod(_) => ErrorCode::UnsupportedMethod,
            Self::UserRejected(_) => ErrorCode::UserRejected,
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Rpc(err) => err.code,
            Self::UpstreamUnavailable(_) | Self::Signer(_) | Self::Internal(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

impl From<RpcError> for BridgeError {
    fn from(err: RpcError) -> Self {
        Self::Rpc(err)
    }
}

impl From<BridgeError> for RpcError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Rpc(err) => err,
            err => Self::with_message(err.code(), err.to_string()),
        }
    }
}

/// Helper trait to easily convert results to rpc results
pub trait ToRpcResponseResult {
    fn to_rpc_result(self) -> ResponseResult;
}

/// Converts a serializable value into a `ResponseResult`
pub fn to_rpc_result<T: Serialize>(val: T) -> ResponseResult {
    match serde_json::to_value(val) {
        Ok(success) => ResponseResult::Success(success),
        Err(err) => {
            error!(target: "bridge::dispatch", "Failed serialize rpc response: {:?}", err);
            ResponseResult::error(RpcError::internal_error())
        }
    }
}

impl<T: Serialize> ToRpcResponseResult for Result<T> {
    fn to_rpc_result(self) -> ResponseResult {
        match self {
            Ok(val) => to_rpc_result(val),
            Err(err) => {
                if let BridgeError::Signer(err) = &err {
                    error!(target: "bridge::dispatch", %err, "signer failed");
                }
                RpcError::from(err).into()
            }
        }
    }
}
