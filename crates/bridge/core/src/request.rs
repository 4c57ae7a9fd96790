//! The methods a page may call through the provider

use crate::{
    chain::{AddChainParams, SwitchChainParams},
    serde_helpers::{empty_params, sequence},
};
use alloy_dyn_abi::TypedData;
use alloy_primitives::{Address, Bytes, ChainId, hex};
use alloy_rpc_types::TransactionRequest;
use provider_bridge_rpc::{
    error::{ErrorCode, RpcError},
    request::RequestParams,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Permissions requested or revoked through EIP-2255, keyed by capability name.
pub type PermissionRequest = BTreeMap<String, serde_json::Value>;

/// Methods the wallet answers itself. Anything here that fails to deserialize is an
/// `InvalidParams` error rather than an unsupported method.
pub const WALLET_METHODS: &[&str] = &[
    "eth_chainId",
    "net_version",
    "eth_accounts",
    "eth_coinbase",
    "eth_requestAccounts",
    "wallet_requestPermissions",
    "wallet_getPermissions",
    "wallet_revokePermissions",
    "eth_sendTransaction",
    "eth_signTransaction",
    "personal_sign",
    "eth_sign",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
    "wallet_switchEthereumChain",
    "wallet_addEthereumChain",
];

/// Generic chain reads relayed verbatim to the network endpoint of the selected chain.
pub const PASSTHROUGH_METHODS: &[&str] = &[
    "eth_blockNumber",
    "eth_call",
    "eth_estimateGas",
    "eth_feeHistory",
    "eth_gasPrice",
    "eth_getBalance",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getBlockTransactionCountByHash",
    "eth_getBlockTransactionCountByNumber",
    "eth_getCode",
    "eth_getLogs",
    "eth_getStorageAt",
    "eth_getTransactionByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "eth_maxPriorityFeePerGas",
    "eth_sendRawTransaction",
    "eth_syncing",
    "net_listening",
    "web3_clientVersion",
];

/// Represents a call a page made through the provider
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ProviderRequest {
    #[serde(rename = "eth_chainId", with = "empty_params")]
    EthChainId(()),

    #[serde(rename = "net_version", with = "empty_params")]
    NetVersion(()),

    #[serde(rename = "eth_accounts", with = "empty_params")]
    EthAccounts(()),

    #[serde(rename = "eth_coinbase", with = "empty_params")]
    EthCoinbase(()),

    #[serde(rename = "eth_requestAccounts", with = "empty_params")]
    EthRequestAccounts(()),

    #[serde(rename = "wallet_requestPermissions", with = "sequence")]
    RequestPermissions(PermissionRequest),

    #[serde(rename = "wallet_getPermissions", with = "empty_params")]
    GetPermissions(()),

    #[serde(rename = "wallet_revokePermissions", with = "sequence")]
    RevokePermissions(PermissionRequest),

    #[serde(rename = "eth_sendTransaction", with = "sequence")]
    EthSendTransaction(Box<TransactionRequest>),

    #[serde(rename = "eth_signTransaction", with = "sequence")]
    EthSignTransaction(Box<TransactionRequest>),

    /// `personal_sign(data, address)`
    #[serde(rename = "personal_sign")]
    PersonalSign(String, Address),

    /// `eth_sign(address, data)`, note the reversed order
    #[serde(rename = "eth_sign")]
    EthSign(Address, String),

    #[serde(rename = "eth_signTypedData_v3")]
    EthSignTypedDataV3(Address, Box<TypedData>),

    #[serde(rename = "eth_signTypedData_v4")]
    EthSignTypedDataV4(Address, Box<TypedData>),

    #[serde(rename = "wallet_switchEthereumChain", with = "sequence")]
    SwitchChain(SwitchChainParams),

    #[serde(rename = "wallet_addEthereumChain", with = "sequence")]
    AddChain(Box<AddChainParams>),

    /// A generic chain read, forwarded untouched
    #[serde(skip)]
    Passthrough { method: String, params: serde_json::Value },
}

impl ProviderRequest {
    /// Parses a `(method, params)` pair received from a page.
    ///
    /// Unknown methods yield `UnsupportedMethod`, known methods with malformed params yield
    /// `InvalidParams`.
    pub fn from_call(method: &str, params: RequestParams) -> Result<Self, RpcError> {
        if PASSTHROUGH_METHODS.contains(&method) {
            return Ok(Self::Passthrough { method: method.to_string(), params: params.into() });
        }
        if !WALLET_METHODS.contains(&method) {
            return Err(RpcError::with_message(
                ErrorCode::UnsupportedMethod,
                format!("The method \"{method}\" is not supported"),
            ));
        }
        let call = serde_json::json!({
            "method": method,
            "params": serde_json::Value::from(params),
        });
        serde_json::from_value(call).map_err(|err| {
            RpcError::invalid_params(format!("Invalid params for {method}: {err}"))
        })
    }

    /// The wire name of the method.
    pub fn method(&self) -> &str {
        match self {
            Self::EthChainId(_) => "eth_chainId",
            Self::NetVersion(_) => "net_version",
            Self::EthAccounts(_) => "eth_accounts",
            Self::EthCoinbase(_) => "eth_coinbase",
            Self::EthRequestAccounts(_) => "eth_requestAccounts",
            Self::RequestPermissions(_) => "wallet_requestPermissions",
            Self::GetPermissions(_) => "wallet_getPermissions",
            Self::RevokePermissions(_) => "wallet_revokePermissions",
            Self::EthSendTransaction(_) => "eth_sendTransaction",
            Self::EthSignTransaction(_) => "eth_signTransaction",
            Self::PersonalSign(..) => "personal_sign",
            Self::EthSign(..) => "eth_sign",
            Self::EthSignTypedDataV3(..) => "eth_signTypedData_v3",
            Self::EthSignTypedDataV4(..) => "eth_signTypedData_v4",
            Self::SwitchChain(_) => "wallet_switchEthereumChain",
            Self::AddChain(_) => "wallet_addEthereumChain",
            Self::Passthrough { method, .. } => method,
        }
    }

    pub fn kind(&self) -> MethodKind {
        match self {
            Self::EthRequestAccounts(_) | Self::RequestPermissions(_) => MethodKind::Connect,
            Self::EthSendTransaction(_) | Self::EthSignTransaction(_) => {
                MethodKind::SignTransaction
            }
            Self::PersonalSign(..) | Self::EthSign(..) => MethodKind::SignMessage,
            Self::EthSignTypedDataV3(..) | Self::EthSignTypedDataV4(..) => {
                MethodKind::SignTypedData
            }
            Self::SwitchChain(_) => MethodKind::SwitchChain,
            Self::AddChain(_) => MethodKind::AddChain,
            Self::EthChainId(_) |
            Self::NetVersion(_) |
            Self::EthAccounts(_) |
            Self::EthCoinbase(_) |
            Self::GetPermissions(_) |
            Self::RevokePermissions(_) |
            Self::Passthrough { .. } => MethodKind::ReadOnlyRpc,
        }
    }

    /// The account a signing request claims to sign with.
    ///
    /// Returns `None` for non-signing requests and for transactions without a `from`.
    pub fn claimed_signer(&self) -> Option<Address> {
        match self {
            Self::EthSendTransaction(tx) | Self::EthSignTransaction(tx) => tx.from,
            Self::PersonalSign(_, address) |
            Self::EthSign(address, _) |
            Self::EthSignTypedDataV3(address, _) |
            Self::EthSignTypedDataV4(address, _) => Some(*address),
            _ => None,
        }
    }

    /// The chain a signing payload is bound to, if it names one.
    ///
    /// A typed data domain chain id that doesn't fit a `u64` is returned as an error message.
    pub fn bound_chain_id(&self) -> Result<Option<ChainId>, String> {
        match self {
            Self::EthSendTransaction(tx) | Self::EthSignTransaction(tx) => Ok(tx.chain_id),
            Self::EthSignTypedDataV3(_, data) | Self::EthSignTypedDataV4(_, data) => data
                .domain
                .chain_id
                .map(|id| {
                    u64::try_from(id).map_err(|_| format!("domain chainId {id} is out of range"))
                })
                .transpose(),
            _ => Ok(None),
        }
    }

    /// The payload handed to the signer once the request has been approved.
    pub fn sign_payload(&self) -> Option<SignPayload> {
        let payload = match self {
            Self::EthSendTransaction(tx) => {
                SignPayload::Transaction { request: tx.clone(), broadcast: true }
            }
            Self::EthSignTransaction(tx) => {
                SignPayload::Transaction { request: tx.clone(), broadcast: false }
            }
            Self::PersonalSign(data, _) | Self::EthSign(_, data) => {
                SignPayload::Message(message_bytes(data))
            }
            Self::EthSignTypedDataV3(_, data) | Self::EthSignTypedDataV4(_, data) => {
                SignPayload::TypedData(data.clone())
            }
            _ => return None,
        };
        Some(payload)
    }
}

/// The kind of a pending request, which decides how the dispatcher routes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MethodKind {
    Connect,
    SignTransaction,
    SignMessage,
    SignTypedData,
    SwitchChain,
    AddChain,
    /// Reads and grant revocation, answered without a human decision
    ReadOnlyRpc,
}

impl MethodKind {
    pub fn is_signing(&self) -> bool {
        matches!(self, Self::SignTransaction | Self::SignMessage | Self::SignTypedData)
    }
}

/// A validated payload for the signing capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignPayload {
    /// A transaction. With `broadcast` set the signer submits it and returns the hash, otherwise
    /// it returns the signed raw transaction.
    Transaction { request: Box<TransactionRequest>, broadcast: bool },
    /// Raw message bytes for a `personal_sign` style signature
    Message(Bytes),
    /// EIP-712 typed data
    TypedData(Box<TypedData>),
}

/// Decodes the data of a message signing request: `0x` hex if it is valid hex, otherwise the
/// UTF-8 bytes of the text.
pub fn message_bytes(data: &str) -> Bytes {
    if data.starts_with("0x") &&
        let Ok(bytes) = hex::decode(data)
    {
        return bytes.into();
    }
    Bytes::copy_from_slice(data.as_bytes())
}
