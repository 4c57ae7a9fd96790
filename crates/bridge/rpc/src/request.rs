use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// Process wide counter backing [`CallId::next`].
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque correlation token joining a page call to its eventual reply.
///
/// Ids handed out by [`CallId::next`] are unique for the lifetime of the process, so calls from
/// different pages can never cross-resolve.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Returns a fresh, process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Represents the `params` of a call
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestParams {
    /// no params
    #[default]
    None,
    /// params by position
    Array(Vec<serde_json::Value>),
    /// params by name
    Object(serde_json::Map<String, serde_json::Value>),
}

impl From<RequestParams> for serde_json::Value {
    fn from(params: RequestParams) -> Self {
        match params {
            RequestParams::None => Self::Array(Vec::new()),
            RequestParams::Array(arr) => arr.into(),
            RequestParams::Object(obj) => obj.into(),
        }
    }
}

impl From<Vec<serde_json::Value>> for RequestParams {
    fn from(params: Vec<serde_json::Value>) -> Self {
        Self::Array(params)
    }
}

/// The frame a page sends to the host: `{ method, params, id }`.
///
/// The calling origin is deliberately absent, the host derives it from the page's own navigation
/// state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCall {
    pub method: String,
    #[serde(default, skip_serializing_if = "is_none_params")]
    pub params: RequestParams,
    pub id: CallId,
}

impl ProviderCall {
    pub fn new(method: impl Into<String>, params: RequestParams, id: CallId) -> Self {
        Self { method: method.into(), params, id }
    }
}

fn is_none_params(params: &RequestParams) -> bool {
    matches!(params, RequestParams::None)
}

/// Legacy `sendAsync` payload, a full JSON-RPC 2.0 request object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcPayload {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: RequestParams,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}
