use crate::{
    error::{ErrorCode, RpcError},
    request::CallId,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeMap};
use std::borrow::Cow;

/// Represents the result of a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseResult {
    Success(serde_json::Value),
    Error(RpcError),
}

impl ResponseResult {
    pub fn success<S>(content: S) -> Self
    where
        S: Serialize + 'static,
    {
        match serde_json::to_value(&content) {
            Ok(val) => Self::Success(val),
            Err(err) => Self::Error(RpcError::internal_error_with(err.to_string())),
        }
    }

    pub fn error(error: RpcError) -> Self {
        Self::Error(error)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn into_result(self) -> Result<serde_json::Value, RpcError> {
        match self {
            Self::Success(val) => Ok(val),
            Self::Error(err) => Err(err),
        }
    }
}

impl From<RpcError> for ResponseResult {
    fn from(err: RpcError) -> Self {
        Self::error(err)
    }
}

impl From<Result<serde_json::Value, RpcError>> for ResponseResult {
    fn from(res: Result<serde_json::Value, RpcError>) -> Self {
        match res {
            Ok(val) => Self::Success(val),
            Err(err) => Self::Error(err),
        }
    }
}

/// The reply frame the host writes back for a call.
///
/// Serialized as `{ id, result }` on success and `{ id, error, errorCode, errorData? }` on
/// failure. The numeric `errorCode` is authoritative, `error` is a supplementary message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderResponse {
    pub id: CallId,
    pub result: ResponseResult,
}

impl ProviderResponse {
    pub fn new(id: CallId, result: impl Into<ResponseResult>) -> Self {
        Self { id, result: result.into() }
    }
}

impl Serialize for ProviderResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.result {
            ResponseResult::Success(value) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("id", &self.id)?;
                map.serialize_entry("result", value)?;
                map.end()
            }
            ResponseResult::Error(err) => {
                let len = if err.data.is_some() { 4 } else { 3 };
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("id", &self.id)?;
                map.serialize_entry("error", &err.message)?;
                map.serialize_entry("errorCode", &err.code)?;
                if let Some(data) = &err.data {
                    map.serialize_entry("errorData", data)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ProviderResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Frame {
            id: CallId,
            #[serde(default)]
            result: Option<serde_json::Value>,
            #[serde(default)]
            error: Option<String>,
            #[serde(default)]
            error_code: Option<ErrorCode>,
            #[serde(default)]
            error_data: Option<serde_json::Value>,
        }

        let frame = Frame::deserialize(deserializer)?;
        let result = match (frame.error, frame.error_code) {
            (None, None) => ResponseResult::Success(frame.result.unwrap_or_default()),
            (message, code) => {
                let code = code.unwrap_or(ErrorCode::InternalError);
                ResponseResult::Error(RpcError {
                    message: message.map(Cow::Owned).unwrap_or(Cow::Borrowed(code.message())),
                    code,
                    data: frame.error_data,
                })
            }
        };
        Ok(Self { id: frame.id, result })
    }
}

/// Legacy `sendAsync` reply, a full JSON-RPC 2.0 response object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcReply {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcReply {
    pub fn new(id: serde_json::Value, result: Result<serde_json::Value, RpcError>) -> Self {
        let (result, error) = match result {
            Ok(val) => (Some(val), None),
            Err(err) => (None, Some(err)),
        };
        Self { jsonrpc: "2.0".to_string(), id, result, error }
    }
}
