//! JSON-RPC 2.0 framing
//!
//! Every frame is one JSON object on its own line. Requests carry a numeric
//! id, notifications do not, and responses echo the id of their request.

use quarry_core::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notification carrying a progress value for a token
pub const PROGRESS_NOTIFICATION: &str = "$/progress";

/// Notification asking the peer to stop working on a request
pub const CANCEL_NOTIFICATION: &str = "$/cancelRequest";

pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const REQUEST_CANCELLED: i64 = -32800;
}

/// Error object of a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Map a handler failure onto the wire
    pub fn from_error(error: &QuarryError) -> Self {
        match error {
            QuarryError::Cancelled => Self::new(error_codes::REQUEST_CANCELLED, "Request cancelled"),
            QuarryError::Rpc { code, message } => Self::new(*code, message.clone()),
            other => Self::new(error_codes::INTERNAL_ERROR, other.to_string()),
        }
    }

    pub fn into_error(self) -> QuarryError {
        match self.code {
            error_codes::REQUEST_CANCELLED => QuarryError::Cancelled,
            code => QuarryError::Rpc {
                code,
                message: self.message,
            },
        }
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request {
        id: u64,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: u64,
        result: std::result::Result<Value, RpcErrorObject>,
    },
}

#[derive(Serialize, Deserialize)]
struct RawMessage {
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorObject>,
}

impl RawMessage {
    fn empty() -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }
}

impl RpcMessage {
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        RpcMessage::Notification {
            method: method.into(),
            params,
        }
    }

    /// Encode as a single line (without the trailing newline)
    pub fn encode(&self) -> Result<String> {
        let mut raw = RawMessage::empty();
        match self {
            RpcMessage::Request { id, method, params } => {
                raw.id = Some(*id);
                raw.method = Some(method.clone());
                raw.params = Some(params.clone());
            }
            RpcMessage::Notification { method, params } => {
                raw.method = Some(method.clone());
                raw.params = Some(params.clone());
            }
            RpcMessage::Response { id, result } => {
                raw.id = Some(*id);
                match result {
                    Ok(value) => raw.result = Some(value.clone()),
                    Err(error) => raw.error = Some(error.clone()),
                }
            }
        }
        Ok(serde_json::to_string(&raw)?)
    }

    pub fn decode(line: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(line)?;
        let params = raw.params.unwrap_or(Value::Null);

        match (raw.id, raw.method) {
            (Some(id), Some(method)) => Ok(RpcMessage::Request { id, method, params }),
            (None, Some(method)) => Ok(RpcMessage::Notification { method, params }),
            (Some(id), None) => {
                let result = match raw.error {
                    Some(error) => Err(error),
                    // `"result": null` decodes as None
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                };
                Ok(RpcMessage::Response { id, result })
            }
            (None, None) => Err(QuarryError::Transport(
                "frame has neither an id nor a method".to_string(),
            )),
        }
    }
}
