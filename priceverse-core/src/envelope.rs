//! RPC envelope types
//!
//! The request/response wire shapes shared by the server and any client.
//! Success and failure replies echo the request id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, ErrorCode};

/// Inbound request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub input: Value,
}

/// Error body carried on failure replies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<CoreError> for RpcError {
    fn from(err: CoreError) -> Self {
        let err = err.sanitized();
        Self {
            code: err.code,
            message: err.message,
            details: err.details,
        }
    }
}

/// Outbound response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Success {
        id: String,
        success: bool,
        data: Value,
    },
    Failure {
        id: String,
        success: bool,
        error: RpcError,
    },
}

impl RpcResponse {
    pub fn ok(id: impl Into<String>, data: Value) -> Self {
        RpcResponse::Success {
            id: id.into(),
            success: true,
            data,
        }
    }

    pub fn err(id: impl Into<String>, error: CoreError) -> Self {
        RpcResponse::Failure {
            id: id.into(),
            success: false,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses() {
        let raw = r#"{
            "id": "req-1",
            "version": "2.0",
            "timestamp": "2024-06-15T10:00:00Z",
            "service": "PricesService@2.0.0",
            "method": "getPrice",
            "input": {"pair": "btc-usd"}
        }"#;
        let req: RpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.service, "PricesService@2.0.0");
        assert_eq!(req.input["pair"], "btc-usd");
    }

    #[test]
    fn test_failure_reply_shape() {
        let resp = RpcResponse::err("req-2", CoreError::invalid_params("missing pair"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "INVALID_PARAMS");
    }

    #[test]
    fn test_internal_errors_sanitized_on_wire() {
        let resp = RpcResponse::err("req-3", CoreError::database("connection refused"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(json["error"]["message"], "internal error");
    }
}
