// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Gateway error taxonomy.
//!
//! Three families: client protocol errors (malformed message, unknown session),
//! backend failures (`BackendUnavailable`), and internal invariant violations.
//! Every variant maps to one JSON-RPC error code and one HTTP status.

use crate::gateway_core::constants::jsonrpc;
use crate::gateway_core::models::JsonRpcError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    /// Unknown, expired or terminated session.
    #[error("Session {0} not found, reinitialize required")]
    SessionNotFound(String),

    #[error("Adapter not found: {0}")]
    AdapterNotFound(String),

    #[error("Backend for adapter '{adapter}' unavailable: {reason}")]
    BackendUnavailable { adapter: String, reason: String },

    /// Error object authored by the backend itself, passed through untouched.
    #[error("Backend error {}: {}", .0.code, .0.message)]
    Backend(JsonRpcError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn backend_unavailable(adapter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            adapter: adapter.into(),
            reason: reason.into(),
        }
    }

    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            GatewayError::Parse(_) => jsonrpc::ERROR_PARSE,
            GatewayError::InvalidRequest(_)
            | GatewayError::UnsupportedProtocolVersion(_)
            | GatewayError::AdapterNotFound(_) => jsonrpc::ERROR_INVALID_REQUEST,
            GatewayError::InvalidParams(_) => jsonrpc::ERROR_INVALID_PARAMS,
            GatewayError::MethodNotFound(_) => jsonrpc::ERROR_METHOD_NOT_FOUND,
            GatewayError::SessionNotFound(_) => jsonrpc::ERROR_REINITIALIZE_REQUIRED,
            GatewayError::BackendUnavailable { .. } => jsonrpc::ERROR_BACKEND_UNAVAILABLE,
            GatewayError::Backend(e) => e.code,
            GatewayError::Internal(_) | GatewayError::Configuration(_) => jsonrpc::ERROR_INTERNAL,
        }
    }

    /// HTTP status used when the error is the whole answer to a POST.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Parse(_)
            | GatewayError::InvalidRequest(_)
            | GatewayError::UnsupportedProtocolVersion(_) => 400,
            GatewayError::SessionNotFound(_) | GatewayError::AdapterNotFound(_) => 404,
            GatewayError::BackendUnavailable { .. } => 502,
            GatewayError::InvalidParams(_)
            | GatewayError::MethodNotFound(_)
            | GatewayError::Backend(_) => 200,
            GatewayError::Internal(_) | GatewayError::Configuration(_) => 500,
        }
    }

    /// Client protocol errors are never counted against the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GatewayError::Parse(_)
                | GatewayError::InvalidRequest(_)
                | GatewayError::InvalidParams(_)
                | GatewayError::MethodNotFound(_)
                | GatewayError::UnsupportedProtocolVersion(_)
                | GatewayError::SessionNotFound(_)
                | GatewayError::AdapterNotFound(_)
        )
    }

    pub fn is_backend_failure(&self) -> bool {
        matches!(self, GatewayError::BackendUnavailable { .. })
    }

    /// Message safe to hand back to clients; configuration details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Backend(e) => e.message.clone(),
            GatewayError::Configuration(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            GatewayError::Backend(e) => e.clone(),
            other => JsonRpcError {
                code: other.jsonrpc_code(),
                message: other.user_message(),
                data: None,
            },
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::Parse("x".into()).http_status(), 400);
        assert_eq!(GatewayError::SessionNotFound("s".into()).http_status(), 404);
        assert_eq!(
            GatewayError::backend_unavailable("a", "exit").http_status(),
            502
        );
        assert_eq!(GatewayError::Internal("x".into()).http_status(), 500);
        assert_eq!(GatewayError::MethodNotFound("m".into()).http_status(), 200);
    }

    #[test]
    fn test_reinitialize_code_is_distinct_from_internal() {
        let err = GatewayError::SessionNotFound("abc".into());
        assert_eq!(err.jsonrpc_code(), jsonrpc::ERROR_REINITIALIZE_REQUIRED);
        assert_ne!(err.jsonrpc_code(), jsonrpc::ERROR_INTERNAL);
        assert!(err.is_client_error());
        assert!(!err.is_backend_failure());
    }

    #[test]
    fn test_backend_error_passthrough() {
        let inner = JsonRpcError {
            code: -32099,
            message: "tool exploded".into(),
            data: Some(serde_json::json!({"detail": 1})),
        };
        let err = GatewayError::Backend(inner.clone());
        assert_eq!(err.to_jsonrpc_error(), inner);
        assert_eq!(err.jsonrpc_code(), -32099);
    }

    #[test]
    fn test_configuration_message_hidden() {
        let err = GatewayError::Configuration("/etc/secret/adapters.yaml unreadable".into());
        assert_eq!(err.user_message(), "Internal error");
    }
}
