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

//! Domain models for the gateway.
//!
//! Pure data structures: JSON-RPC messages, adapter definitions and
//! session identifiers. Nothing in here performs I/O.

use crate::gateway_core::constants::{jsonrpc, limits};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque session token issued by the gateway (or adopted from a client on `initialize`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random SessionId
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Session ids must be visible ASCII so they survive as header values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid session id")]
pub struct InvalidSessionId;

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty()
            || s.len() > limits::MAX_SESSION_ID_LEN
            || !s.bytes().all(|b| (0x21..=0x7e).contains(&b))
        {
            return Err(InvalidSessionId);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for SessionId {
    type Error = InvalidSessionId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc::VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// `params._meta.progressToken`, used to route progress notifications back to the caller.
    pub fn progress_token(&self) -> Option<&Value> {
        self.params
            .as_ref()
            .and_then(|p| p.get("_meta"))
            .and_then(|m| m.get("progressToken"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc::VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: jsonrpc::VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// How the gateway reaches an adapter's backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    LocalStdio,
    RemoteHttp,
    StreamableHttp,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionType::LocalStdio => "LocalStdio",
            ConnectionType::RemoteHttp => "RemoteHttp",
            ConnectionType::StreamableHttp => "StreamableHttp",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

/// Credential the gateway presents to a remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthScheme {
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    #[serde(rename = "apikey", alias = "api_key")]
    ApiKey {
        name: String,
        value: String,
        #[serde(default)]
        location: ApiKeyLocation,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequirement {
    #[serde(default)]
    pub required: bool,
    pub scheme: AuthScheme,
}

/// Adapter definition as provided by the adapter store (read-only to the gateway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterResource {
    pub name: String,
    pub connection_type: ConnectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, alias = "environmentVariables", skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthRequirement>,
}

/// What the stdio bridge needs to start one backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl AdapterResource {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            connection_type: ConnectionType::LocalStdio,
            command: Some(command.into()),
            args,
            env: HashMap::new(),
            remote_url: None,
            authentication: None,
        }
    }

    pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection_type: ConnectionType::RemoteHttp,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            remote_url: Some(url.into()),
            authentication: None,
        }
    }

    /// Launch spec for `LocalStdio` adapters. A command line given as one
    /// string with no separate args (`python3 server.py`) is split on whitespace.
    pub fn launch_spec(&self) -> Option<LaunchSpec> {
        let command = self.command.as_deref()?.trim();
        if command.is_empty() {
            return None;
        }
        let (program, mut args) = if self.args.is_empty() && command.contains(' ') {
            let mut parts = command.split_whitespace().map(str::to_string);
            let program = parts.next()?;
            (program, parts.collect::<Vec<_>>())
        } else {
            (command.to_string(), Vec::new())
        };
        args.extend(self.args.iter().cloned());
        Some(LaunchSpec {
            command: program,
            args,
            env: self.env.clone(),
        })
    }

    /// Credential to attach to outbound requests, if the adapter requires one.
    pub fn outbound_auth(&self) -> Option<&AuthScheme> {
        self.authentication
            .as_ref()
            .filter(|a| a.required)
            .map(|a| &a.scheme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_id_rejects_control_chars() {
        assert!("abc-123".parse::<SessionId>().is_ok());
        assert!("".parse::<SessionId>().is_err());
        assert!("has space".parse::<SessionId>().is_err());
        assert!("tab\there".parse::<SessionId>().is_err());
        assert!("x".repeat(200).parse::<SessionId>().is_err());
    }

    #[test]
    fn test_launch_spec_splits_single_command_line() {
        let adapter = AdapterResource::stdio("py", "python3 server.py", vec![]);
        let spec = adapter.launch_spec().unwrap();
        assert_eq!(spec.command, "python3");
        assert_eq!(spec.args, vec!["server.py".to_string()]);

        let adapter = AdapterResource::stdio("py", "python3", vec!["server.py".into()]);
        let spec = adapter.launch_spec().unwrap();
        assert_eq!(spec.command, "python3");
        assert_eq!(spec.args, vec!["server.py".to_string()]);
    }

    #[test]
    fn test_adapter_deserializes_from_camel_case() {
        let adapter: AdapterResource = serde_json::from_value(json!({
            "name": "weather",
            "connectionType": "RemoteHttp",
            "remoteUrl": "http://localhost:9000",
            "authentication": {
                "required": true,
                "scheme": {"type": "apikey", "name": "X-Key", "value": "k"}
            }
        }))
        .unwrap();
        assert_eq!(adapter.connection_type, ConnectionType::RemoteHttp);
        assert!(matches!(
            adapter.outbound_auth(),
            Some(AuthScheme::ApiKey { location: ApiKeyLocation::Header, .. })
        ));
    }

    #[test]
    fn test_progress_token_lookup() {
        let req = JsonRpcRequest::new(
            "tools/call",
            Some(json!({"name": "x", "_meta": {"progressToken": "p1"}})),
            Some(json!(1)),
        );
        assert_eq!(req.progress_token(), Some(&json!("p1")));
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let resp = JsonRpcResponse::success(json!(7), json!({"ok": true}));
        let text = serde_json::to_string(&resp).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","result":{"ok":true},"id":7}"#);
    }
}
