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

//! Protocol Handler.
//!
//! Validates and shapes MCP messages before they reach the router. Nothing
//! here knows about HTTP or about backends.

use crate::gateway_core::constants::{jsonrpc, methods};
use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::models::{JsonRpcRequest, JsonRpcResponse};
use crate::protocol::negotiation::HandshakeManager;
use serde_json::Value;

/// One decoded client message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Carries an id and expects exactly one response.
    Request(JsonRpcRequest),
    Notification(JsonRpcRequest),
    /// The client answering a server-initiated request.
    Response(Value),
}

impl IncomingMessage {
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) | Self::Notification(r) => Some(&r.method),
            Self::Response(_) => None,
        }
    }

    /// Id to echo on an error reply; `null` when there is none.
    pub fn reply_id(&self) -> Value {
        match self {
            Self::Request(r) => r.id.clone().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    pub fn is_initialize(&self) -> bool {
        matches!(self, Self::Request(r) if r.method == methods::INITIALIZE)
    }
}

/// What an `initialize` request asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client_info: Option<Value>,
}

pub struct ProtocolHandler;

impl ProtocolHandler {
    /// Decode one POST body. Batches are not accepted.
    pub fn classify(body: &[u8]) -> Result<IncomingMessage, GatewayError> {
        let value: Value = serde_json::from_slice(body)?;
        let obj = match &value {
            Value::Object(obj) => obj,
            Value::Array(_) => {
                return Err(GatewayError::InvalidRequest(
                    "batch requests are not supported".into(),
                ))
            }
            _ => {
                return Err(GatewayError::InvalidRequest(
                    "message must be a JSON object".into(),
                ))
            }
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(jsonrpc::VERSION) {
            return Err(GatewayError::InvalidRequest("jsonrpc must be \"2.0\"".into()));
        }
        if let Some(id) = obj.get("id") {
            if !matches!(id, Value::String(_) | Value::Number(_) | Value::Null) {
                return Err(GatewayError::InvalidRequest(
                    "id must be a string or a number".into(),
                ));
            }
        }

        match obj.get("method") {
            Some(Value::String(_)) => {
                if let Some(params) = obj.get("params") {
                    if !matches!(params, Value::Object(_) | Value::Array(_)) {
                        return Err(GatewayError::InvalidRequest(
                            "params must be an object or an array".into(),
                        ));
                    }
                }
                let request: JsonRpcRequest = serde_json::from_value(value)
                    .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
                Ok(if request.id.is_some() {
                    IncomingMessage::Request(request)
                } else {
                    IncomingMessage::Notification(request)
                })
            }
            Some(_) => Err(GatewayError::InvalidRequest("method must be a string".into())),
            None if obj.contains_key("id")
                && (obj.contains_key("result") || obj.contains_key("error")) =>
            {
                Ok(IncomingMessage::Response(value))
            }
            None => Err(GatewayError::InvalidRequest("missing method".into())),
        }
    }

    /// A present `MCP-Protocol-Version` header must name a supported revision.
    pub fn check_protocol_header(value: Option<&str>) -> Result<(), GatewayError> {
        match value {
            None => Ok(()),
            Some(v) if HandshakeManager::is_supported(v) => Ok(()),
            Some(v) => Err(GatewayError::UnsupportedProtocolVersion(v.to_string())),
        }
    }

    pub fn validate_initialize(request: &JsonRpcRequest) -> Result<InitializeParams, GatewayError> {
        let params = request
            .params
            .as_ref()
            .and_then(Value::as_object)
            .ok_or_else(|| GatewayError::InvalidParams("initialize requires params".into()))?;
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidParams("protocolVersion is required".into()))?;
        Ok(InitializeParams {
            protocol_version: protocol_version.to_string(),
            client_info: params.get("clientInfo").cloned(),
        })
    }

    /// Version to record for the session: the backend's answer, or what the
    /// gateway would negotiate for the client's request.
    pub fn agreed_version(requested: &InitializeParams, backend_result: &Value) -> String {
        backend_result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| HandshakeManager::negotiate(&requested.protocol_version).to_string())
    }

    pub fn error_response(id: Value, error: &GatewayError) -> JsonRpcResponse {
        JsonRpcResponse::failure(id, error.to_jsonrpc_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_kinds() {
        let req = ProtocolHandler::classify(br#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
        assert!(matches!(req, IncomingMessage::Request(_)));
        assert_eq!(req.reply_id(), json!(7));

        let note = ProtocolHandler::classify(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(note, IncomingMessage::Notification(_)));

        let resp = ProtocolHandler::classify(br#"{"jsonrpc":"2.0","id":"s-1","result":{}}"#).unwrap();
        assert!(matches!(resp, IncomingMessage::Response(_)));
        assert_eq!(resp.method(), None);
    }

    #[test]
    fn test_classify_rejects() {
        assert!(matches!(
            ProtocolHandler::classify(b"{not json"),
            Err(GatewayError::Parse(_))
        ));
        assert!(matches!(
            ProtocolHandler::classify(br#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            ProtocolHandler::classify(br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            ProtocolHandler::classify(br#"{"jsonrpc":"2.0","id":{},"method":"ping"}"#),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            ProtocolHandler::classify(br#"{"jsonrpc":"2.0","id":1,"method":"ping","params":3}"#),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_initialize() {
        let req = JsonRpcRequest::new(
            methods::INITIALIZE,
            Some(json!({"protocolVersion": "2024-11-05", "clientInfo": {"name": "t"}})),
            Some(json!(1)),
        );
        let params = ProtocolHandler::validate_initialize(&req).unwrap();
        assert_eq!(params.protocol_version, "2024-11-05");
        assert_eq!(params.client_info, Some(json!({"name": "t"})));

        let bare = JsonRpcRequest::new(methods::INITIALIZE, None, Some(json!(1)));
        assert!(matches!(
            ProtocolHandler::validate_initialize(&bare),
            Err(GatewayError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_protocol_header() {
        assert!(ProtocolHandler::check_protocol_header(None).is_ok());
        assert!(ProtocolHandler::check_protocol_header(Some("2025-06-18")).is_ok());
        assert!(matches!(
            ProtocolHandler::check_protocol_header(Some("2030-01-01")),
            Err(GatewayError::UnsupportedProtocolVersion(_))
        ));
    }

    #[test]
    fn test_agreed_version_prefers_backend() {
        let params = InitializeParams {
            protocol_version: "2024-11-05".into(),
            client_info: None,
        };
        assert_eq!(
            ProtocolHandler::agreed_version(&params, &json!({"protocolVersion": "2025-03-26"})),
            "2025-03-26"
        );
        assert_eq!(ProtocolHandler::agreed_version(&params, &json!({})), "2024-11-05");
    }
}
