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

//! Gateway constants - single source of truth for wire names, codes and limits.

/// JSON-RPC 2.0 Error Codes
pub mod jsonrpc {
    /// Parse error (standard JSON-RPC)
    pub const ERROR_PARSE: i32 = -32700;
    /// Invalid request (standard JSON-RPC)
    pub const ERROR_INVALID_REQUEST: i32 = -32600;
    /// Method not found (standard JSON-RPC)
    pub const ERROR_METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params (standard JSON-RPC)
    pub const ERROR_INVALID_PARAMS: i32 = -32602;
    /// Internal error (standard JSON-RPC)
    pub const ERROR_INTERNAL: i32 = -32603;
    /// Backend process or remote endpoint unavailable (gateway code)
    pub const ERROR_BACKEND_UNAVAILABLE: i32 = -32000;
    /// Unknown or expired session, client must initialize again (gateway code)
    pub const ERROR_REINITIALIZE_REQUIRED: i32 = -32001;

    pub const VERSION: &str = "2.0";
}

/// Streamable HTTP header and query names
pub mod headers {
    pub const SESSION_ID: &str = "mcp-session-id";
    pub const PROTOCOL_VERSION: &str = "mcp-protocol-version";
    pub const SESSION_ID_QUERY: &str = "sessionId";
    pub const EVENT_STREAM: &str = "text/event-stream";
    pub const JSON: &str = "application/json";
    pub const ACCEPT_BOTH: &str = "application/json, text/event-stream";
}

/// MCP protocol revisions the gateway accepts in the version header.
pub mod protocol {
    pub const SUPPORTED_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];
    pub const LATEST_VERSION: &str = "2025-06-18";
}

/// MCP Protocol Methods
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const PROGRESS: &str = "notifications/progress";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";

    /// Backend notifications that invalidate an adapter's capability snapshot.
    pub fn is_capability_change(method: &str) -> bool {
        matches!(
            method,
            TOOLS_LIST_CHANGED | RESOURCES_LIST_CHANGED | PROMPTS_LIST_CHANGED
        )
    }
}

/// Configuration Environment Variables
pub mod config {
    pub const ENV_BIND_ADDRESS: &str = "GATEWAY_BIND_ADDRESS";
    pub const ENV_ADAPTERS_FILE: &str = "GATEWAY_ADAPTERS_FILE";
    pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
    pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
    pub const ENV_DISPATCH_TIMEOUT_SECS: &str = "GATEWAY_DISPATCH_TIMEOUT_SECS";
    pub const ENV_SESSION_IDLE_TIMEOUT_SECS: &str = "GATEWAY_SESSION_IDLE_TIMEOUT_SECS";
    pub const ENV_SESSION_IDLE_AFTER_SECS: &str = "GATEWAY_SESSION_IDLE_AFTER_SECS";
    pub const ENV_SWEEP_INTERVAL_SECS: &str = "GATEWAY_SWEEP_INTERVAL_SECS";
    pub const ENV_CACHE_MAX_ENTRIES: &str = "GATEWAY_CACHE_MAX_ENTRIES";
    pub const ENV_CACHE_TTL_SECS: &str = "GATEWAY_CACHE_TTL_SECS";
    pub const ENV_MONITOR_CAPACITY: &str = "GATEWAY_MONITOR_CAPACITY";
    pub const ENV_BODY_LIMIT_BYTES: &str = "GATEWAY_BODY_LIMIT_BYTES";
    pub const ENV_SERVICE_URL_TEMPLATE: &str = "GATEWAY_SERVICE_URL_TEMPLATE";

    pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8911";
    pub const DEFAULT_SERVICE_URL_TEMPLATE: &str =
        "http://{name}-service.adapter.svc.cluster.local:8000/mcp";
}

/// Transport Limits (DoS Protection)
pub mod limits {
    /// Maximum allowed JSON-RPC frame size on a backend pipe (10 MB)
    pub const MAX_MESSAGE_SIZE_BYTES: usize = 10 * 1024 * 1024;
    /// Longest client-supplied session id the gateway will adopt
    pub const MAX_SESSION_ID_LEN: usize = 128;
    /// Outbound frames queued per backend process before writers wait
    pub const WRITE_QUEUE_DEPTH: usize = 64;
    /// Server-initiated messages buffered per session for GET streams
    pub const NOTIFICATION_BUFFER: usize = 256;
    /// Intermediate frames buffered per POST before the backend waits
    pub const STREAM_BUFFER: usize = 32;
}
