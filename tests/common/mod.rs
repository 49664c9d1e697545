//! Shared fixtures: a gateway wired to the `mock-mcp-server` binary and
//! helpers that drive the HTTP router in-process.

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uniproxy::adapters::InMemoryAdapterStore;
use uniproxy::api::{create_router, AppState};
use uniproxy::config::Config;
use uniproxy::gateway::Gateway;
use uniproxy::gateway_core::models::AdapterResource;

pub const MOCK: &str = env!("CARGO_BIN_EXE_mock-mcp-server");

pub fn mock_adapter(name: &str, args: Vec<String>) -> AdapterResource {
    AdapterResource::stdio(name, MOCK, args)
}

pub struct TestGateway {
    pub gateway: Arc<Gateway>,
    pub app: Router,
}

impl TestGateway {
    pub fn start(adapters: Vec<AdapterResource>) -> Self {
        Self::start_with(Config::default(), adapters)
    }

    pub fn start_with(config: Config, adapters: Vec<AdapterResource>) -> Self {
        let store = Arc::new(InMemoryAdapterStore::with_adapters(adapters));
        let gateway = Gateway::new(&config, store).expect("gateway");
        gateway.start();
        let app = create_router(AppState::new(gateway.clone()));
        Self { gateway, app }
    }

    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.app.clone().oneshot(request).await.expect("infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        Reply {
            status,
            session: headers
                .get("mcp-session-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            content_type: headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }

    pub async fn post(&self, adapter: &str, session: Option<&str>, message: Value) -> Reply {
        self.send(post_request(adapter, session, message.to_string())).await
    }

    pub async fn initialize(&self, adapter: &str) -> String {
        self.initialize_as(adapter, None).await
    }

    pub async fn initialize_as(&self, adapter: &str, session: Option<&str>) -> String {
        let reply = self.post(adapter, session, initialize_message(1)).await;
        assert_eq!(reply.status, StatusCode::OK, "initialize failed: {}", reply.body);
        reply.session.expect("session header on initialize")
    }

    pub async fn call_tool(&self, adapter: &str, session: &str, id: i64, name: &str, args: Value) -> Reply {
        self.post(
            adapter,
            Some(session),
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": {"name": name, "arguments": args}
            }),
        )
        .await
    }
}

pub fn post_request(adapter: &str, session: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/adapters/{adapter}/mcp"))
        .header("content-type", "application/json")
        .header("accept", "application/json, text/event-stream");
    if let Some(session) = session {
        builder = builder.header("mcp-session-id", session);
    }
    builder.body(Body::from(body)).expect("request")
}

pub fn initialize_message(id: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0"}
        }
    })
}

pub struct Reply {
    pub status: StatusCode,
    pub session: Option<String>,
    pub content_type: String,
    pub body: String,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|e| panic!("not JSON ({e}): {}", self.body))
    }

    /// Text of the first content item of a `tools/call` result.
    pub fn tool_text(&self) -> String {
        self.json()
            .pointer("/result/content/0/text")
            .and_then(Value::as_str)
            .unwrap_or_else(|| panic!("no tool text in {}", self.body))
            .to_string()
    }

    pub fn error_code(&self) -> Option<i64> {
        self.json().pointer("/error/code").and_then(Value::as_i64)
    }

    /// JSON payloads of every `data:` line in an SSE body.
    pub fn sse_messages(&self) -> Vec<Value> {
        self.body
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .filter_map(|data| serde_json::from_str(data.trim()).ok())
            .collect()
    }
}
