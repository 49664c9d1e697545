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

//! Remote bridge for `RemoteHttp` and `StreamableHttp` adapters.
//!
//! Each routed call becomes one POST against the backend's MCP endpoint. The
//! remote may answer with plain JSON or with an event stream; both are folded
//! into a single [`JsonRpcResponse`]. Every transport-level failure maps to
//! `BackendUnavailable`, the same outcome the stdio bridge produces.

use crate::gateway_core::constants::{headers, limits, methods};
use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::events::GatewayEvent;
use crate::gateway_core::models::{
    AdapterResource, ApiKeyLocation, AuthScheme, ConnectionType, JsonRpcRequest, JsonRpcResponse,
};
use crate::mcp::backend::BackendContext;
use anyhow::anyhow;
use futures_util::StreamExt;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared HTTP client plus endpoint resolution rules.
#[derive(Clone)]
pub struct RemoteBridge {
    client: Client,
    service_url_template: String,
}

impl RemoteBridge {
    pub fn new(connect_timeout: Duration, service_url_template: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .tcp_nodelay(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            service_url_template: service_url_template.into(),
        })
    }

    /// `RemoteHttp` gets `/mcp` appended; `StreamableHttp` uses its URL as-is
    /// or falls back to the in-cluster service template.
    pub fn resolve_endpoint(&self, adapter: &AdapterResource) -> Result<Url, GatewayError> {
        let raw = match adapter.connection_type {
            ConnectionType::RemoteHttp => {
                let base = adapter.remote_url.as_deref().ok_or_else(|| {
                    GatewayError::Configuration(format!("adapter '{}' has no remoteUrl", adapter.name))
                })?;
                let base = base.trim_end_matches('/');
                if base.ends_with("/mcp") {
                    base.to_string()
                } else {
                    format!("{base}/mcp")
                }
            }
            ConnectionType::StreamableHttp => match adapter.remote_url.as_deref() {
                Some(url) => url.to_string(),
                None => self.service_url_template.replace("{name}", &adapter.name),
            },
            ConnectionType::LocalStdio => {
                return Err(GatewayError::Configuration(format!(
                    "adapter '{}' is not a remote adapter",
                    adapter.name
                )))
            }
        };
        Url::parse(&raw)
            .map_err(|e| GatewayError::Configuration(format!("invalid backend url '{raw}': {e}")))
    }

    pub fn connect(&self, adapter: &AdapterResource, ctx: BackendContext) -> Result<RemoteLease, GatewayError> {
        let endpoint = self.resolve_endpoint(adapter)?;
        info!(adapter = %adapter.name, endpoint = %endpoint, "Bound session to remote backend");
        Ok(RemoteLease {
            inner: Arc::new(RemoteSession {
                endpoint,
                auth: adapter.outbound_auth().cloned(),
                client: self.client.clone(),
                remote_session: Mutex::new(None),
                protocol_version: Mutex::new(None),
                alive: CancellationToken::new(),
                released: AtomicBool::new(false),
                ctx,
            }),
        })
    }
}

struct RemoteSession {
    endpoint: Url,
    auth: Option<AuthScheme>,
    client: Client,
    /// Session id issued by the remote, if it is session-aware.
    remote_session: Mutex<Option<String>>,
    protocol_version: Mutex<Option<String>>,
    alive: CancellationToken,
    released: AtomicBool,
    ctx: BackendContext,
}

fn read<T: Clone>(m: &Mutex<Option<T>>) -> Option<T> {
    m.lock().unwrap_or_else(|p| p.into_inner()).clone()
}

fn write<T>(m: &Mutex<Option<T>>, value: T) {
    *m.lock().unwrap_or_else(|p| p.into_inner()) = Some(value);
}

impl RemoteSession {
    fn adapter(&self) -> &str {
        &self.ctx.adapter
    }

    fn unavailable(&self, reason: impl Into<String>) -> GatewayError {
        GatewayError::backend_unavailable(self.adapter(), reason)
    }

    fn request(&self, method: Method) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, self.endpoint.clone())
            .header(reqwest::header::ACCEPT, headers::ACCEPT_BOTH);
        if let Some(version) = read(&self.protocol_version) {
            builder = builder.header(headers::PROTOCOL_VERSION, version);
        }
        if let Some(session) = read(&self.remote_session) {
            builder = builder.header(headers::SESSION_ID, session);
        }
        match &self.auth {
            Some(AuthScheme::Bearer { token }) => builder.bearer_auth(token),
            Some(AuthScheme::Basic { username, password }) => builder.basic_auth(username, Some(password)),
            Some(AuthScheme::ApiKey { name, value, location: ApiKeyLocation::Header }) => {
                builder.header(name.as_str(), value.as_str())
            }
            Some(AuthScheme::ApiKey { name, value, location: ApiKeyLocation::Query }) => {
                builder.query(&[(name.as_str(), value.as_str())])
            }
            None => builder,
        }
    }

    fn transport_failure(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            self.unavailable("remote call timed out")
        } else if e.is_connect() {
            // Nothing is listening; the binding is dead.
            self.alive.cancel();
            self.unavailable(format!("connection failed: {e}"))
        } else {
            self.unavailable(format!("transport error: {e}"))
        }
    }

    fn check_status(&self, resp: &Response) -> Result<(), GatewayError> {
        if let Some(session) = resp
            .headers()
            .get(headers::SESSION_ID)
            .and_then(|v| v.to_str().ok())
        {
            write(&self.remote_session, session.to_string());
        }

        let status = resp.status();
        if status == StatusCode::NOT_FOUND && read(&self.remote_session).is_some() {
            self.alive.cancel();
            return Err(self.unavailable("remote session expired"));
        }
        if !status.is_success() {
            return Err(self.unavailable(format!("remote returned HTTP {status}")));
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        request: JsonRpcRequest,
        progress: Option<mpsc::Sender<Value>>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, GatewayError> {
        if self.alive.is_cancelled() {
            return Err(self.unavailable("remote binding closed"));
        }

        let resp = self
            .request(Method::POST)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_failure(e))?;
        self.check_status(&resp)?;

        let is_stream = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(headers::EVENT_STREAM));

        let response = if is_stream {
            self.read_stream(resp, &request, progress).await?
        } else {
            resp.json::<JsonRpcResponse>()
                .await
                .map_err(|e| self.unavailable(format!("invalid response body: {e}")))?
        };

        if request.method == methods::INITIALIZE {
            if let Some(version) = response
                .result
                .as_ref()
                .and_then(|r| r.get("protocolVersion"))
                .and_then(Value::as_str)
            {
                write(&self.protocol_version, version.to_string());
            }
        }
        Ok(response)
    }

    async fn read_stream(
        &self,
        resp: Response,
        request: &JsonRpcRequest,
        progress: Option<mpsc::Sender<Value>>,
    ) -> Result<JsonRpcResponse, GatewayError> {
        let mut body = resp.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| self.transport_failure(e))?;
            let events = decoder
                .push(&chunk)
                .map_err(|e| self.unavailable(format!("invalid event stream: {e}")))?;
            for data in events {
                let Ok(message) = serde_json::from_str::<Value>(&data) else {
                    debug!(adapter = %self.adapter(), "Skipping non-JSON event from remote");
                    continue;
                };
                let method = message.get("method").and_then(Value::as_str).map(str::to_string);
                match method {
                    None if message.get("id") == request.id.as_ref() => {
                        return serde_json::from_value(message)
                            .map_err(|e| self.unavailable(format!("invalid response frame: {e}")));
                    }
                    None => debug!(adapter = %self.adapter(), "Ignoring uncorrelated response frame"),
                    Some(method) => self.on_intermediate(method, message, progress.as_ref()),
                }
            }
        }
        Err(self.unavailable("remote stream ended without a response"))
    }

    fn on_intermediate(&self, method: String, message: Value, progress: Option<&mpsc::Sender<Value>>) {
        if method == methods::PROGRESS {
            if let Some(sink) = progress {
                if sink.try_send(message).is_err() {
                    warn!(adapter = %self.adapter(), "Progress stream full or closed, frame dropped");
                }
                return;
            }
        }
        if methods::is_capability_change(&method) {
            let _ = self.ctx.events.send(GatewayEvent::CapabilitiesChanged {
                adapter: self.ctx.adapter.clone(),
                method,
            });
        }
        let _ = self.ctx.notifications.send(message);
    }

    async fn forward(&self, message: Value, timeout: Duration) -> Result<(), GatewayError> {
        if self.alive.is_cancelled() {
            return Err(self.unavailable("remote binding closed"));
        }
        let resp = self
            .request(Method::POST)
            .timeout(timeout)
            .json(&message)
            .send()
            .await
            .map_err(|e| self.transport_failure(e))?;
        self.check_status(&resp)
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.alive.cancel();
        let Some(session) = read(&self.remote_session) else {
            return;
        };
        // Best-effort DELETE so session-aware remotes can free state.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let builder = self.request(Method::DELETE);
            let adapter = self.ctx.adapter.clone();
            runtime.spawn(async move {
                if let Err(e) = builder.send().await {
                    debug!(adapter = %adapter, remote_session = %session, error = %e, "Remote session DELETE failed");
                }
            });
        }
    }
}

/// A session's binding to one remote endpoint.
pub struct RemoteLease {
    inner: Arc<RemoteSession>,
}

impl RemoteLease {
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    pub fn is_alive(&self) -> bool {
        !self.inner.alive.is_cancelled()
    }

    pub async fn dispatch(
        &self,
        request: JsonRpcRequest,
        progress: Option<mpsc::Sender<Value>>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, GatewayError> {
        self.inner.dispatch(request, progress, timeout).await
    }

    pub async fn forward(&self, message: Value, timeout: Duration) -> Result<(), GatewayError> {
        self.inner.forward(message, timeout).await
    }

    pub fn release(&self) {
        self.inner.release();
    }
}

impl Drop for RemoteLease {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// Incremental `text/event-stream` parser yielding the `data` payload of each event.
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Bytes already searched for a blank line.
    scanned: usize,
    max_event: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_max_event(limits::MAX_MESSAGE_SIZE_BYTES)
    }

    pub fn with_max_event(max_event: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_event,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<String>> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut out = Vec::new();
        loop {
            // Step back one byte so a delimiter split across chunks is found.
            let from = self.scanned.saturating_sub(1);
            let Some(offset) = self.buf[from..].windows(2).position(|w| w == b"\n\n") else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_event {
                    return Err(anyhow!(
                        "event of at least {} bytes exceeds max limit {}",
                        self.buf.len(),
                        self.max_event
                    ));
                }
                return Ok(out);
            };
            let end = from + offset;
            self.scanned = 0;
            if end > self.max_event {
                return Err(anyhow!("event length {end} exceeds max limit"));
            }
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&block[..end]);
            let data: Vec<&str> = text
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            if !data.is_empty() {
                out.push(data.join("\n"));
            }
        }
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> RemoteBridge {
        RemoteBridge::new(Duration::from_secs(1), "http://{name}-service.adapter.svc.cluster.local:8000/mcp").unwrap()
    }

    #[test]
    fn test_remote_http_appends_mcp() {
        let adapter = AdapterResource::remote("w", "http://localhost:9000/");
        assert_eq!(bridge().resolve_endpoint(&adapter).unwrap().as_str(), "http://localhost:9000/mcp");

        let adapter = AdapterResource::remote("w", "http://localhost:9000/mcp");
        assert_eq!(bridge().resolve_endpoint(&adapter).unwrap().as_str(), "http://localhost:9000/mcp");
    }

    #[test]
    fn test_streamable_http_uses_service_template() {
        let mut adapter = AdapterResource::remote("weather", "unused");
        adapter.connection_type = ConnectionType::StreamableHttp;
        adapter.remote_url = None;
        assert_eq!(
            bridge().resolve_endpoint(&adapter).unwrap().as_str(),
            "http://weather-service.adapter.svc.cluster.local:8000/mcp"
        );
    }

    #[test]
    fn test_stdio_adapter_is_rejected() {
        let adapter = AdapterResource::stdio("local", "cat", vec![]);
        assert!(matches!(
            bridge().resolve_endpoint(&adapter),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn test_sse_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: message\r\ndata: {\"a\"").unwrap().is_empty());
        let events = decoder.push(b":1}\r\n\r\ndata: {\"b\":2}\n\n: comment\n\n").unwrap();
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[test]
    fn test_sse_decoder_finds_delimiter_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: 1\n").unwrap().is_empty());
        assert_eq!(decoder.push(b"\ndata: 2\n").unwrap(), vec!["1".to_string()]);
        assert_eq!(decoder.push(b"\n").unwrap(), vec!["2".to_string()]);
    }

    #[test]
    fn test_sse_decoder_rejects_oversized_event() {
        let mut decoder = SseDecoder::with_max_event(16);
        assert!(decoder.push(b"data: 0123456789").unwrap().is_empty());
        assert!(decoder.push(b"abcdef").is_err());

        let mut decoder = SseDecoder::with_max_event(16);
        assert!(decoder.push(b"data: 0123456789abcdef\n\n").is_err());
    }
}
