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

//! Message Router.
//!
//! Resolves the session for each decoded message, answers cacheable methods
//! from the response cache, coalesces duplicate in-flight calls and
//! dispatches everything else to the session's backend handle.

use crate::gateway_core::constants::methods;
use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::events::GatewayEvent;
use crate::gateway_core::models::{AdapterResource, JsonRpcRequest, JsonRpcResponse, SessionId};
use crate::gateway_core::session::SessionState;
use crate::gateway_core::traits::AdapterStore;
use crate::mcp::backend::{BackendContext, Backends};
use crate::protocol::handler::{IncomingMessage, ProtocolHandler};
use crate::state::capability_cache::{CapabilityCache, CapabilitySnapshot};
use crate::state::monitor::{EventKind, Monitor, MonitorEvent};
use crate::state::response_cache::{fingerprint, ttl_for, ResponseCache, SingleFlight};
use crate::state::session_store::{Handshake, Session, SessionStore};
use futures::FutureExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub dispatch_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: u64,
    pub monitor_capacity: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1000,
            monitor_capacity: 1000,
        }
    }
}

#[derive(Debug)]
pub enum Reply {
    Response(JsonRpcResponse),
    /// Notification or client response delivered to the backend.
    Accepted,
}

#[derive(Debug)]
pub struct Routed {
    pub session_id: Option<SessionId>,
    pub reply: Reply,
}

/// A message the gateway answers with an error. `id` is the id to echo.
#[derive(Debug)]
pub struct Rejected {
    pub id: Value,
    pub session_id: Option<SessionId>,
    pub error: GatewayError,
}

impl Rejected {
    fn new(id: Value, error: GatewayError) -> Self {
        Self {
            id,
            session_id: None,
            error,
        }
    }

    pub fn response(&self) -> JsonRpcResponse {
        ProtocolHandler::error_response(self.id.clone(), &self.error)
    }
}

type Outcome = Result<Value, GatewayError>;

fn into_outcome(response: JsonRpcResponse) -> Outcome {
    match (response.error, response.result) {
        (Some(e), _) => Err(GatewayError::Backend(e)),
        (None, Some(result)) => Ok(result),
        (None, None) => Ok(Value::Null),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub struct MessageRouter {
    adapters: Arc<dyn AdapterStore>,
    sessions: Arc<SessionStore>,
    capabilities: Arc<CapabilityCache>,
    cache: Arc<ResponseCache>,
    inflight: SingleFlight<(SessionId, String), Outcome>,
    monitor: Arc<Monitor>,
    backends: Backends,
    events: broadcast::Sender<GatewayEvent>,
    settings: RouterSettings,
}

impl MessageRouter {
    pub fn new(adapters: Arc<dyn AdapterStore>, backends: Backends, settings: RouterSettings) -> Self {
        let (events, _) = broadcast::channel(crate::gateway_core::constants::limits::NOTIFICATION_BUFFER);
        Self {
            adapters,
            sessions: Arc::new(SessionStore::new()),
            capabilities: Arc::new(CapabilityCache::new()),
            cache: Arc::new(ResponseCache::new(settings.cache_max_entries)),
            inflight: SingleFlight::new(),
            monitor: Arc::new(Monitor::new(settings.monitor_capacity)),
            backends,
            events,
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn capabilities(&self) -> &Arc<CapabilityCache> {
        &self.capabilities
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Route one client message. `progress` receives intermediate frames
    /// (progress notifications) for the call while it is in flight.
    pub async fn route(
        &self,
        adapter: &str,
        session_id: Option<SessionId>,
        message: IncomingMessage,
        progress: Option<mpsc::Sender<Value>>,
    ) -> Result<Routed, Rejected> {
        match message {
            IncomingMessage::Request(request) if request.method == methods::INITIALIZE => {
                self.initialize(adapter, session_id, request, progress).await
            }
            IncomingMessage::Request(request) => self.call(adapter, session_id, request, progress).await,
            IncomingMessage::Notification(notification) => {
                let method = notification.method.clone();
                let message = serde_json::to_value(&notification).map_err(|e| {
                    Rejected::new(Value::Null, GatewayError::Internal(e.to_string()))
                })?;
                self.forward(adapter, session_id, message, Some(&method)).await
            }
            IncomingMessage::Response(message) => self.forward(adapter, session_id, message, None).await,
        }
    }

    async fn adapter(&self, name: &str) -> Result<AdapterResource, GatewayError> {
        self.adapters
            .get(name)
            .await?
            .ok_or_else(|| GatewayError::AdapterNotFound(name.to_string()))
    }

    async fn initialize(
        &self,
        adapter_name: &str,
        requested: Option<SessionId>,
        request: JsonRpcRequest,
        progress: Option<mpsc::Sender<Value>>,
    ) -> Result<Routed, Rejected> {
        let started = Instant::now();
        let id = request.id.clone().unwrap_or(Value::Null);
        let params = ProtocolHandler::validate_initialize(&request)
            .map_err(|e| Rejected::new(id.clone(), e))?;
        let adapter = self
            .adapter(adapter_name)
            .await
            .map_err(|e| Rejected::new(id.clone(), e))?;

        let session = match requested {
            Some(sid) => self
                .sessions
                .get_or_create(sid, adapter_name)
                .map_err(|e| Rejected::new(id.clone(), e))?
                .0,
            None => self.sessions.create(adapter_name),
        };

        // An established session replays its handshake.
        if let Some(handshake) = session.handshake() {
            session.touch();
            debug!(session_id = %session.id(), "Replaying recorded handshake");
            return Ok(Routed {
                session_id: Some(session.id().clone()),
                reply: Reply::Response(JsonRpcResponse::success(id, handshake.result.clone())),
            });
        }

        session.transition(SessionState::Initializing);
        let performed = AtomicBool::new(false);
        let outcome = {
            let performed = &performed;
            let session_ref = &session;
            let adapter_ref = &adapter;
            let params_ref = &params;
            let ctx = BackendContext {
                adapter: adapter_name.to_string(),
                session_id: session.id().clone(),
                notifications: session.notifications().clone(),
                events: self.events.clone(),
            };
            let timeout = self.settings.dispatch_timeout;
            session
                .handshake_cell()
                .get_or_try_init(move || async move {
                    performed.store(true, Ordering::Relaxed);
                    let backend = session_ref
                        .backend_cell()
                        .get_or_try_init(|| self.backends.open(adapter_ref, ctx))
                        .await?;
                    let response = backend.dispatch(request, progress, timeout).await?;
                    let result = into_outcome(response)?;
                    Ok::<_, GatewayError>(Handshake {
                        protocol_version: ProtocolHandler::agreed_version(params_ref, &result),
                        client_info: params_ref.client_info.clone(),
                        result,
                    })
                })
                .await
                .cloned()
        };

        match outcome {
            Ok(handshake) => {
                if performed.load(Ordering::Relaxed) {
                    self.capabilities
                        .set(adapter_name, CapabilitySnapshot::from_handshake(&handshake));
                    session.transition(SessionState::Active);
                    info!(
                        adapter = %adapter_name,
                        session_id = %session.id(),
                        protocol_version = %handshake.protocol_version,
                        latency_ms = elapsed_ms(started),
                        "Session established"
                    );
                    let _ = self.events.send(GatewayEvent::SessionCreated {
                        adapter: adapter_name.to_string(),
                        session_id: session.id().clone(),
                    });
                    self.monitor.record(
                        MonitorEvent::new(EventKind::SessionCreated, adapter_name).session(session.id()),
                    );
                } else if tokio::time::timeout(self.settings.dispatch_timeout, session.wait_ready())
                    .await
                    .map_or(true, |ready| ready.is_err())
                {
                    return Err(Rejected::new(
                        id,
                        GatewayError::SessionNotFound(session.id().to_string()),
                    ));
                }
                self.monitor.record(
                    MonitorEvent::new(EventKind::Request, adapter_name)
                        .session(session.id())
                        .method(methods::INITIALIZE)
                        .latency_ms(elapsed_ms(started)),
                );
                Ok(Routed {
                    session_id: Some(session.id().clone()),
                    reply: Reply::Response(JsonRpcResponse::success(id, handshake.result)),
                })
            }
            Err(e) => {
                warn!(adapter = %adapter_name, session_id = %session.id(), error = %e, "Handshake failed");
                self.record_failure(adapter_name, session.id(), methods::INITIALIZE, started, &e);
                self.terminate_session(session.id(), "handshake failed");
                Err(Rejected::new(id, e))
            }
        }
    }

    async fn live_session(&self, adapter: &str, session_id: Option<SessionId>) -> Result<Arc<Session>, GatewayError> {
        let sid = session_id.ok_or_else(|| {
            GatewayError::InvalidRequest("missing Mcp-Session-Id header".into())
        })?;
        let session = self.sessions.get_for_adapter(&sid, adapter)?;
        if !session.state().is_live() {
            tokio::time::timeout(self.settings.dispatch_timeout, session.wait_ready())
                .await
                .map_err(|_| GatewayError::backend_unavailable(adapter, "handshake still in progress"))??;
        }
        session.touch();
        Ok(session)
    }

    /// The snapshot must exist before anything is routed; rebuild it from the
    /// session's handshake after an invalidation.
    fn ensure_snapshot(&self, adapter: &str, session: &Session) -> Option<Arc<CapabilitySnapshot>> {
        if let Some(snapshot) = self.capabilities.get(adapter) {
            return Some(snapshot);
        }
        let handshake = session.handshake()?;
        self.capabilities
            .set(adapter, CapabilitySnapshot::from_handshake(handshake));
        self.capabilities.get(adapter)
    }

    async fn call(
        &self,
        adapter: &str,
        session_id: Option<SessionId>,
        request: JsonRpcRequest,
        progress: Option<mpsc::Sender<Value>>,
    ) -> Result<Routed, Rejected> {
        let started = Instant::now();
        let id = request.id.clone().unwrap_or(Value::Null);
        let session = self
            .live_session(adapter, session_id)
            .await
            .map_err(|e| Rejected::new(id.clone(), e))?;
        let snapshot = self.ensure_snapshot(adapter, &session);
        let method = request.method.clone();

        let cache_ttl = ttl_for(&method, self.settings.cache_ttl)
            .filter(|_| snapshot.as_ref().is_some_and(|s| s.allows_caching(&method)));

        let (outcome, cache_flag) = match cache_ttl {
            Some(ttl) => {
                let fp = fingerprint(&method, request.params.as_ref());
                if let Some(entry) = self.cache.get(adapter, &fp).await {
                    if entry.method == method {
                        debug!(adapter = %adapter, method = %method, "Cache hit");
                        self.monitor.record(
                            MonitorEvent::new(EventKind::CacheHit, adapter)
                                .session(session.id())
                                .method(&method)
                                .latency_ms(elapsed_ms(started)),
                        );
                        return Ok(Routed {
                            session_id: Some(session.id().clone()),
                            reply: Reply::Response(JsonRpcResponse::success(id, entry.result.clone())),
                        });
                    }
                    self.cache.invalidate(adapter, &fp).await;
                    error!(
                        adapter = %adapter,
                        method = %method,
                        cached_method = %entry.method,
                        "Cache entry does not match its request, evicted"
                    );
                    let err = GatewayError::Internal("cache entry does not match request".into());
                    self.record_failure(adapter, session.id(), &method, started, &err);
                    return Err(Rejected {
                        id,
                        session_id: Some(session.id().clone()),
                        error: err,
                    });
                }

                let call_session = session.clone();
                let cache = self.cache.clone();
                let capabilities = self.capabilities.clone();
                let (call_adapter, call_method, call_fp) = (adapter.to_string(), method.clone(), fp.clone());
                let timeout = self.settings.dispatch_timeout;
                // The entry is written before the in-flight slot is released,
                // so a late duplicate finds either the flight or the entry.
                let (outcome, joined) = self
                    .inflight
                    .run((session.id().clone(), fp), move || {
                        async move {
                            let generation = capabilities.generation(&call_adapter);
                            let backend = call_session.backend()?;
                            let result = into_outcome(backend.dispatch(request, progress, timeout).await?)?;
                            if capabilities.generation(&call_adapter) != generation {
                                debug!(adapter = %call_adapter, method = %call_method, "List changed during dispatch, not caching");
                                return Ok(result);
                            }
                            cache
                                .put(&call_adapter, &call_fp, &call_method, result.clone(), ttl)
                                .await;
                            // An invalidation that landed during the put may
                            // have swept the adapter before the entry existed.
                            if capabilities.generation(&call_adapter) != generation {
                                cache.invalidate(&call_adapter, &call_fp).await;
                                return Ok(result);
                            }
                            capabilities.record_list(&call_adapter, &call_method, &result);
                            Ok(result)
                        }
                        .boxed()
                    })
                    .await;
                if joined {
                    debug!(adapter = %adapter, method = %method, "Joined in-flight dispatch");
                }
                (outcome, (!joined).then_some(false))
            }
            None => {
                let outcome = match session.backend() {
                    Ok(backend) => backend
                        .dispatch(request, progress, self.settings.dispatch_timeout)
                        .await
                        .and_then(into_outcome),
                    Err(e) => Err(e),
                };
                (outcome, None)
            }
        };

        match outcome {
            Ok(result) => {
                let mut event = MonitorEvent::new(EventKind::Request, adapter)
                    .session(session.id())
                    .method(&method)
                    .latency_ms(elapsed_ms(started));
                if cache_flag == Some(false) {
                    event = event.cache_miss();
                }
                self.monitor.record(event);
                Ok(Routed {
                    session_id: Some(session.id().clone()),
                    reply: Reply::Response(JsonRpcResponse::success(id, result)),
                })
            }
            Err(e) => {
                self.record_failure(adapter, session.id(), &method, started, &e);
                self.after_backend_error(&session, &e);
                Err(Rejected {
                    id,
                    session_id: Some(session.id().clone()),
                    error: e,
                })
            }
        }
    }

    async fn forward(
        &self,
        adapter: &str,
        session_id: Option<SessionId>,
        message: Value,
        method: Option<&str>,
    ) -> Result<Routed, Rejected> {
        let started = Instant::now();
        let session = self
            .live_session(adapter, session_id)
            .await
            .map_err(|e| Rejected::new(Value::Null, e))?;
        if method == Some(methods::INITIALIZED) {
            session.transition(SessionState::Active);
        }
        let delivered = match session.backend() {
            Ok(backend) => backend.forward(message, self.settings.dispatch_timeout).await,
            Err(e) => Err(e),
        };
        if let Err(e) = delivered {
            self.record_failure(adapter, session.id(), method.unwrap_or("response"), started, &e);
            self.after_backend_error(&session, &e);
            return Err(Rejected {
                id: Value::Null,
                session_id: Some(session.id().clone()),
                error: e,
            });
        }
        Ok(Routed {
            session_id: Some(session.id().clone()),
            reply: Reply::Accepted,
        })
    }

    fn record_failure(&self, adapter: &str, session: &SessionId, method: &str, started: Instant, err: &GatewayError) {
        let kind = match err {
            e if e.is_backend_failure() => EventKind::BackendFailure,
            GatewayError::Internal(_) => EventKind::InternalError,
            _ => EventKind::Request,
        };
        self.monitor.record(
            MonitorEvent::new(kind, adapter)
                .session(session)
                .method(method)
                .latency_ms(elapsed_ms(started))
                .failed(err.to_string()),
        );
    }

    /// A dead backend takes its session with it; a slow one does not.
    fn after_backend_error(&self, session: &Session, err: &GatewayError) {
        if !err.is_backend_failure() {
            return;
        }
        warn!(adapter = %session.adapter_name(), session_id = %session.id(), error = %err, "Backend failure");
        if session.backend().map_or(true, |b| !b.is_alive()) {
            self.terminate_session(session.id(), "backend unavailable");
        }
    }

    /// Terminate one session and announce it. Returns false if it was already gone.
    pub fn terminate_session(&self, id: &SessionId, reason: &str) -> bool {
        match self.sessions.terminate(id) {
            Some(session) => {
                self.announce_terminated(&session, reason);
                true
            }
            None => false,
        }
    }

    fn announce_terminated(&self, session: &Session, reason: &str) {
        let _ = self.events.send(GatewayEvent::SessionTerminated {
            adapter: session.adapter_name().to_string(),
            session_id: session.id().clone(),
            reason: reason.to_string(),
        });
        self.monitor.record(
            MonitorEvent::new(EventKind::SessionTerminated, session.adapter_name())
                .session(session.id())
                .detail(reason),
        );
    }

    /// Terminate every session of `adapter`; returns how many went.
    pub fn terminate_adapter_sessions(&self, adapter: &str, reason: &str) -> usize {
        let gone = self.sessions.terminate_where(|s| s.adapter_name() == adapter);
        for session in &gone {
            self.announce_terminated(session, reason);
        }
        gone.len()
    }

    pub fn terminate_all(&self, reason: &str) -> usize {
        let gone = self.sessions.terminate_all();
        for session in &gone {
            self.announce_terminated(session, reason);
        }
        gone.len()
    }

    /// One idle-timer pass.
    pub fn sweep_idle(&self, idle_after: Duration, max_idle: Duration) -> usize {
        let expired = self.sessions.sweep_idle(idle_after, max_idle);
        for session in &expired {
            self.announce_terminated(session, "idle timeout");
        }
        expired.len()
    }

    /// React to a backend-originated event.
    pub fn on_event(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::CapabilitiesChanged { adapter, method } => {
                info!(adapter = %adapter, method = %method, "Capabilities changed, dropping cached state");
                self.capabilities.invalidate(adapter);
                self.cache.invalidate_adapter(adapter);
            }
            GatewayEvent::ProcessExited {
                adapter,
                process_id,
                code,
            } => {
                let gone = self.sessions.terminate_where(|s| {
                    s.backend().ok().and_then(|b| b.process_id()) == Some(*process_id)
                });
                for session in &gone {
                    self.announce_terminated(session, &format!("backend process exited (code {code:?})"));
                }
                self.capabilities.invalidate(adapter);
            }
            GatewayEvent::SessionCreated { .. } | GatewayEvent::SessionTerminated { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryAdapterStore;
    use crate::mcp::remote::RemoteBridge;
    use crate::mcp::stdio::StdioBridge;
    use serde_json::json;

    fn router() -> MessageRouter {
        let remote = RemoteBridge::new(Duration::from_secs(1), "http://{name}.invalid/mcp").unwrap();
        MessageRouter::new(
            Arc::new(InMemoryAdapterStore::new()),
            Backends::new(StdioBridge::new(), remote),
            RouterSettings::default(),
        )
    }

    fn request(method: &str, params: Option<Value>) -> IncomingMessage {
        IncomingMessage::Request(JsonRpcRequest::new(method, params, Some(json!(1))))
    }

    #[tokio::test]
    async fn test_unknown_session_requires_reinitialize() {
        let router = router();
        let rejected = router
            .route("a", Some(SessionId::generate()), request("tools/list", None), None)
            .await
            .unwrap_err();
        assert!(matches!(rejected.error, GatewayError::SessionNotFound(_)));
        assert_eq!(rejected.response().error.unwrap().code, -32001);
    }

    #[tokio::test]
    async fn test_missing_session_header_is_invalid_request() {
        let router = router();
        let rejected = router.route("a", None, request("tools/list", None), None).await.unwrap_err();
        assert!(matches!(rejected.error, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_initialize_unknown_adapter() {
        let router = router();
        let rejected = router
            .route(
                "missing",
                None,
                request("initialize", Some(json!({"protocolVersion": "2024-11-05"}))),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(rejected.error, GatewayError::AdapterNotFound(_)));
        assert!(router.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_spawn_failure_leaves_no_session() {
        let store = InMemoryAdapterStore::new();
        store.insert(AdapterResource::stdio("broken", "/nonexistent/uniproxy-backend", vec![]));
        let remote = RemoteBridge::new(Duration::from_secs(1), "http://{name}.invalid/mcp").unwrap();
        let router = MessageRouter::new(
            Arc::new(store),
            Backends::new(StdioBridge::new(), remote),
            RouterSettings::default(),
        );
        let rejected = router
            .route(
                "broken",
                None,
                request("initialize", Some(json!({"protocolVersion": "2024-11-05"}))),
                None,
            )
            .await
            .unwrap_err();
        assert!(rejected.error.is_backend_failure());
        assert!(router.sessions().is_empty());
        assert_eq!(router.monitor().counters("broken").errors, 1);
    }
}
