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

//! Stdio bridge for `LocalStdio` adapters.
//!
//! The bridge owns a process table. Each entry exclusively owns one OS
//! process, its write pump (the only writer of the child's stdin) and a
//! pending table mapping gateway-assigned request ids to one-shot completion
//! slots. Sessions hold a [`ProcessLease`], which is only an index into the
//! table; dropping or releasing the lease kills the process.
//!
//! Outbound request ids are rewritten to per-process integers so concurrent
//! clients can never collide, and restored on the way back.

use crate::gateway_core::constants::{limits, methods};
use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::events::{GatewayEvent, ProcessId};
use crate::gateway_core::models::{AdapterResource, JsonRpcRequest, JsonRpcResponse};
use crate::mcp::backend::BackendContext;
use crate::mcp::pipeline::{
    spawn_downstream_writer, spawn_upstream_reader, spawn_upstream_stderr_drain, UpstreamEvent,
};
use crate::mcp::process::ProcessSupervisor;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Reply = Result<JsonRpcResponse, GatewayError>;

struct PendingCall {
    original_id: Value,
    progress_token: Option<Value>,
    progress: Option<mpsc::Sender<Value>>,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u64, PendingCall>,
    /// Set once the process is gone; later registrations fail immediately.
    closed: Option<String>,
}

struct ManagedProcess {
    adapter: String,
    outbound: mpsc::Sender<Value>,
    pending: Mutex<PendingTable>,
    next_request: AtomicU64,
    supervisor: Mutex<ProcessSupervisor>,
    alive: CancellationToken,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ManagedProcess {
    fn register(&self, internal: u64, call: PendingCall) -> Result<(), GatewayError> {
        let mut pending = lock(&self.pending);
        if let Some(reason) = &pending.closed {
            return Err(GatewayError::backend_unavailable(&self.adapter, reason.clone()));
        }
        pending.calls.insert(internal, call);
        Ok(())
    }

    fn forget(&self, internal: u64) {
        lock(&self.pending).calls.remove(&internal);
    }

    fn internal_id_for(&self, original: &Value) -> Option<u64> {
        lock(&self.pending)
            .calls
            .iter()
            .find(|(_, call)| &call.original_id == original)
            .map(|(id, _)| *id)
    }

    fn resolve(&self, message: Value) {
        let Some(internal) = message.get("id").and_then(internal_id) else {
            debug!(adapter = %self.adapter, "Dropping backend response with foreign id");
            return;
        };
        let Some(call) = lock(&self.pending).calls.remove(&internal) else {
            debug!(adapter = %self.adapter, internal, "Response for abandoned request");
            return;
        };
        let reply = serde_json::from_value::<JsonRpcResponse>(message)
            .map(|mut resp| {
                resp.id = call.original_id;
                resp
            })
            .map_err(|e| GatewayError::Internal(format!("malformed backend response: {e}")));
        let _ = call.reply.send(reply);
    }

    /// Hands a progress notification to the caller that owns its token.
    /// Returns the message back when no caller claims it.
    fn route_progress(&self, message: Value) -> Option<Value> {
        let token = message.get("params").and_then(|p| p.get("progressToken"));
        let sink = {
            let pending = lock(&self.pending);
            pending
                .calls
                .values()
                .find(|c| c.progress_token.is_some() && c.progress_token.as_ref() == token)
                .and_then(|c| c.progress.clone())
        };
        match sink {
            Some(sink) => {
                if sink.try_send(message).is_err() {
                    warn!(adapter = %self.adapter, "Progress stream full or closed, frame dropped");
                }
                None
            }
            None => Some(message),
        }
    }

    /// Fails every pending slot and kills the process. Idempotent.
    fn shutdown(&self, reason: &str) {
        let calls = {
            let mut pending = lock(&self.pending);
            if pending.closed.is_none() {
                pending.closed = Some(reason.to_string());
            }
            std::mem::take(&mut pending.calls)
        };
        for (_, call) in calls {
            let _ = call
                .reply
                .send(Err(GatewayError::backend_unavailable(&self.adapter, reason)));
        }
        self.alive.cancel();
        lock(&self.supervisor).kill();
    }
}

fn internal_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[derive(Default)]
struct ProcessTable {
    next: AtomicU64,
    entries: Mutex<HashMap<ProcessId, Arc<ManagedProcess>>>,
}

impl ProcessTable {
    fn get(&self, id: ProcessId) -> Option<Arc<ManagedProcess>> {
        lock(&self.entries).get(&id).cloned()
    }

    fn remove(&self, id: ProcessId) -> Option<Arc<ManagedProcess>> {
        lock(&self.entries).remove(&id)
    }
}

/// Spawns and tracks backend processes. Cheap to clone.
#[derive(Clone, Default)]
pub struct StdioBridge {
    table: Arc<ProcessTable>,
}

impl StdioBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live backend processes.
    pub fn process_count(&self) -> usize {
        lock(&self.table.entries).len()
    }

    /// Kill every process. Used on gateway shutdown.
    pub fn shutdown_all(&self) {
        let entries: Vec<_> = lock(&self.table.entries).drain().collect();
        for (_, process) in entries {
            process.shutdown("gateway shutting down");
        }
    }

    pub fn spawn(
        &self,
        adapter: &AdapterResource,
        ctx: BackendContext,
    ) -> Result<ProcessLease, GatewayError> {
        let spec = adapter.launch_spec().ok_or_else(|| {
            GatewayError::Configuration(format!(
                "adapter '{}' is LocalStdio but has no command",
                adapter.name
            ))
        })?;

        let (ev_tx, ev_rx) = mpsc::channel(limits::NOTIFICATION_BUFFER);
        let spawned = ProcessSupervisor::spawn(&adapter.name, &spec, ev_tx.clone())?;
        let pid = spawned.supervisor.pid();

        let (out_tx, out_rx) = mpsc::channel(limits::WRITE_QUEUE_DEPTH);
        spawn_downstream_writer(spawned.stdin, out_rx, ev_tx.clone());
        spawn_upstream_reader(adapter.name.clone(), spawned.stdout, ev_tx.clone());
        if let Some(stderr) = spawned.stderr {
            spawn_upstream_stderr_drain(stderr, ev_tx);
        }

        let id = ProcessId(self.table.next.fetch_add(1, Ordering::Relaxed));
        let process = Arc::new(ManagedProcess {
            adapter: adapter.name.clone(),
            outbound: out_tx,
            pending: Mutex::new(PendingTable::default()),
            next_request: AtomicU64::new(1),
            supervisor: Mutex::new(spawned.supervisor),
            alive: CancellationToken::new(),
        });
        lock(&self.table.entries).insert(id, process.clone());

        info!(
            adapter = %adapter.name,
            session_id = %ctx.session_id,
            process_id = %id,
            pid = ?pid,
            "Spawned backend process"
        );

        tokio::spawn(run_process(id, process, ev_rx, self.table.clone(), ctx));

        Ok(ProcessLease {
            id,
            adapter: adapter.name.clone(),
            pid,
            table: self.table.clone(),
        })
    }
}

/// Process actor: consumes pump events until the process is gone.
async fn run_process(
    id: ProcessId,
    process: Arc<ManagedProcess>,
    mut events: mpsc::Receiver<UpstreamEvent>,
    table: Arc<ProcessTable>,
    ctx: BackendContext,
) {
    let mut exit_code = None;
    let reason = loop {
        let Some(event) = events.recv().await else {
            break "backend pipes closed".to_string();
        };
        match event {
            UpstreamEvent::Message(message) => on_message(&process, &ctx, message),
            UpstreamEvent::Log(line) => {
                debug!(adapter = %ctx.adapter, process_id = %id, "stderr: {}", line);
            }
            UpstreamEvent::Closed => break "backend closed stdout".to_string(),
            UpstreamEvent::Broken(reason) => break reason,
            UpstreamEvent::Terminated(code) => {
                exit_code = code;
                break format!("backend process exited (code {code:?})");
            }
        }
    };

    process.shutdown(&reason);
    table.remove(id);
    warn!(
        adapter = %ctx.adapter,
        session_id = %ctx.session_id,
        process_id = %id,
        reason = %reason,
        "Backend process gone"
    );
    let _ = ctx.events.send(GatewayEvent::ProcessExited {
        adapter: ctx.adapter.clone(),
        process_id: id,
        code: exit_code,
    });
}

fn on_message(process: &ManagedProcess, ctx: &BackendContext, message: Value) {
    let method = message.get("method").and_then(Value::as_str).map(str::to_string);
    match method {
        None => process.resolve(message),
        Some(method) => {
            let message = if method == methods::PROGRESS {
                match process.route_progress(message) {
                    Some(unclaimed) => unclaimed,
                    None => return,
                }
            } else {
                message
            };
            if methods::is_capability_change(&method) {
                let _ = ctx.events.send(GatewayEvent::CapabilitiesChanged {
                    adapter: ctx.adapter.clone(),
                    method: method.clone(),
                });
            }
            // Server-initiated requests and notifications go to the session's GET stream.
            let _ = ctx.notifications.send(message);
        }
    }
}

/// A session's exclusive claim on one process table entry.
pub struct ProcessLease {
    id: ProcessId,
    adapter: String,
    pid: Option<u32>,
    table: Arc<ProcessTable>,
}

impl ProcessLease {
    pub fn process_id(&self) -> ProcessId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn process(&self) -> Result<Arc<ManagedProcess>, GatewayError> {
        self.table
            .get(self.id)
            .ok_or_else(|| GatewayError::backend_unavailable(&self.adapter, "backend process is gone"))
    }

    pub fn is_alive(&self) -> bool {
        self.table
            .get(self.id)
            .is_some_and(|p| !p.alive.is_cancelled())
    }

    pub async fn dispatch(
        &self,
        mut request: JsonRpcRequest,
        progress: Option<mpsc::Sender<Value>>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, GatewayError> {
        let process = self.process()?;
        let internal = process.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        process.register(
            internal,
            PendingCall {
                original_id: request.id.take().unwrap_or(Value::Null),
                progress_token: request.progress_token().cloned(),
                progress,
                reply: reply_tx,
            },
        )?;
        request.id = Some(json!(internal));

        let frame = serde_json::to_value(&request)
            .map_err(|e| GatewayError::Internal(format!("failed to encode request: {e}")))?;
        let deadline = Instant::now() + timeout;
        if let Err(e) = self.send_by(&process, frame, deadline, timeout).await {
            process.forget(internal);
            return Err(e);
        }

        match tokio::time::timeout_at(deadline, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(GatewayError::backend_unavailable(
                &self.adapter,
                "backend dropped the request",
            )),
            Err(_) => {
                process.forget(internal);
                let cancel = json!({
                    "jsonrpc": "2.0",
                    "method": methods::CANCELLED,
                    "params": {"requestId": internal, "reason": "gateway timeout"}
                });
                let _ = process.outbound.try_send(cancel);
                Err(GatewayError::backend_unavailable(
                    &self.adapter,
                    format!("no response within {}ms", timeout.as_millis()),
                ))
            }
        }
    }

    /// Queue one frame for the write pump. A child that stops reading stdin
    /// fills the queue; the send then gives up at `deadline`.
    async fn send_by(
        &self,
        process: &ManagedProcess,
        frame: Value,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        match tokio::time::timeout_at(deadline, process.outbound.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(GatewayError::backend_unavailable(&self.adapter, "backend stdin closed")),
            Err(_) => Err(GatewayError::backend_unavailable(
                &self.adapter,
                format!("backend stdin not drained within {}ms", timeout.as_millis()),
            )),
        }
    }

    /// Forward a client notification or a client response to a backend request.
    pub async fn forward(&self, mut message: Value, timeout: Duration) -> Result<(), GatewayError> {
        let process = self.process()?;
        if message.get("method").and_then(Value::as_str) == Some(methods::CANCELLED) {
            let original = message.pointer("/params/requestId").cloned();
            if let Some(internal) = original.and_then(|id| process.internal_id_for(&id)) {
                if let Some(params) = message.get_mut("params") {
                    params["requestId"] = json!(internal);
                }
            }
        }
        self.send_by(&process, message, Instant::now() + timeout, timeout).await
    }

    /// Kill the process and fail its pending calls. Idempotent.
    pub fn release(&self) {
        if let Some(process) = self.table.remove(self.id) {
            info!(adapter = %self.adapter, process_id = %self.id, "Releasing backend process");
            process.shutdown("session terminated");
        }
    }
}

impl Drop for ProcessLease {
    fn drop(&mut self) {
        self.release();
    }
}
