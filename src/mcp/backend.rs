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

//! Backend Handle (closed set of bridges).
//!
//! The router only ever talks to [`BackendHandle`]. `Backends::open` is the
//! single place that looks at an adapter's connection type; after that every
//! call goes through static dispatch on the enum.

use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::events::{GatewayEvent, ProcessId};
use crate::gateway_core::models::{
    AdapterResource, ConnectionType, JsonRpcRequest, JsonRpcResponse, SessionId,
};
use crate::mcp::remote::{RemoteBridge, RemoteLease};
use crate::mcp::stdio::{ProcessLease, StdioBridge};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Where a bridge delivers messages that are not the answer to a call.
#[derive(Clone)]
pub struct BackendContext {
    pub adapter: String,
    pub session_id: SessionId,
    /// Session-scoped stream of server-initiated messages (GET subscribers).
    pub notifications: broadcast::Sender<Value>,
    pub events: broadcast::Sender<GatewayEvent>,
}

pub enum BackendHandle {
    Stdio(ProcessLease),
    Remote(RemoteLease),
}

impl BackendHandle {
    /// Send one request and wait for its correlated response. Intermediate
    /// progress notifications for this call go to `progress` when given.
    pub async fn dispatch(
        &self,
        request: JsonRpcRequest,
        progress: Option<mpsc::Sender<Value>>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, GatewayError> {
        match self {
            Self::Stdio(lease) => lease.dispatch(request, progress, timeout).await,
            Self::Remote(lease) => lease.dispatch(request, progress, timeout).await,
        }
    }

    /// Fire-and-forget delivery of a notification or client response. The
    /// delivery itself is bounded by `timeout`.
    pub async fn forward(&self, message: Value, timeout: Duration) -> Result<(), GatewayError> {
        match self {
            Self::Stdio(lease) => lease.forward(message, timeout).await,
            Self::Remote(lease) => lease.forward(message, timeout).await,
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            Self::Stdio(lease) => lease.is_alive(),
            Self::Remote(lease) => lease.is_alive(),
        }
    }

    /// Idempotent; also runs on drop.
    pub fn release(&self) {
        match self {
            Self::Stdio(lease) => lease.release(),
            Self::Remote(lease) => lease.release(),
        }
    }

    pub fn process_id(&self) -> Option<ProcessId> {
        match self {
            Self::Stdio(lease) => Some(lease.process_id()),
            Self::Remote(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Stdio(lease) => match lease.pid() {
                Some(pid) => format!("stdio pid {pid}"),
                None => "stdio".to_string(),
            },
            Self::Remote(lease) => format!("remote {}", lease.endpoint()),
        }
    }
}

/// Factory for backend handles.
#[derive(Clone)]
pub struct Backends {
    stdio: StdioBridge,
    remote: RemoteBridge,
}

impl Backends {
    pub fn new(stdio: StdioBridge, remote: RemoteBridge) -> Self {
        Self { stdio, remote }
    }

    pub fn stdio(&self) -> &StdioBridge {
        &self.stdio
    }

    pub async fn open(
        &self,
        adapter: &AdapterResource,
        ctx: BackendContext,
    ) -> Result<BackendHandle, GatewayError> {
        match adapter.connection_type {
            ConnectionType::LocalStdio => self.stdio.spawn(adapter, ctx).map(BackendHandle::Stdio),
            ConnectionType::RemoteHttp | ConnectionType::StreamableHttp => {
                self.remote.connect(adapter, ctx).map(BackendHandle::Remote)
            }
        }
    }
}
