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

//! Lifecycle events published on the gateway's broadcast hook.

use crate::gateway_core::models::SessionId;
use serde::Serialize;

/// Index of a backend process in the stdio bridge's process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProcessId(pub u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    SessionCreated {
        adapter: String,
        session_id: SessionId,
    },
    SessionTerminated {
        adapter: String,
        session_id: SessionId,
        reason: String,
    },
    /// A backend announced that its tools/resources/prompts changed.
    CapabilitiesChanged { adapter: String, method: String },
    ProcessExited {
        adapter: String,
        process_id: ProcessId,
        code: Option<i32>,
    },
}
