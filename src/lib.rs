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

//! uniproxy: a Streamable HTTP gateway for MCP servers.
//!
//! Clients talk MCP over one HTTP endpoint per adapter. Each client session
//! is bound to its own backend: a spawned stdio process or a remote HTTP MCP
//! server. Side-effect-free list and read methods are answered from a
//! response cache when the backend's declared capabilities allow it.

pub mod adapters;
pub mod api;
pub mod config;
pub mod gateway;
pub mod gateway_core;
pub mod mcp;
pub mod protocol;
pub mod state;
