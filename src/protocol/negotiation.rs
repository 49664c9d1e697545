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

//! Protocol version negotiation.
//!
//! The gateway does not rewrite the version a client asks for; the backend
//! answers the handshake. This decides what the gateway itself assumes when
//! the backend does not say, and which `MCP-Protocol-Version` headers it accepts.

use crate::gateway_core::constants::protocol::{LATEST_VERSION, SUPPORTED_VERSIONS};
use tracing::info;

pub struct HandshakeManager;

impl HandshakeManager {
    pub fn is_supported(version: &str) -> bool {
        SUPPORTED_VERSIONS.contains(&version)
    }

    /// The version the gateway records for a client request.
    pub fn negotiate(client_version: &str) -> &'static str {
        match SUPPORTED_VERSIONS.iter().find(|v| **v == client_version) {
            Some(version) => version,
            None => {
                info!(
                    "Unknown version '{}', assuming {}",
                    client_version, LATEST_VERSION
                );
                LATEST_VERSION
            }
        }
    }
}
