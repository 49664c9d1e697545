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

//! Per-adapter capability snapshots.

use crate::gateway_core::constants::methods;
use crate::state::session_store::Handshake;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// What a backend declared at handshake, plus the lists observed since.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    pub protocol_version: String,
    pub server_info: Option<Value>,
    pub capabilities: Value,
    pub tools: Option<Vec<Value>>,
    pub resources: Option<Vec<Value>>,
    pub prompts: Option<Vec<Value>>,
    pub refreshed_at: DateTime<Utc>,
}

impl CapabilitySnapshot {
    pub fn from_handshake(handshake: &Handshake) -> Self {
        let result = &handshake.result;
        Self {
            protocol_version: result
                .get("protocolVersion")
                .and_then(Value::as_str)
                .unwrap_or(&handshake.protocol_version)
                .to_string(),
            server_info: result.get("serverInfo").cloned(),
            capabilities: result
                .get("capabilities")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default())),
            tools: None,
            resources: None,
            prompts: None,
            refreshed_at: Utc::now(),
        }
    }

    pub fn declares(&self, capability: &str) -> bool {
        self.capabilities.get(capability).is_some_and(|v| !v.is_null())
    }

    /// A cacheable method may only be served from cache when the backend
    /// declared the capability behind it. Subscribable resources can change
    /// between reads, so `resources/read` is never safe for them.
    pub fn allows_caching(&self, method: &str) -> bool {
        match method {
            methods::TOOLS_LIST => self.declares("tools"),
            methods::RESOURCES_LIST | methods::RESOURCES_TEMPLATES_LIST => self.declares("resources"),
            methods::RESOURCES_READ => {
                self.declares("resources")
                    && !self
                        .capabilities
                        .pointer("/resources/subscribe")
                        .and_then(Value::as_bool)
                        .unwrap_or(false)
            }
            methods::PROMPTS_LIST | methods::PROMPTS_GET => self.declares("prompts"),
            _ => false,
        }
    }

    /// Fold an observed list response into the snapshot.
    pub fn absorb_list(&mut self, method: &str, result: &Value) -> bool {
        let (slot, key) = match method {
            methods::TOOLS_LIST => (&mut self.tools, "tools"),
            methods::RESOURCES_LIST => (&mut self.resources, "resources"),
            methods::PROMPTS_LIST => (&mut self.prompts, "prompts"),
            _ => return false,
        };
        match result.get(key).and_then(Value::as_array) {
            Some(items) => {
                *slot = Some(items.clone());
                self.refreshed_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
pub struct CapabilityCache {
    snapshots: RwLock<HashMap<String, Arc<CapabilitySnapshot>>>,
    /// Bumped on every invalidation. A list fetched under an older
    /// generation must not be stored.
    generations: RwLock<HashMap<String, u64>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, adapter: &str, snapshot: CapabilitySnapshot) {
        self.snapshots
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(adapter.to_string(), Arc::new(snapshot));
    }

    pub fn get(&self, adapter: &str) -> Option<Arc<CapabilitySnapshot>> {
        self.snapshots
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(adapter)
            .cloned()
    }

    pub fn generation(&self, adapter: &str) -> u64 {
        self.generations
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(adapter)
            .copied()
            .unwrap_or(0)
    }

    pub fn invalidate(&self, adapter: &str) -> bool {
        *self
            .generations
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(adapter.to_string())
            .or_insert(0) += 1;
        self.snapshots
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(adapter)
            .is_some()
    }

    /// Update the lists of an existing snapshot. A missing snapshot stays missing.
    pub fn record_list(&self, adapter: &str, method: &str, result: &Value) {
        let mut snapshots = self.snapshots.write().unwrap_or_else(|p| p.into_inner());
        if let Some(current) = snapshots.get_mut(adapter) {
            let mut updated = (**current).clone();
            if updated.absorb_list(method, result) {
                *current = Arc::new(updated);
            }
        }
    }

    pub fn adapters(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .snapshots
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handshake(capabilities: Value) -> Handshake {
        Handshake {
            protocol_version: "2024-11-05".into(),
            client_info: None,
            result: json!({
                "protocolVersion": "2024-11-05",
                "capabilities": capabilities,
                "serverInfo": {"name": "mock", "version": "1"}
            }),
        }
    }

    #[test]
    fn test_caching_requires_declared_capability() {
        let snap = CapabilitySnapshot::from_handshake(&handshake(json!({"tools": {}})));
        assert!(snap.allows_caching(methods::TOOLS_LIST));
        assert!(!snap.allows_caching(methods::PROMPTS_LIST));
        assert!(!snap.allows_caching(methods::TOOLS_CALL));
    }

    #[test]
    fn test_subscribable_resources_are_not_cached() {
        let snap = CapabilitySnapshot::from_handshake(&handshake(json!({"resources": {"subscribe": true}})));
        assert!(snap.allows_caching(methods::RESOURCES_LIST));
        assert!(!snap.allows_caching(methods::RESOURCES_READ));

        let snap = CapabilitySnapshot::from_handshake(&handshake(json!({"resources": {}})));
        assert!(snap.allows_caching(methods::RESOURCES_READ));
    }

    #[test]
    fn test_record_list_and_invalidate() {
        let cache = CapabilityCache::new();
        cache.record_list("a", methods::TOOLS_LIST, &json!({"tools": []}));
        assert!(cache.get("a").is_none());

        cache.set("a", CapabilitySnapshot::from_handshake(&handshake(json!({"tools": {}}))));
        cache.record_list("a", methods::TOOLS_LIST, &json!({"tools": [{"name": "echo"}]}));
        let snap = cache.get("a").unwrap();
        assert_eq!(snap.tools.as_ref().map(Vec::len), Some(1));

        assert!(cache.invalidate("a"));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_invalidate_advances_generation() {
        let cache = CapabilityCache::new();
        assert_eq!(cache.generation("a"), 0);
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.generation("a"), 1);
        cache.set("a", CapabilitySnapshot::from_handshake(&handshake(json!({"tools": {}}))));
        assert_eq!(cache.generation("a"), 1);
        cache.invalidate("a");
        assert_eq!(cache.generation("a"), 2);
        assert_eq!(cache.generation("b"), 0);
    }
}
