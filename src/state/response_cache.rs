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

//! Response cache for side-effect-free MCP methods.
//!
//! Entries are keyed by `(adapter, fingerprint)` where the fingerprint is a
//! SHA-256 over the method name and the canonical form of its params.
//! Capacity is bounded with LRU eviction; each entry carries its own TTL.

use crate::gateway_core::constants::methods;
use futures::future::{BoxFuture, FutureExt, Shared};
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use moka::Expiry;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// TTL for a cacheable method, scaled from the configured default.
/// `None` means the method is never cached.
pub fn ttl_for(method: &str, default_ttl: Duration) -> Option<Duration> {
    match method {
        methods::TOOLS_LIST
        | methods::RESOURCES_LIST
        | methods::RESOURCES_TEMPLATES_LIST
        | methods::PROMPTS_LIST => Some(default_ttl),
        methods::RESOURCES_READ | methods::PROMPTS_GET => Some(default_ttl / 5),
        _ => None,
    }
}

/// Stable hash of method + params. Object keys are sorted and `_meta`
/// (progress tokens and other per-call envelope data) is ignored.
pub fn fingerprint(method: &str, params: Option<&Value>) -> String {
    let mut canonical = String::new();
    if let Some(params) = params {
        match params {
            Value::Object(map) => {
                let stripped: serde_json::Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| k.as_str() != "_meta")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                write_canonical(&Value::Object(stripped), &mut canonical);
            }
            other => write_canonical(other, &mut canonical),
        }
    }
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(field, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub adapter: String,
    pub fingerprint: String,
}

#[derive(Debug)]
pub struct CacheEntry {
    /// Method the result was produced by; checked on every hit.
    pub method: String,
    pub result: Value,
    pub inserted_at: Instant,
    pub ttl: Duration,
    hits: AtomicU64,
}

impl CacheEntry {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

struct EntryTtl;

impl Expiry<CacheKey, Arc<CacheEntry>> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: u64,
    pub max_entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub struct ResponseCache {
    entries: Cache<CacheKey, Arc<CacheEntry>>,
    max_entries: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryTtl)
            .support_invalidation_closures()
            .build();
        Self {
            entries,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, adapter: &str, fingerprint: &str) -> Option<Arc<CacheEntry>> {
        let key = CacheKey {
            adapter: adapter.to_string(),
            fingerprint: fingerprint.to_string(),
        };
        match self.entries.get(&key).await {
            Some(entry) if !entry.is_expired() => {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                self.entries.invalidate(&key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, adapter: &str, fingerprint: &str, method: &str, result: Value, ttl: Duration) {
        let key = CacheKey {
            adapter: adapter.to_string(),
            fingerprint: fingerprint.to_string(),
        };
        let entry = Arc::new(CacheEntry {
            method: method.to_string(),
            result,
            inserted_at: Instant::now(),
            ttl,
            hits: AtomicU64::new(0),
        });
        self.entries.insert(key, entry).await;
    }

    pub async fn invalidate(&self, adapter: &str, fingerprint: &str) {
        self.entries
            .invalidate(&CacheKey {
                adapter: adapter.to_string(),
                fingerprint: fingerprint.to_string(),
            })
            .await;
    }

    /// Drop every entry for one adapter.
    pub fn invalidate_adapter(&self, adapter: &str) {
        let adapter = adapter.to_string();
        if let Err(e) = self.entries.invalidate_entries_if(move |k, _| k.adapter == adapter) {
            debug!(error = %e, "Falling back to full cache invalidation");
            self.entries.invalidate_all();
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries: self.entries.entry_count(),
            max_entries: self.max_entries,
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }
}

/// At most one in-flight computation per key; concurrent callers with the
/// same key await the leader's outcome.
pub struct SingleFlight<K, T: Clone> {
    calls: Mutex<HashMap<K, Shared<BoxFuture<'static, T>>>>,
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` unless a call for `key` is already in flight, in which
    /// case join it. The flag reports whether this caller joined.
    pub async fn run<F>(&self, key: K, make: F) -> (T, bool)
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let (call, joined) = {
            let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
            match calls.get(&key) {
                Some(existing) => (existing.clone(), true),
                None => {
                    let call = make().shared();
                    calls.insert(key.clone(), call.clone());
                    (call, false)
                }
            }
        };

        let out = call.clone().await;

        let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
        if calls.get(&key).is_some_and(|current| current.ptr_eq(&call)) {
            calls.remove(&key);
        }
        (out, joined)
    }

    pub fn in_flight(&self) -> usize {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
