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

//! Request metrics and a bounded ring of recent events.
//!
//! Counters are atomics. The ring is behind a mutex held only for a push or
//! a clone; when full, the oldest record is dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Request,
    CacheHit,
    SessionCreated,
    SessionTerminated,
    BackendFailure,
    InternalError,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub adapter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Set for cacheable methods: whether the answer came from the cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl MonitorEvent {
    pub fn new(kind: EventKind, adapter: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            adapter: adapter.into(),
            session_id: None,
            method: None,
            success: true,
            latency_ms: None,
            cache_hit: (kind == EventKind::CacheHit).then_some(true),
            detail: None,
        }
    }

    pub fn session(mut self, id: impl ToString) -> Self {
        self.session_id = Some(id.to_string());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }

    pub fn cache_miss(mut self) -> Self {
        self.cache_hit = Some(false);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn failed(mut self, detail: impl Into<String>) -> Self {
        self.success = false;
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Default)]
struct AdapterCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub counters: BTreeMap<String, CounterSnapshot>,
    pub recent_events: Vec<MonitorEvent>,
    pub dropped_events: u64,
}

pub struct Monitor {
    counters: RwLock<HashMap<String, Arc<AdapterCounters>>>,
    recent: Mutex<VecDeque<MonitorEvent>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Monitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            recent: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    fn counters_for(&self, adapter: &str) -> Arc<AdapterCounters> {
        if let Some(c) = self
            .counters
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(adapter)
        {
            return c.clone();
        }
        self.counters
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(adapter.to_string())
            .or_default()
            .clone()
    }

    /// Never waits on readers for long and never applies backpressure.
    pub fn record(&self, event: MonitorEvent) {
        let counters = self.counters_for(&event.adapter);
        if !matches!(event.kind, EventKind::SessionCreated | EventKind::SessionTerminated) {
            counters.requests.fetch_add(1, Ordering::Relaxed);
        }
        match event.cache_hit {
            Some(true) => counters.cache_hits.fetch_add(1, Ordering::Relaxed),
            Some(false) => counters.cache_misses.fetch_add(1, Ordering::Relaxed),
            None => 0,
        };
        if !event.success {
            counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(ms) = event.latency_ms {
            counters.total_latency_ms.fetch_add(ms, Ordering::Relaxed);
            counters.max_latency_ms.fetch_max(ms, Ordering::Relaxed);
        }

        let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        if recent.len() >= self.capacity {
            recent.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        recent.push_back(event);
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let counters = self
            .counters
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(name, c)| {
                let requests = c.requests.load(Ordering::Relaxed);
                let total = c.total_latency_ms.load(Ordering::Relaxed);
                (
                    name.clone(),
                    CounterSnapshot {
                        requests,
                        errors: c.errors.load(Ordering::Relaxed),
                        cache_hits: c.cache_hits.load(Ordering::Relaxed),
                        cache_misses: c.cache_misses.load(Ordering::Relaxed),
                        avg_latency_ms: if requests == 0 { 0.0 } else { total as f64 / requests as f64 },
                        max_latency_ms: c.max_latency_ms.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        let recent_events = self
            .recent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect();
        MonitorSnapshot {
            counters,
            recent_events,
            dropped_events: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn counters(&self, adapter: &str) -> CounterSnapshot {
        self.snapshot().counters.remove(adapter).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_drops_oldest() {
        let monitor = Monitor::new(3);
        for i in 0..5 {
            monitor.record(MonitorEvent::new(EventKind::Request, "a").method(format!("m{i}")));
        }
        let snap = monitor.snapshot();
        let methods: Vec<_> = snap.recent_events.iter().filter_map(|e| e.method.clone()).collect();
        assert_eq!(methods, vec!["m2", "m3", "m4"]);
        assert_eq!(snap.dropped_events, 2);
        assert_eq!(snap.counters["a"].requests, 5);
    }

    #[test]
    fn test_counters_per_adapter() {
        let monitor = Monitor::new(10);
        monitor.record(MonitorEvent::new(EventKind::CacheHit, "a").method("tools/list").latency_ms(1));
        monitor.record(
            MonitorEvent::new(EventKind::Request, "a")
                .method("tools/list")
                .cache_miss()
                .latency_ms(9),
        );
        monitor.record(MonitorEvent::new(EventKind::SessionCreated, "a"));
        monitor.record(
            MonitorEvent::new(EventKind::BackendFailure, "b")
                .method("tools/call")
                .failed("process exited"),
        );

        let a = monitor.counters("a");
        assert_eq!(a.requests, 2);
        assert_eq!(a.cache_hits, 1);
        assert_eq!(a.cache_misses, 1);
        assert_eq!(a.max_latency_ms, 9);
        assert_eq!(a.avg_latency_ms, 5.0);

        let b = monitor.counters("b");
        assert_eq!(b.errors, 1);
        assert_eq!(monitor.counters("missing"), CounterSnapshot::default());
    }
}
