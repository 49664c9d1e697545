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

//! Session records and their keyed store.
//!
//! A [`Session`] exclusively owns its backend handle. The handle and the
//! handshake result live in `OnceCell`s so racing `initialize` calls for the
//! same session id run the spawn and the handshake exactly once.

use crate::gateway_core::constants::limits;
use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::models::SessionId;
use crate::gateway_core::session::SessionState;
use crate::mcp::backend::BackendHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of a completed `initialize`, replayed to later initializers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handshake {
    pub protocol_version: String,
    pub client_info: Option<Value>,
    pub result: Value,
}

struct Activity {
    last_active: Instant,
    last_active_at: DateTime<Utc>,
}

pub struct Session {
    id: SessionId,
    adapter_name: String,
    created_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    activity: Mutex<Activity>,
    handshake: OnceCell<Handshake>,
    backend: OnceCell<BackendHandle>,
    notifications: broadcast::Sender<Value>,
    closed: CancellationToken,
}

/// Serializable view for the administration endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub adapter_name: String,
    pub state: SessionState,
    pub protocol_version: Option<String>,
    pub client_info: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub backend: Option<String>,
}

impl Session {
    fn new(id: SessionId, adapter_name: &str) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        let (notifications, _) = broadcast::channel(limits::NOTIFICATION_BUFFER);
        let now = Utc::now();
        Self {
            id,
            adapter_name: adapter_name.to_string(),
            created_at: now,
            state,
            activity: Mutex::new(Activity {
                last_active: Instant::now(),
                last_active_at: now,
            }),
            handshake: OnceCell::new(),
            backend: OnceCell::new(),
            notifications,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Apply `next` if the lifecycle allows it. Returns whether it changed.
    pub fn transition(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                debug!(session_id = %self.id, from = %current, to = %next, "Session state change");
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Record traffic; an idle session becomes active again.
    pub fn touch(&self) {
        {
            let mut activity = self.activity.lock().unwrap_or_else(|p| p.into_inner());
            activity.last_active = Instant::now();
            activity.last_active_at = Utc::now();
        }
        if self.state() == SessionState::Idle {
            self.transition(SessionState::Active);
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.activity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .last_active
            .elapsed()
    }

    /// Wait out a concurrent handshake. Fails if the session did not come up.
    pub async fn wait_ready(&self) -> Result<(), GatewayError> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| !matches!(s, SessionState::Uninitialized | SessionState::Initializing))
            .await
            .map_err(|_| GatewayError::SessionNotFound(self.id.to_string()))?;
        if state.is_live() {
            Ok(())
        } else {
            Err(GatewayError::SessionNotFound(self.id.to_string()))
        }
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.get()
    }

    pub(crate) fn handshake_cell(&self) -> &OnceCell<Handshake> {
        &self.handshake
    }

    pub(crate) fn backend_cell(&self) -> &OnceCell<BackendHandle> {
        &self.backend
    }

    pub fn backend(&self) -> Result<&BackendHandle, GatewayError> {
        self.backend
            .get()
            .ok_or_else(|| GatewayError::SessionNotFound(self.id.to_string()))
    }

    pub fn notifications(&self) -> &broadcast::Sender<Value> {
        &self.notifications
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Value> {
        self.notifications.subscribe()
    }

    /// Cancelled once the session is terminated; ends GET streams.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn info(&self) -> SessionInfo {
        let handshake = self.handshake.get();
        SessionInfo {
            id: self.id.clone(),
            adapter_name: self.adapter_name.clone(),
            state: self.state(),
            protocol_version: handshake.map(|h| h.protocol_version.clone()),
            client_info: handshake.and_then(|h| h.client_info.clone()),
            created_at: self.created_at,
            last_active_at: self
                .activity
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .last_active_at,
            backend: self.backend.get().map(BackendHandle::describe),
        }
    }

    fn release_backend(&self) {
        if let Some(backend) = self.backend.get() {
            backend.release();
        }
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(|p| p.into_inner())
    }

    /// New session with a gateway-issued id.
    pub fn create(&self, adapter: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(SessionId::generate(), adapter));
        self.write().insert(session.id.clone(), session.clone());
        session
    }

    /// Existing session for `id`, or a fresh one adopting `id`. The flag is
    /// true when this call created it. An id bound to another adapter is unknown.
    pub fn get_or_create(
        &self,
        id: SessionId,
        adapter: &str,
    ) -> Result<(Arc<Session>, bool), GatewayError> {
        let mut sessions = self.write();
        if let Some(existing) = sessions.get(&id) {
            if existing.adapter_name != adapter || existing.state().is_terminal() {
                return Err(GatewayError::SessionNotFound(id.to_string()));
            }
            return Ok((existing.clone(), false));
        }
        let session = Arc::new(Session::new(id.clone(), adapter));
        sessions.insert(id, session.clone());
        Ok((session, true))
    }

    pub fn get(&self, id: &SessionId) -> Result<Arc<Session>, GatewayError> {
        self.read()
            .get(id)
            .filter(|s| !matches!(s.state(), SessionState::Terminating | SessionState::Terminated))
            .cloned()
            .ok_or_else(|| GatewayError::SessionNotFound(id.to_string()))
    }

    /// Like [`get`](Self::get) but also checks the session belongs to `adapter`.
    pub fn get_for_adapter(&self, id: &SessionId, adapter: &str) -> Result<Arc<Session>, GatewayError> {
        self.get(id)
            .and_then(|s| if s.adapter_name == adapter { Ok(s) } else { Err(GatewayError::SessionNotFound(id.to_string())) })
    }

    pub fn touch(&self, id: &SessionId) -> Result<(), GatewayError> {
        self.get(id).map(|s| s.touch())
    }

    /// Terminate and remove. The backend handle is released before the
    /// record leaves the store. Returns `None` if already gone or terminating.
    pub fn terminate(&self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.read().get(id).cloned()?;
        if !session.transition(SessionState::Terminating) {
            return None;
        }
        session.release_backend();
        self.write().remove(id);
        session.transition(SessionState::Terminated);
        session.closed.cancel();
        info!(session_id = %id, adapter = %session.adapter_name, "Session terminated");
        Some(session)
    }

    pub fn terminate_where<F>(&self, predicate: F) -> Vec<Arc<Session>>
    where
        F: Fn(&Session) -> bool,
    {
        let ids: Vec<SessionId> = self
            .read()
            .values()
            .filter(|s| predicate(s))
            .map(|s| s.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.terminate(id)).collect()
    }

    pub fn terminate_all(&self) -> Vec<Arc<Session>> {
        self.terminate_where(|_| true)
    }

    /// Idle-timer pass: active sessions quiet for `idle_after` become idle,
    /// anything quiet for `max_idle` is terminated and returned.
    pub fn sweep_idle(&self, idle_after: Duration, max_idle: Duration) -> Vec<Arc<Session>> {
        let snapshot: Vec<Arc<Session>> = self.read().values().cloned().collect();
        let mut expired = Vec::new();
        for session in snapshot {
            let quiet = session.idle_for();
            if quiet >= max_idle {
                if let Some(s) = self.terminate(&session.id) {
                    expired.push(s);
                }
            } else if quiet >= idle_after && session.state() == SessionState::Active {
                session.transition(SessionState::Idle);
            }
        }
        expired
    }

    /// Mark idle after a client stream went away; no-op unless active.
    pub fn mark_idle(&self, id: &SessionId) {
        if let Ok(session) = self.get(id) {
            if session.state() == SessionState::Active {
                session.transition(SessionState::Idle);
            }
        }
    }

    pub fn list(&self, adapter: Option<&str>) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .read()
            .values()
            .filter(|s| adapter.map_or(true, |a| s.adapter_name == a))
            .map(|s| s.info())
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activate(session: &Session) {
        assert!(session.transition(SessionState::Initializing));
        assert!(session.transition(SessionState::Active));
    }

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::new();
        let session = store.create("weather");
        let found = store.get(session.id()).unwrap();
        assert_eq!(found.adapter_name(), "weather");
        assert_eq!(found.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_unknown_id_is_reinitialize_error() {
        let store = SessionStore::new();
        let err = store.get(&SessionId::generate()).err().unwrap();
        assert!(matches!(err, GatewayError::SessionNotFound(_)));
    }

    #[test]
    fn test_get_or_create_adopts_and_reuses() {
        let store = SessionStore::new();
        let id: SessionId = "client-chosen".parse().unwrap();
        let (first, created) = store.get_or_create(id.clone(), "a").unwrap();
        assert!(created);
        let (second, created) = store.get_or_create(id.clone(), "a").unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(store.get_or_create(id, "other").is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_terminate_once() {
        let store = SessionStore::new();
        let session = store.create("a");
        activate(&session);
        assert!(store.terminate(session.id()).is_some());
        assert!(store.terminate(session.id()).is_none());
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(session.closed().is_cancelled());
        assert!(store.get(session.id()).is_err());
    }

    #[test]
    fn test_sweep_idle_marks_then_expires() {
        let store = SessionStore::new();
        let session = store.create("a");
        activate(&session);

        let expired = store.sweep_idle(Duration::ZERO, Duration::from_secs(3600));
        assert!(expired.is_empty());
        assert_eq!(session.state(), SessionState::Idle);

        session.touch();
        assert_eq!(session.state(), SessionState::Active);

        let expired = store.sweep_idle(Duration::ZERO, Duration::ZERO);
        assert_eq!(expired.len(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_wait_ready_follows_handshake() {
        let store = SessionStore::new();
        let session = store.create("a");
        session.transition(SessionState::Initializing);

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_ready().await })
        };
        session.transition(SessionState::Active);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_ready_fails_when_terminated() {
        let store = SessionStore::new();
        let session = store.create("a");
        session.transition(SessionState::Initializing);
        store.terminate(session.id());
        assert!(session.wait_ready().await.is_err());
    }
}
