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

//! Health, monitoring and session administration handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::api::responses::{ApiError, HealthResponse};
use crate::api::AppState;
use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::models::SessionId;

fn parse_session(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::from(GatewayError::SessionNotFound(raw.to_string())))
}

async fn require_adapter(state: &AppState, name: &str) -> Result<(), ApiError> {
    match state.gateway.adapters().get(name).await? {
        Some(_) => Ok(()),
        None => Err(GatewayError::AdapterNotFound(name.to_string()).into()),
    }
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let gateway = &state.gateway;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: gateway.started_at(),
        uptime_secs: (Utc::now() - gateway.started_at()).num_seconds(),
        sessions: gateway.router().sessions().len(),
        backend_processes: gateway.router().backends().stdio().process_count(),
    })
}

/// GET /api/v1/monitoring/metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Json<Value> {
    let router = state.gateway.router();
    let snapshot = router.monitor().snapshot();
    Json(json!({
        "counters": snapshot.counters,
        "sessions": router.sessions().len(),
        "backendProcesses": router.backends().stdio().process_count(),
        "droppedEvents": snapshot.dropped_events,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
    pub adapter: Option<String>,
}

/// GET /api/v1/monitoring/logs?limit=N&adapter=name
pub async fn logs_handler(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Json<Value> {
    let snapshot = state.gateway.router().monitor().snapshot();
    let mut events: Vec<_> = snapshot
        .recent_events
        .into_iter()
        .filter(|e| query.adapter.as_deref().map_or(true, |a| e.adapter == a))
        .collect();
    if let Some(limit) = query.limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }
    Json(json!({
        "events": events,
        "dropped": snapshot.dropped_events,
    }))
}

/// GET /api/v1/monitoring/cache
pub async fn cache_handler(State(state): State<AppState>) -> Json<Value> {
    let router = state.gateway.router();
    let stats = router.cache().stats().await;
    let snapshots: Vec<Value> = router
        .capabilities()
        .adapters()
        .into_iter()
        .filter_map(|name| router.capabilities().get(&name).map(|s| json!({"adapter": name, "snapshot": s.as_ref()})))
        .collect();
    Json(json!({
        "responses": stats,
        "capabilities": snapshots,
    }))
}

/// GET /api/v1/adapters/{name}/sessions
pub async fn list_sessions_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_adapter(&state, &name).await?;
    let sessions = state.gateway.router().sessions().list(Some(&name));
    Ok(Json(json!({
        "adapter": name,
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

/// GET /api/v1/adapters/{name}/sessions/{id}
pub async fn session_detail_handler(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let id = parse_session(&id)?;
    let session = state.gateway.router().sessions().get_for_adapter(&id, &name)?;
    Ok(Json(session.info()).into_response())
}

/// DELETE /api/v1/adapters/{name}/sessions/{id}
pub async fn terminate_session_handler(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let id = parse_session(&id)?;
    let router = state.gateway.router();
    router.sessions().get_for_adapter(&id, &name)?;
    if !router.terminate_session(&id, "terminated by administrator") {
        return Err(GatewayError::SessionNotFound(id.to_string()).into());
    }
    info!(adapter = %name, session_id = %id, "Session terminated by administrator");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/adapters/{name}/sessions
pub async fn terminate_adapter_sessions_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_adapter(&state, &name).await?;
    let terminated = state
        .gateway
        .router()
        .terminate_adapter_sessions(&name, "terminated by administrator");
    info!(adapter = %name, terminated, "Adapter sessions terminated by administrator");
    Ok(Json(json!({"adapter": name, "terminated": terminated})))
}
