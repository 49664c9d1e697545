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

//! Streamable HTTP transport for MCP.
//!
//! One endpoint per adapter. `POST` carries a single JSON-RPC message and is
//! answered with plain JSON, or with an SSE stream when the backend produced
//! intermediate frames before the final response. `GET` opens the
//! session-scoped notification stream and `DELETE` ends the session.

use crate::api::AppState;
use crate::gateway_core::constants::{headers, limits};
use crate::gateway_core::errors::GatewayError;
use crate::gateway_core::models::SessionId;
use crate::protocol::handler::{IncomingMessage, ProtocolHandler};
use crate::mcp::router::{Rejected, Reply, Routed};
use crate::state::session_store::SessionStore;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

type RouteTask = JoinHandle<Result<Routed, Rejected>>;

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

fn header_str<'a>(map: &'a HeaderMap, name: &str) -> Option<&'a str> {
    map.get(name).and_then(|v| v.to_str().ok())
}

/// Session id from the header, falling back to the query string. An id that
/// cannot be valid is treated like an unknown one.
fn session_id(map: &HeaderMap, query: &SessionQuery) -> Result<Option<SessionId>, GatewayError> {
    let raw = header_str(map, headers::SESSION_ID).or(query.session_id.as_deref());
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| GatewayError::SessionNotFound(raw.to_string())),
    }
}

fn attach_session(response: &mut Response, session_id: Option<&SessionId>) {
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(id.as_str()).ok()) {
        response.headers_mut().insert(headers::SESSION_ID, value);
    }
}

fn error_reply(id: Value, error: &GatewayError, session_id: Option<&SessionId>) -> Response {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(ProtocolHandler::error_response(id, error))).into_response();
    attach_session(&mut response, session_id);
    response
}

fn into_http(outcome: Result<Routed, Rejected>) -> Response {
    match outcome {
        Ok(Routed {
            session_id,
            reply: Reply::Response(body),
        }) => {
            let mut response = (StatusCode::OK, Json(body)).into_response();
            attach_session(&mut response, session_id.as_ref());
            response
        }
        Ok(Routed {
            session_id,
            reply: Reply::Accepted,
        }) => {
            let mut response = StatusCode::ACCEPTED.into_response();
            attach_session(&mut response, session_id.as_ref());
            response
        }
        Err(rejected) => error_reply(rejected.id.clone(), &rejected.error, rejected.session_id.as_ref()),
    }
}

fn joined(done: Result<Result<Routed, Rejected>, JoinError>, reply_id: &Value) -> Result<Routed, Rejected> {
    done.unwrap_or_else(|e| {
        Err(Rejected {
            id: reply_id.clone(),
            session_id: None,
            error: GatewayError::Internal(format!("routing task failed: {e}")),
        })
    })
}

/// The last frame of an SSE reply: the response sharing the request's id.
fn final_frame(outcome: Result<Routed, Rejected>) -> Value {
    match outcome {
        Ok(Routed {
            reply: Reply::Response(body),
            ..
        }) => serde_json::to_value(&body).unwrap_or_default(),
        Ok(Routed {
            reply: Reply::Accepted,
            ..
        }) => Value::Null,
        Err(rejected) => serde_json::to_value(rejected.response()).unwrap_or_default(),
    }
}

fn sse_event(message: &Value) -> Event {
    Event::default().event("message").data(message.to_string())
}

fn stream_reply(
    first: Value,
    rx: mpsc::Receiver<Value>,
    task: RouteTask,
    session_id: Option<SessionId>,
    reply_id: Value,
) -> Response {
    let tail = stream::unfold(Some((rx, task, reply_id)), |state| async move {
        let (mut rx, mut task, reply_id) = state?;
        let next = tokio::select! {
            biased;
            frame = rx.recv() => Ok(frame),
            done = &mut task => Err(done),
        };
        match next {
            Ok(Some(frame)) => Some((frame, Some((rx, task, reply_id)))),
            Ok(None) => {
                let done = task.await;
                Some((final_frame(joined(done, &reply_id)), None))
            }
            Err(done) => Some((final_frame(joined(done, &reply_id)), None)),
        }
    });
    let frames = stream::once(async move { first })
        .chain(tail)
        .map(|message| Ok::<_, Infallible>(sse_event(&message)));

    let mut response = Sse::new(frames).into_response();
    attach_session(&mut response, session_id.as_ref());
    response
}

/// `POST /adapters/{name}/mcp`
pub async fn handle_post(
    State(state): State<AppState>,
    Path(adapter): Path<String>,
    Query(query): Query<SessionQuery>,
    map: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = ProtocolHandler::check_protocol_header(header_str(&map, headers::PROTOCOL_VERSION)) {
        return error_reply(Value::Null, &e, None);
    }
    let message = match ProtocolHandler::classify(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!(adapter = %adapter, error = %e, "Rejected client message");
            return error_reply(Value::Null, &e, None);
        }
    };
    let reply_id = message.reply_id();
    let session = match session_id(&map, &query) {
        Ok(session) => session,
        Err(e) => return error_reply(reply_id, &e, None),
    };
    let router = state.gateway.router().clone();

    if !matches!(message, IncomingMessage::Request(_)) {
        return into_http(router.route(&adapter, session, message, None).await);
    }

    // Requests run detached so a client disconnect never cancels a backend dispatch.
    if message.is_initialize() {
        let task = tokio::spawn(async move { router.route(&adapter, session, message, None).await });
        return into_http(joined(task.await, &reply_id));
    }

    let (tx, mut rx) = mpsc::channel(limits::STREAM_BUFFER);
    let stream_session = session.clone();
    let mut task: RouteTask =
        tokio::spawn(async move { router.route(&adapter, session, message, Some(tx)).await });

    let first = tokio::select! {
        biased;
        frame = rx.recv() => Ok(frame),
        done = &mut task => Err(done),
    };
    match first {
        Ok(Some(frame)) => stream_reply(frame, rx, task, stream_session, reply_id),
        Ok(None) => into_http(joined(task.await, &reply_id)),
        Err(done) => into_http(joined(done, &reply_id)),
    }
}

/// Marks the session idle once its notification stream goes away.
struct IdleOnDrop {
    sessions: Arc<SessionStore>,
    id: SessionId,
}

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        debug!(session_id = %self.id, "Notification stream closed");
        self.sessions.mark_idle(&self.id);
    }
}

/// `GET /adapters/{name}/mcp`
pub async fn handle_get(
    State(state): State<AppState>,
    Path(adapter): Path<String>,
    Query(query): Query<SessionQuery>,
    map: HeaderMap,
) -> Response {
    let accepts_stream = header_str(&map, header::ACCEPT.as_str())
        .is_some_and(|accept| accept.contains(headers::EVENT_STREAM));
    if !accepts_stream {
        let err = GatewayError::InvalidRequest("GET requires Accept: text/event-stream".into());
        return (
            StatusCode::NOT_ACCEPTABLE,
            Json(ProtocolHandler::error_response(Value::Null, &err)),
        )
            .into_response();
    }
    if let Err(e) = ProtocolHandler::check_protocol_header(header_str(&map, headers::PROTOCOL_VERSION)) {
        return error_reply(Value::Null, &e, None);
    }
    let sid = match session_id(&map, &query) {
        Ok(Some(sid)) => sid,
        Ok(None) => {
            let err = GatewayError::InvalidRequest("missing Mcp-Session-Id header".into());
            return error_reply(Value::Null, &err, None);
        }
        Err(e) => return error_reply(Value::Null, &e, None),
    };
    let router = state.gateway.router();
    let session = match router.sessions().get_for_adapter(&sid, &adapter) {
        Ok(session) => session,
        Err(e) => return error_reply(Value::Null, &e, None),
    };
    session.touch();
    info!(adapter = %adapter, session_id = %sid, "Notification stream opened");

    let guard = IdleOnDrop {
        sessions: router.sessions().clone(),
        id: sid.clone(),
    };
    let events = stream::unfold(
        (session.subscribe_notifications(), session.closed(), guard),
        |(mut rx, closed, guard)| async move {
            loop {
                let next = tokio::select! {
                    _ = closed.cancelled() => None,
                    message = rx.recv() => Some(message),
                };
                match next {
                    Some(Ok(message)) => {
                        return Some((Ok::<_, Infallible>(sse_event(&message)), (rx, closed, guard)))
                    }
                    Some(Err(RecvError::Lagged(skipped))) => {
                        warn!(session_id = %guard.id, skipped, "Notification stream lagged");
                    }
                    Some(Err(RecvError::Closed)) | None => return None,
                }
            }
        },
    );

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    attach_session(&mut response, Some(&sid));
    response
}

/// `DELETE /adapters/{name}/mcp`
pub async fn handle_delete(
    State(state): State<AppState>,
    Path(adapter): Path<String>,
    Query(query): Query<SessionQuery>,
    map: HeaderMap,
) -> Response {
    let sid = match session_id(&map, &query) {
        Ok(Some(sid)) => sid,
        Ok(None) => {
            let err = GatewayError::InvalidRequest("missing Mcp-Session-Id header".into());
            return error_reply(Value::Null, &err, None);
        }
        Err(e) => return error_reply(Value::Null, &e, None),
    };
    let router = state.gateway.router();
    if let Err(e) = router.sessions().get_for_adapter(&sid, &adapter) {
        return error_reply(Value::Null, &e, None);
    }
    router.terminate_session(&sid, "terminated by client");
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_sources() {
        let mut map = HeaderMap::new();
        let query = SessionQuery {
            session_id: Some("from-query".into()),
        };
        assert_eq!(
            session_id(&map, &query).unwrap().map(|s| s.to_string()),
            Some("from-query".to_string())
        );

        map.insert(headers::SESSION_ID, HeaderValue::from_static("from-header"));
        assert_eq!(
            session_id(&map, &query).unwrap().map(|s| s.to_string()),
            Some("from-header".to_string())
        );

        assert!(session_id(&HeaderMap::new(), &SessionQuery::default()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_session_id_is_unknown() {
        let query = SessionQuery {
            session_id: Some(String::new()),
        };
        assert!(matches!(
            session_id(&HeaderMap::new(), &query),
            Err(GatewayError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_final_frame_for_rejection_carries_id() {
        let frame = final_frame(Err(Rejected {
            id: serde_json::json!(7),
            session_id: None,
            error: GatewayError::backend_unavailable("a", "exit"),
        }));
        assert_eq!(frame["id"], 7);
        assert_eq!(frame["error"]["code"], -32000);
    }
}
