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

//! Axum web server layer.

use axum::http::{header, HeaderName, Method};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub mod handlers;
pub mod responses;

use crate::gateway::Gateway;
use crate::gateway_core::constants::headers;
use crate::mcp::transport;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

/// Create the Axum router with all routes and middleware.
///
/// No global request timeout: SSE replies and GET notification streams are
/// long-lived, and every backend dispatch already carries its own deadline.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.gateway.config().body_limit_bytes;

    let session_header = HeaderName::from_static(headers::SESSION_ID);
    let version_header = HeaderName::from_static(headers::PROTOCOL_VERSION);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            session_header.clone(),
            version_header,
        ])
        .expose_headers([session_header]);

    Router::new()
        .route(
            "/adapters/:name/mcp",
            get(transport::handle_get)
                .post(transport::handle_post)
                .delete(transport::handle_delete),
        )
        .route("/health", get(handlers::health_handler))
        .route("/api/v1/monitoring/metrics", get(handlers::metrics_handler))
        .route("/api/v1/monitoring/logs", get(handlers::logs_handler))
        .route("/api/v1/monitoring/cache", get(handlers::cache_handler))
        .route(
            "/api/v1/adapters/:name/sessions",
            get(handlers::list_sessions_handler).delete(handlers::terminate_adapter_sessions_handler),
        )
        .route(
            "/api/v1/adapters/:name/sessions/:id",
            get(handlers::session_detail_handler).delete(handlers::terminate_session_handler),
        )
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
