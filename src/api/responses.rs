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

//! Response types for the administration endpoints.

use crate::gateway_core::errors::GatewayError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub sessions: usize,
    pub backend_processes: usize,
}

/// API error type that converts domain errors to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // JSON-RPC level errors ride on 200 at the MCP endpoint; here they are plain failures.
        let status = if status == StatusCode::OK {
            StatusCode::BAD_REQUEST
        } else {
            status
        };
        Self::new(status, err.user_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_mapping() {
        assert_eq!(
            ApiError::from(GatewayError::SessionNotFound("s".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(GatewayError::InvalidParams("p".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(GatewayError::Configuration("secret path".into())).message,
            "Internal error"
        );
    }
}
