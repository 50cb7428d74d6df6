use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::store::StoreError;

/// Request-level error taxonomy. Every variant renders the uniform
/// `{"success": false, "message": ..., "error": ...}` body; the status code
/// carries the class for programmatic handling.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{context}")]
    Gateway {
        context: String,
        #[source]
        source: GatewayError,
    },
    #[error("{context}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
    /// Linked data that should exist is missing or unusable, e.g. session
    /// metadata written by the checkout path.
    #[error("{0}")]
    DataIntegrity(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn gateway(context: impl Into<String>, source: GatewayError) -> Self {
        Self::Gateway {
            context: context.into(),
            source,
        }
    }

    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gateway { .. } | Self::Store { .. } | Self::DataIntegrity(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn source_message(&self) -> Option<String> {
        match self {
            Self::Gateway { source, .. } => Some(source.to_string()),
            Self::Store { source, .. } => Some(source.to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let source = self.source_message();
        if status.is_server_error() {
            tracing::error!(error = %self, source = source.as_deref().unwrap_or(""), "request failed");
        }

        let mut body = json!({
            "success": false,
            "message": self.to_string(),
        });
        if let Some(source) = source {
            body["error"] = Value::String(source);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validation_renders_400_with_message() {
        let resp = ApiError::validation("Missing session ID").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_errors_render_500_with_source() {
        let err = ApiError::store("Failed to enroll in course", StoreError::NotFound);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Failed to enroll in course");
        assert!(err.source_message().is_some());
    }
}
