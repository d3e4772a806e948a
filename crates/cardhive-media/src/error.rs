//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`. Errors from
//! the service layer are `AppError` (or `Into<AppError>`) and convert via
//! `?` so every failure renders with a consistent status and body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cardhive_core::AppError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Wrapper type for AppError to implement IntoResponse. Needed because of
/// Rust's orphan rules: IntoResponse is external to cardhive-core.
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl<E: Into<AppError>> From<E> for HttpAppError {
    fn from(err: E) -> Self {
        HttpAppError(err.into())
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;

        let status = StatusCode::from_u16(app_error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %app_error, "Request failed");
        } else {
            tracing::debug!(error = %app_error, "Request rejected");
        }

        // Internal details never reach the client.
        let body = if app_error.is_sensitive() {
            Json(ErrorResponse {
                error: "Internal server error".to_string(),
                details: None,
            })
        } else {
            Json(ErrorResponse {
                error: app_error.to_string(),
                details: None,
            })
        };

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_message() {
        let response =
            HttpAppError(AppError::InvalidInput("file field is required".to_string()))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn sensitive_errors_map_to_500() {
        let response =
            HttpAppError(AppError::Internal("connection pool exhausted".to_string()))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_maps_to_404() {
        let response = HttpAppError(AppError::NotFound("media file".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
