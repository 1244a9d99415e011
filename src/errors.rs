use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing or malformed field: {0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("plan does not permit this action")]
    Forbidden,

    #[error("unknown token")]
    InvalidToken,

    #[error("token expired")]
    Expired,

    #[error("token usage limit reached")]
    UsageExceeded,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True for the token-validation failure family. These render as HTTP
    /// 200 with `success: false` and a display message, per the public
    /// validate contract (see `api::bookmarklet::validate`).
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            AppError::InvalidToken | AppError::Expired | AppError::UsageExceeded
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Validation failures are not HTTP errors: the bookmarklet script
        // branches on the body's `success` flag alone.
        if self.is_validation_failure() {
            let message = match self {
                AppError::Expired => "Token has expired",
                AppError::UsageExceeded => "Token usage limit exceeded",
                _ => "Invalid token",
            };
            return (
                StatusCode::OK,
                Json(json!({ "success": false, "message": message })),
            )
                .into_response();
        }

        let (status, error_type, code, msg) = match &self {
            AppError::BadRequest(field) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                format!("missing or malformed field: {}", field),
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                format!("{} not found", what),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "plan_forbidden",
                "your plan does not permit this action".to_string(),
            ),
            // Handled above; kept exhaustive for the compiler.
            AppError::InvalidToken | AppError::Expired | AppError::UsageExceeded => {
                unreachable!("validation failures render as HTTP 200")
            }
            AppError::RateLimitExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "rate_limit_exceeded",
                "rate limit exceeded".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if matches!(self, AppError::RateLimitExceeded) {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("60"));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failure_family() {
        assert!(AppError::InvalidToken.is_validation_failure());
        assert!(AppError::Expired.is_validation_failure());
        assert!(AppError::UsageExceeded.is_validation_failure());
        assert!(!AppError::Forbidden.is_validation_failure());
        assert!(!AppError::BadRequest("token".into()).is_validation_failure());
    }

    #[test]
    fn bad_request_names_the_field() {
        let msg = format!("{}", AppError::BadRequest("projectId".into()));
        assert!(msg.contains("projectId"));
    }

    #[tokio::test]
    async fn validation_failures_render_as_http_200() {
        for (err, message) in [
            (AppError::InvalidToken, "Invalid token"),
            (AppError::Expired, "Token has expired"),
            (AppError::UsageExceeded, "Token usage limit exceeded"),
        ] {
            let resp = err.into_response();
            assert_eq!(resp.status(), StatusCode::OK);
            let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024)
                .await
                .unwrap();
            let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body["success"], false);
            assert_eq!(body["message"], message);
        }
    }

    #[test]
    fn other_errors_keep_their_http_status() {
        assert_eq!(
            AppError::Forbidden.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::NotFound("project").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::RateLimitExceeded.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
