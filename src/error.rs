//! Gateway error taxonomy and the OpenAI-style error envelope.
//!
//! Every failure a client can observe maps to one [`GatewayError`] variant,
//! which converts into an HTTP response of the shape
//! `{"error": {"message", "type", "code"}}` via [`IntoResponse`]. Handlers
//! return `Result<T, GatewayError>` and propagate with `?`; internal plumbing
//! errors fold in through the blanket `From<anyhow::Error>`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing or unrecognized API key.
    #[error("{0}")]
    Auth(String),

    /// Request failed the shape check before reaching any paid stage.
    #[error("{0}")]
    Validation(String),

    /// Authenticated, but the tenant may not perform this operation.
    #[error("{0}")]
    Permission(String),

    /// The addressed resource does not exist for this tenant.
    #[error("{0}")]
    NotFound(String),

    /// A sliding-window limit was hit; `retry_after` is seconds until the
    /// smallest exceeded window rolls over.
    #[error("{message}")]
    RateLimited { message: String, retry_after: u64 },

    /// The upstream call failed terminally (after failover was exhausted or
    /// on a permanent provider error).
    #[error("{0}")]
    Upstream(String),

    /// The total pipeline deadline expired.
    #[error("request timed out in the gateway pipeline")]
    Timeout,

    /// A required collaborator (store, provider registry) is unusable.
    #[error("{0}")]
    Unavailable(String),

    /// Anything unexpected. Logged in full; clients see a generic message.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Permission(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout | Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The OpenAI-compatible `error.type` string.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Auth(_) => "authentication_error",
            Self::Validation(_) => "invalid_request_error",
            Self::Permission(_) => "permission_error",
            Self::NotFound(_) => "not_found_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::Upstream(_) | Self::Internal(_) => "api_error",
            Self::Timeout | Self::Unavailable(_) => "service_unavailable",
        }
    }

    /// Stable machine-readable code, one per variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "invalid_api_key",
            Self::Validation(_) => "invalid_request",
            Self::Permission(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::Upstream(_) => "upstream_error",
            Self::Timeout => "pipeline_timeout",
            Self::Unavailable(_) => "service_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        // Internal errors carry backtraces and connection strings in their
        // chains; log the detail, return a generic message.
        let message = match &self {
            Self::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                "internal gateway error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": {
                "message": message,
                "type": self.error_type(),
                "code": self.code(),
            }
        });

        match &self {
            Self::RateLimited { retry_after, .. } => {
                body["error"]["retry_after"] = json!(retry_after);
                let mut resp = (self.status(), Json(body)).into_response();
                if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                    resp.headers_mut().insert("retry-after", value);
                }
                resp
            }
            _ => (self.status(), Json(body)).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            GatewayError::Auth("no key".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::RateLimited {
                message: "limit".into(),
                retry_after: 12
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::Upstream("503 from provider".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(GatewayError::Timeout.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn error_types_follow_the_envelope_contract() {
        assert_eq!(
            GatewayError::Auth("x".into()).error_type(),
            "authentication_error"
        );
        assert_eq!(
            GatewayError::Validation("x".into()).error_type(),
            "invalid_request_error"
        );
        assert_eq!(
            GatewayError::RateLimited {
                message: "x".into(),
                retry_after: 1
            }
            .error_type(),
            "rate_limit_error"
        );
        assert_eq!(GatewayError::Timeout.error_type(), "service_unavailable");
        assert_eq!(
            GatewayError::Internal(anyhow::anyhow!("boom")).error_type(),
            "api_error"
        );
    }

    #[tokio::test]
    async fn rate_limit_response_carries_retry_after_header() {
        let err = GatewayError::RateLimited {
            message: "rate limit exceeded".into(),
            retry_after: 37,
        };
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            resp.headers().get("retry-after").and_then(|v| v.to_str().ok()),
            Some("37")
        );
        let bytes = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "rate_limit_error");
        assert_eq!(body["error"]["retry_after"], 37);
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_detail() {
        let err = GatewayError::Internal(anyhow::anyhow!("postgres://user:hunter2@db failed"));
        let resp = err.into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let message = body["error"]["message"].as_str().unwrap();
        assert!(!message.contains("hunter2"), "must not leak: {message}");
    }
}
