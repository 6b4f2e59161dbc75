//! Request correlation IDs.
//!
//! Every request gets an ID that ties the ledger row, the server logs, and
//! the client response together. Callers may supply their own through
//! `x-request-id` (useful when the gateway sits behind another proxy); IDs
//! that are empty, oversized, or unreadable are replaced with a fresh UUID
//! rather than trusted. The ID rides on the request as an extension, on
//! every log line via the `request` span, and back to the client in the
//! response header.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument as _;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied ID the gateway will echo. Anything bigger is
/// replaced — response headers are not a place to round-trip payloads.
const MAX_INBOUND_ID_LEN: usize = 64;

#[derive(Clone, Debug)]
pub struct RequestId(pub String);

impl RequestId {
    /// Reuse the caller's ID when it is usable, otherwise mint one.
    pub fn resolve(headers: &HeaderMap) -> Self {
        let inbound = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|id| !id.is_empty() && id.len() <= MAX_INBOUND_ID_LEN);
        match inbound {
            Some(id) => Self(id.to_owned()),
            None => Self(Uuid::new_v4().to_string()),
        }
    }
}

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId::resolve(req.headers());
    let span = tracing::info_span!("request", request_id = %id.0);

    req.extensions_mut().insert(id.clone());
    let mut response = next.run(req).instrument(span).await;

    // Resolved IDs came from a header or a UUID, so this only fails if a
    // proxy smuggled something unprintable past `to_str` — skip it then.
    if let Ok(value) = HeaderValue::from_str(&id.0) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    // -----------------------------------------------------------------------
    // RequestId::resolve — pure header logic
    // -----------------------------------------------------------------------

    fn headers_with(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderValue::from_str(id).unwrap(),
        );
        headers
    }

    #[test]
    fn caller_supplied_id_is_reused() {
        let id = RequestId::resolve(&headers_with("req-from-upstream-proxy"));
        assert_eq!(id.0, "req-from-upstream-proxy");
    }

    #[test]
    fn missing_header_mints_a_uuid() {
        let id = RequestId::resolve(&HeaderMap::new());
        assert_eq!(id.0.len(), 36, "expected a UUID, got `{}`", id.0);
    }

    #[test]
    fn empty_header_is_replaced() {
        let id = RequestId::resolve(&headers_with(""));
        assert!(!id.0.is_empty());
        assert_eq!(id.0.len(), 36);
    }

    #[test]
    fn oversized_header_is_replaced() {
        let huge = "x".repeat(MAX_INBOUND_ID_LEN + 1);
        let id = RequestId::resolve(&headers_with(&huge));
        assert_ne!(id.0, huge);
        assert_eq!(id.0.len(), 36);
    }

    #[test]
    fn id_at_the_length_cap_is_kept() {
        let exact = "y".repeat(MAX_INBOUND_ID_LEN);
        let id = RequestId::resolve(&headers_with(&exact));
        assert_eq!(id.0, exact);
    }

    // -----------------------------------------------------------------------
    // Middleware — extension + response header
    // -----------------------------------------------------------------------

    async fn echo_id(id: Option<axum::Extension<RequestId>>) -> String {
        id.map(|axum::Extension(RequestId(id))| id)
            .unwrap_or_else(|| "no-id".into())
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(echo_id))
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn handler_sees_the_same_id_the_client_gets_back() {
        let resp = app()
            .oneshot(
                HttpRequest::get("/")
                    .header(REQUEST_ID_HEADER, "trace-me-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("trace-me-42")
        );
        let body = axum::body::to_bytes(resp.into_body(), 256).await.unwrap();
        assert_eq!(&body[..], b"trace-me-42");
    }

    #[tokio::test]
    async fn generated_id_is_echoed_when_none_is_supplied() {
        let resp = app()
            .oneshot(HttpRequest::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let echoed = resp
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .expect("response must carry a request id")
            .to_owned();
        let body = axum::body::to_bytes(resp.into_body(), 256).await.unwrap();
        assert_eq!(body, echoed.as_bytes());
        assert_eq!(echoed.len(), 36);
    }
}
