//! Cross-cutting gateway middleware, applied in the order security headers
//! -> rate limit -> request validation -> request id -> perf tap, with CORS
//! handled separately as a `tower_http` layer wrapping all of them.

use super::state::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::time::Instant;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Attach the fixed security header set to every response.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("strict-origin-when-cross-origin"));
    response
}

/// Token-bucket rate limiting keyed by client IP. Rejects over-limit
/// requests with 429 and `Retry-After`/rate-limit headers on every
/// response either way.
pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let check = state.rate_limiter.check(addr.ip());
    if !check.allowed {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({ "error": "rate limit exceeded" })),
        )
            .into_response();
        response.headers_mut().insert(
            "Retry-After",
            HeaderValue::from_str(&check.retry_after_secs.to_string()).unwrap(),
        );
        return response;
    }

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        "X-RateLimit-Remaining",
        HeaderValue::from_str(&check.remaining.to_string()).unwrap_or(HeaderValue::from_static("0")),
    );
    response
}

/// Enforce a body-size ceiling and a `Content-Type: application/json`
/// requirement on mutating methods.
pub async fn validate_request(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    if method == axum::http::Method::POST || method == axum::http::Method::PUT {
        let content_type = request
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.starts_with("application/json") {
            return (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                axum::Json(serde_json::json!({ "error": "Content-Type must be application/json" })),
            )
                .into_response();
        }
    }

    if let Some(len) = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if len > MAX_BODY_BYTES {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                axum::Json(serde_json::json!({ "error": "request body too large" })),
            )
                .into_response();
        }
    }

    next.run(request).await
}

/// Echo an inbound `X-Request-ID` or generate one, attaching it to the
/// response.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response {
    let id = request
        .headers()
        .get("X-Request-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert("X-Request-ID", HeaderValue::from_str(&id).unwrap_or(HeaderValue::from_static("invalid")));
    response
}

/// Request id propagated via request extensions so handlers can tag error
/// records with it.
#[derive(Clone)]
pub struct RequestId(pub String);

/// Capture request start time and feed the completed observation into the
/// performance monitor.
pub async fn perf_tap(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let endpoint = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    state.perf.observe(crate::perf::RequestObservation {
        endpoint,
        method,
        status_code: response.status().as_u16(),
        duration_ms,
    });
    response
}

/// Whether `addr` is loopback or falls in an RFC-1918 private range.
pub fn is_private_network(addr: &std::net::IpAddr) -> bool {
    match addr {
        std::net::IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.octets()[0] == 10
                || (v4.octets()[0] == 172 && (16..=31).contains(&v4.octets()[1]))
                || (v4.octets()[0] == 192 && v4.octets()[1] == 168)
        }
        std::net::IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Guard for `/metrics` and `/api/stats`: admitted only from a private
/// network or with the configured bearer token.
pub async fn internal_only(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let bearer_ok = match &state.config.gateway.internal_bearer_token {
        Some(expected) => request
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {expected}"))
            .unwrap_or(false),
        None => false,
    };

    if is_private_network(&addr.ip()) || bearer_ok {
        next.run(request).await
    } else {
        (StatusCode::FORBIDDEN, axum::Json(serde_json::json!({ "error": "internal route" }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn loopback_and_private_ranges_are_recognised() {
        assert!(is_private_network(&IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(is_private_network(&IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        assert!(is_private_network(&IpAddr::V4(Ipv4Addr::new(172, 20, 0, 1))));
        assert!(is_private_network(&IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
        assert!(!is_private_network(&IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
        assert!(!is_private_network(&IpAddr::V4(Ipv4Addr::new(172, 32, 0, 1))));
    }
}
