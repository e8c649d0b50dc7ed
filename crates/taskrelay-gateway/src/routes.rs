//! API route handlers for the gateway.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use taskrelay_core::RelayError;

use super::admission::{Admission, AdmissionRequest, TaskRequest};
use super::server::AppState;

const RECENT_FAULTS: usize = 20;

/// Caller identity for rate limiting. The peer IP, unless the peer is a
/// trusted proxy, in which case `X-Client-Id` and then the first
/// `X-Forwarded-For` hop name the client. No peer at all is `anonymous`.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = peer else {
        return "anonymous".to_string();
    };
    if !trusted_proxies.contains(&peer.ip()) {
        return peer.ip().to_string();
    }

    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(id) = header_str("x-client-id") {
        return id.to_string();
    }
    header_str("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| peer.ip().to_string(), str::to_string)
}

fn error_body(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(serde_json::json!({
            "ok": false,
            "error": code,
            "message": message,
        })),
    )
        .into_response()
}

/// POST /api/v1/tasks
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    extensions: Extensions,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut task: TaskRequest = match serde_json::from_slice(&body) {
        Ok(t) => t,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, "invalid_request", format!("malformed body: {e}")),
    };
    if task.idempotency_key.is_none() {
        task.idempotency_key = headers
            .get("idempotency-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let peer = extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let request = AdmissionRequest {
        client_key: client_key(&headers, peer, &state.trusted_proxies),
        task,
    };

    match state.admission.admit(request) {
        Ok(Admission::Accepted(task)) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "ok": true, "replayed": false, "task": task })),
        )
            .into_response(),
        Ok(Admission::Replayed(task)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "ok": true, "replayed": true, "task": task })),
        )
            .into_response(),
        Ok(Admission::Rejected(limited)) => {
            let retry_after = limited.retry_after_secs();
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "ok": false,
                    "error": "rate_limited",
                    "limit": limited.limit,
                    "retry_after_secs": retry_after,
                })),
            )
                .into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
        Err(RelayError::InvalidRequest(msg)) => error_body(StatusCode::BAD_REQUEST, "invalid_request", msg),
        Err(RelayError::UnknownWorker(id)) => {
            error_body(StatusCode::BAD_REQUEST, "unknown_worker", format!("no worker named '{id}'"))
        }
        Err(e) => {
            tracing::error!("❌ Admission failed: {e}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
        }
    }
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "taskrelay",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "sink": state.health.snapshot(),
    }))
}

/// GET /api/v1/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "cycle": state.stats.snapshot(),
        "sink": state.health.snapshot(),
        "admission": state.admission.snapshot(),
        "workers": state.registry.workers(),
        "faults": state.faults.recent(RECENT_FAULTS),
    }))
}
