//! Admin dashboard backend (port 5099, spec.md §6): read-only views over the
//! registry's audit tables plus the handful of control actions an operator
//! needs (retry/delete a failed request, reset a banned bridge). The
//! dashboard UI itself is out of scope (spec.md Non-goals) — this is the
//! JSON surface behind it, basic-auth gated the way `monitor_app.py`'s
//! `check_auth` compares `MONITOR_USER`/`MONITOR_PASS` as plain strings.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, Result};
use crate::state::AppState;

pub fn router() -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .route("/", get(overview))
        .route("/assignments", get(assignments))
        .route("/operations", get(operations))
        .route("/failover_log", get(failover_log))
        .route("/failed_requests", get(failed_requests))
        .route("/failed_requests/:id/retry", post(retry_failed_request))
        .route("/failed_requests/:id", axum::routing::delete(delete_failed_request))
        .route("/bridges/:key/reset", post(reset_bridge))
}

/// Basic-auth gate, checked per-handler rather than as a layer so it can
/// compare straight against `AppState`'s `monitor_user`/`monitor_pass`
/// (spec.md §6), the way `monitor_app.py`'s `check_auth` does.
fn check_credentials(state: &AppState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let unauthorized = || {
        let mut response = (StatusCode::UNAUTHORIZED, Json(json!({ "status": "error", "error": "authentication required" }))).into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, "Basic realm=\"tgmux admin\"".parse().unwrap());
        response
    };

    let Some(header_value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Err(unauthorized());
    };
    let Some(encoded) = header_value.strip_prefix("Basic ") else {
        return Err(unauthorized());
    };
    let Ok(decoded) = BASE64.decode(encoded) else {
        return Err(unauthorized());
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return Err(unauthorized());
    };
    let Some((user, pass)) = decoded.split_once(':') else {
        return Err(unauthorized());
    };

    if user == state.config.monitor_user && pass == state.config.monitor_pass {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

async fn overview(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = check_credentials(&state, &headers) {
        return resp;
    }
    let stats = match state.registry.get_stats().await {
        Ok(stats) => stats,
        Err(err) => return ApiError::from(err).into_response(),
    };
    let pools: Vec<_> = tgmux_protocol::Service::ALL
        .iter()
        .map(|service| {
            let bridges = state.router.pool().by_service(*service);
            json!({
                "service": service.to_string(),
                "total": bridges.len(),
                "healthy": bridges.iter().filter(|b| b.is_healthy()).count(),
                "accounts": bridges.iter().map(|b| json!({
                    "account": b.account.name,
                    "status": b.status().to_string(),
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    Json(json!({ "registry": stats, "pools": pools })).into_response()
}

async fn assignments(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<LimitQuery>) -> Response {
    if let Err(resp) = check_credentials(&state, &headers) {
        return resp;
    }
    match state.registry.get_all_assignments(q.limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn operations(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<LimitQuery>) -> Response {
    if let Err(resp) = check_credentials(&state, &headers) {
        return resp;
    }
    match state.registry.get_recent_operations(q.limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn failover_log(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<LimitQuery>) -> Response {
    if let Err(resp) = check_credentials(&state, &headers) {
        return resp;
    }
    match state.registry.get_failover_log(q.limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn failed_requests(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<LimitQuery>) -> Response {
    if let Err(resp) = check_credentials(&state, &headers) {
        return resp;
    }
    match state.registry.get_failed_requests(q.limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// Replays the stored payload to the same internal port (inbound) or URL
/// (outbound) the original request would have gone to (spec.md §7).
async fn retry_failed_request(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(resp) = check_credentials(&state, &headers) {
        return resp;
    }
    match retry_one(&state, id).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn retry_one(state: &AppState, id: i64) -> Result<serde_json::Value> {
    let Some(row) = state.registry.get_failed_request_by_id(id).await? else {
        return Err(ApiError::BadRequest(format!("no failed_request with id {id}")));
    };

    let result = match row.direction {
        tgmux_store::RequestDirection::Outbound => {
            let Some(url) = &row.endpoint else {
                return Err(ApiError::BadRequest("outbound failed_request has no endpoint".into()));
            };
            state.http.post(url).json(&row.payload).send().await.map(|r| r.status().is_success()).map_err(|e| e.to_string())
        }
        tgmux_store::RequestDirection::Inbound => {
            let port = match row.service.as_str() {
                "create_chat" => 5021,
                "send_text" => 5022,
                "send_media" => 5023,
                "leave_chat" => 5024,
                other => return Err(ApiError::BadRequest(format!("unknown service for retry: {other}"))),
            };
            let url = format!("http://127.0.0.1:{port}/{}", row.service);
            state.http.post(&url).json(&row.payload).send().await.map(|r| r.status().is_success()).map_err(|e| e.to_string())
        }
    };

    match result {
        Ok(true) => {
            state.registry.delete_failed_request(id).await?;
            Ok(json!({ "status": "ok", "retried": true, "deleted": true }))
        }
        Ok(false) => {
            state.registry.update_failed_request(id, "failed", Some("retry responded with a non-success status".into())).await?;
            Ok(json!({ "status": "ok", "retried": true, "deleted": false }))
        }
        Err(error) => {
            state.registry.update_failed_request(id, "failed", Some(error.clone())).await?;
            Ok(json!({ "status": "ok", "retried": false, "error": error }))
        }
    }
}

async fn delete_failed_request(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(resp) = check_credentials(&state, &headers) {
        return resp;
    }
    match state.registry.delete_failed_request(id).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// Clears `banned`/`error` back to `offline` for one bridge, the only way
/// out of those terminal states (spec.md §3, §8 invariant 4).
async fn reset_bridge(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(key): Path<String>) -> Response {
    if let Err(resp) = check_credentials(&state, &headers) {
        return resp;
    }
    match state.router.pool().reset_bridge_by_admin(&key) {
        Ok(()) => Json(json!({ "status": "ok", "bridge": key })).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
