//! Service handlers: thin HTTP front-ends over [`tgmux_router::Router`] +
//! [`tgmux_bridge::Bridge`], one module per spec.md §4.5 operation.

pub mod create_chat;
pub mod leave_chat;
pub mod send_media;
pub mod send_text;

use std::sync::Arc;

use axum::Json;
use serde_json::{Value, json};
use tgmux_protocol::Service;

use crate::state::AppState;

/// Registry row key a chat reference resolves to. The registry indexes by
/// the caller's literal `chat_id` string (spec.md §4.1); for a `@username`
/// reference there is no registry affinity to look up, so handlers key on
/// the numeric form whenever one exists and fall back to the raw string.
pub fn chat_key(raw: &str) -> String {
    match tgmux_protocol::normalize_chat_ref(raw) {
        tgmux_protocol::ChatRef::Id(id) => id.to_string(),
        tgmux_protocol::ChatRef::Username(name) => name,
    }
}

/// `GET /health` — per spec.md §6, `{"status":"ok"}` once at least one
/// bridge for this service is healthy, `{"status":"not_ready"}` otherwise.
pub async fn health(state: Arc<AppState>, service: Service) -> Json<Value> {
    let ready = !state.router.pool().get_healthy_list(service).is_empty();
    Json(json!({ "status": if ready { "ok" } else { "not_ready" } }))
}

/// `GET /stats` — cache size, account statuses, counters for this service's
/// bridges (spec.md §6).
pub async fn stats(state: Arc<AppState>, service: Service) -> Json<Value> {
    let bridges = state.router.pool().by_service(service);
    let accounts: Vec<Value> = bridges
        .iter()
        .map(|b| {
            let cache = b.cache_stats();
            json!({
                "account": b.account.name,
                "status": b.status().to_string(),
                "is_healthy": b.is_healthy(),
                "operations_count": b.operations_count(),
                "error_count": b.health().error_count(),
                "last_error": b.health().last_error(),
                "cache_size": cache.size,
                "cache_hit_rate": cache.hit_rate(),
            })
        })
        .collect();
    Json(json!({ "service": service.to_string(), "accounts": accounts }))
}

/// `POST /reload_cache` — trigger a full dialog warmup for every bridge of
/// this service (spec.md §6).
pub async fn reload_cache(state: Arc<AppState>, service: Service) -> Json<Value> {
    let bridges = state.router.pool().by_service(service);
    let warmups = bridges.iter().map(|b| {
        let b = Arc::clone(b);
        async move { b.full_warmup().await }
    });
    let results = futures::future::join_all(warmups).await;
    let ok = results.iter().filter(|r| r.is_ok()).count();
    Json(json!({ "status": "ok", "warmed": ok, "total": results.len() }))
}
