//! `POST /create_chat` (spec.md §4.5.1).

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tgmux_bridge::Bridge;
use tgmux_protocol::{AdminRightsTier, Service};
use tgmux_store::RequestDirection;

use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateChatRequest {
    pub title: String,
    pub usernames: Vec<String>,
    pub client_tg_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateChatResponse {
    pub status: &'static str,
    pub chat_id: i64,
    pub title: String,
    pub invite_link: String,
    pub debug: Value,
}

pub async fn create_chat(State(state): State<Arc<AppState>>, Json(body): Json<CreateChatRequest>) -> Result<Json<CreateChatResponse>> {
    if body.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }
    if body.usernames.is_empty() {
        return Err(ApiError::BadRequest("usernames must not be empty".into()));
    }

    let timeout = state.config.create_send_timeout();
    let task_state = Arc::clone(&state);
    let outcome = state.scheduler.submit_and_wait("create_chat", timeout, async move { run(task_state, body).await }).await?;
    Ok(Json(outcome?))
}

/// Selects a candidate via [`tgmux_router::Router::pick_for_create`], then
/// fans out across every other healthy bridge on failure (spec.md §4.5.1
/// step 11), persisting a `failed_requests` row only once every candidate
/// is exhausted. Run under [`tgmux_kernel::Scheduler::submit_and_wait`] by
/// the caller so a stuck protocol call can't hold an HTTP worker forever.
async fn run(state: Arc<AppState>, body: CreateChatRequest) -> Result<CreateChatResponse> {
    let service = Service::CreateChat;
    let bridge = state.router.pick_for_create(service).await?;
    let first_key = bridge.key();

    match attempt(&state, &bridge, &body).await {
        Ok(resp) => return Ok(resp),
        Err(err) => {
            state.router.handle_error(&bridge, &err.to_string(), "", "create_chat").await.ok();
            tracing::warn!(bridge = %first_key, error = %err, "create_chat failed, failing over");
        }
    }

    for candidate in state.router.pool().get_all_healthy_except(service, &first_key) {
        let candidate_key = candidate.key();
        match attempt(&state, &candidate, &body).await {
            Ok(resp) => return Ok(resp),
            Err(err) => {
                state.router.handle_error(&candidate, &err.to_string(), "", "create_chat").await.ok();
                tracing::warn!(bridge = %candidate_key, error = %err, "create_chat failed on failover candidate");
            }
        }
    }

    state
        .registry
        .save_failed_request(
            "create_chat",
            RequestDirection::Inbound,
            None,
            &serde_json::to_value(&body).unwrap_or(Value::Null),
            "create_chat exhausted every healthy account",
        )
        .await?;
    Err(ApiError::Internal("create_chat exhausted every healthy account".into()))
}

/// The full create-group procedure (spec.md §4.5.1 steps 2-11) run against
/// one candidate bridge. Retried wholesale on a different bridge by the
/// caller on failure.
async fn attempt(state: &AppState, bridge: &Arc<Bridge>, body: &CreateChatRequest) -> anyhow::Result<CreateChatResponse> {
    let mut resolved_refs = Vec::new();
    let mut resolved_entities = Vec::new();
    let mut resolve_failures = Vec::new();
    for reference in &body.usernames {
        match bridge.resolve_entity(reference).await {
            Ok(entity) => {
                resolved_refs.push(reference.clone());
                resolved_entities.push(entity);
            }
            Err(err) => resolve_failures.push(json!({ "reference": reference, "error": err.to_string() })),
        }
    }
    if resolved_refs.is_empty() {
        anyhow::bail!("none of the supplied usernames could be resolved");
    }

    let created = bridge.create_group(&body.title, &[]).await?;
    bridge.set_history_hidden(created.chat_id, false).await?;
    bridge.invite_to_supergroup(created.chat_id, &resolved_refs).await?;

    let mut promoted = Vec::new();
    let mut promote_failures = Vec::new();
    for entity in &resolved_entities {
        if let tgmux_protocol::Entity::User { id, bot: true, .. } = entity {
            let mut last_err = None;
            let mut ok = false;
            for tier in AdminRightsTier::FALLBACK_ORDER {
                match bridge.promote_admin(created.chat_id, *id, "Admin Bot", tier).await {
                    Ok(()) => {
                        ok = true;
                        break;
                    }
                    Err(err) => last_err = Some(err),
                }
            }
            if ok {
                promoted.push(*id);
            } else {
                promote_failures.push(json!({ "user_id": id, "error": last_err.map(|e| e.to_string()) }));
            }
        }
    }

    let mut missing_invitees = resolve_failures.clone();
    if let Some(observer) = state.config.amo_observer_username.as_deref() {
        if !bridge.account.is_main {
            if let Err(err) = bridge.invite_to_supergroup(created.chat_id, &[observer.to_string()]).await {
                tracing::warn!(observer, error = %err, "create_chat: observer invite failed, continuing");
                missing_invitees.push(json!({ "reference": observer, "error": err.to_string() }));
            }
        }
    }

    let invite_link = bridge.export_invite_link(created.chat_id).await?;

    state
        .registry
        .assign(&created.chat_id.to_string(), &bridge.account.name, Some(body.title.clone()), Some(invite_link.clone()))
        .await?;
    state.router.handle_success(bridge, &created.chat_id.to_string(), "create_chat").await.ok();

    if let Some(client_tg_id) = &body.client_tg_id {
        fire_callback(state, client_tg_id, &created.chat_id.to_string(), &invite_link).await;
    }

    Ok(CreateChatResponse {
        status: "ok",
        chat_id: created.chat_id,
        title: created.title,
        invite_link,
        debug: json!({
            "account": bridge.account.name,
            "promoted_admins": promoted,
            "resolve_failures": resolve_failures,
            "promote_failures": promote_failures,
            "missing_invitees": missing_invitees,
        }),
    })
}

/// Fire-and-forget downstream notification (spec.md §4.5.1 step 10, §6
/// "Downstream callback"). Persisted as a `failed_request(direction=outbound)`
/// on failure instead of retried inline — the admin dashboard replays it.
async fn fire_callback(state: &AppState, client_tg_id: &str, chat_id: &str, invite_link: &str) {
    let Some(url) = state.config.salebot_callback_url.clone() else { return };
    let body = json!({
        "message": "send_invite_link",
        "user_id": client_tg_id,
        "group_id": state.config.salebot_group_id,
        "tg_business": 1,
        "invite_link": invite_link,
    });
    let http = state.http.clone();
    let registry = state.registry.clone();
    let chat_id = chat_id.to_string();
    tokio::spawn(async move {
        let result = http.post(&url).json(&body).send().await;
        let failed = match result {
            Ok(resp) if resp.status().is_success() => None,
            Ok(resp) => Some(format!("callback responded with status {}", resp.status())),
            Err(err) => Some(err.to_string()),
        };
        if let Some(error) = failed {
            tracing::warn!(url, chat_id, error, "create_chat callback failed, persisting for retry");
            let _ = registry
                .save_failed_request("create_chat", RequestDirection::Outbound, Some(&url), &body, &error)
                .await;
        }
    });
}
