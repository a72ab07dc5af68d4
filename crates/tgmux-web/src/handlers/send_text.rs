//! `POST /send_text` (spec.md §4.5.2).

use std::collections::HashSet;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use tgmux_bridge::{Bridge, BridgeError};
use tgmux_protocol::{Entity, ProtocolError, SendTextOptions, Service};

use crate::error::{ApiError, Result};
use crate::handlers::chat_key;
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct SendTextRequest {
    pub chat: String,
    pub text: String,
    #[serde(default)]
    pub tag_client: bool,
    pub client_id: Option<i64>,
    pub client_username: Option<String>,
    #[serde(default)]
    pub exclude_usernames: Vec<String>,
    pub disable_preview: Option<bool>,
    pub reply_to: Option<i32>,
    pub parse_mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendTextResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_tagged_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_tagged_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<&'static str>,
}

impl SendTextResponse {
    fn skipped_already_left() -> Self {
        Self {
            status: "skipped",
            reason: Some("chat already left"),
            chat_id: None,
            message_id: None,
            client_tagged_id: None,
            client_tagged_name: None,
            chat_type: None,
        }
    }
}

pub async fn send_text(State(state): State<Arc<AppState>>, Json(body): Json<SendTextRequest>) -> Result<Json<SendTextResponse>> {
    let timeout = state.config.create_send_timeout();
    let task_state = Arc::clone(&state);
    let outcome = state.scheduler.submit_and_wait("send_text", timeout, async move { run(task_state, body).await }).await?;
    Ok(Json(outcome?))
}

/// Affinity selection via [`tgmux_router::Router::pick_for_chat`], then a
/// fan-out retry across every other healthy bridge for the service on
/// flood-wait/unresolvable-entity (spec.md §4.5.2, DESIGN.md open question
/// #3) — the same pattern `create_chat` uses, not a single-candidate swap.
async fn run(state: Arc<AppState>, body: SendTextRequest) -> Result<SendTextResponse> {
    let chat_id_str = chat_key(&body.chat);
    if state.registry.is_left(&chat_id_str).await? {
        return Ok(SendTextResponse::skipped_already_left());
    }

    let selection = state.router.pick_for_chat(&chat_id_str, Service::SendText).await?;
    let bridge = selection.bridge;
    let first_key = bridge.key();

    match attempt(&state, &bridge, &body).await {
        Ok(resp) => {
            state.router.handle_success(&bridge, &chat_id_str, "send_text").await.ok();
            return Ok(resp);
        }
        Err(err) => {
            if !failover_eligible(&err) {
                return fail_without_failover(&state, &bridge, &chat_id_str, &body, err).await;
            }
            state.router.handle_error(&bridge, &err.to_string(), &chat_id_str, "send_text").await.ok();
            tracing::warn!(bridge = %first_key, error = %err, "send_text failed, failing over");
        }
    }

    for candidate in state.router.pool().get_all_healthy_except(Service::SendText, &first_key) {
        match attempt(&state, &candidate, &body).await {
            Ok(resp) => {
                state.router.handle_success(&candidate, &chat_id_str, "send_text").await.ok();
                return Ok(resp);
            }
            Err(err) => {
                if !failover_eligible(&err) {
                    return fail_without_failover(&state, &candidate, &chat_id_str, &body, err).await;
                }
                state.router.handle_error(&candidate, &err.to_string(), &chat_id_str, "send_text").await.ok();
                tracing::warn!(bridge = %candidate.key(), error = %err, "send_text failed on failover candidate");
            }
        }
    }

    state
        .registry
        .save_failed_request(
            "send_text",
            tgmux_store::RequestDirection::Inbound,
            None,
            &serde_json::to_value(&body).unwrap_or(serde_json::Value::Null),
            "send_text exhausted every healthy account",
        )
        .await?;
    Err(ApiError::Internal("send_text exhausted every healthy account".into()))
}

/// Failover on flood-wait or an unresolvable entity (spec.md §4.5.2);
/// anything else is domain-level and would fail identically on the next
/// bridge, same rule `send_media` applies via its own `failover_eligible`.
fn failover_eligible(err: &ProtocolError) -> bool {
    matches!(err, ProtocolError::FloodWait { .. } | ProtocolError::EntityNotFound { .. })
}

async fn fail_without_failover(
    state: &AppState,
    bridge: &Arc<Bridge>,
    chat_id_str: &str,
    body: &SendTextRequest,
    err: ProtocolError,
) -> Result<SendTextResponse> {
    state.router.handle_error(bridge, &err.to_string(), chat_id_str, "send_text").await.ok();
    state
        .registry
        .save_failed_request(
            "send_text",
            tgmux_store::RequestDirection::Inbound,
            None,
            &serde_json::to_value(body).unwrap_or(serde_json::Value::Null),
            &err.to_string(),
        )
        .await?;
    Err(ApiError::from(err))
}

struct ClientUser {
    id: i64,
    name: String,
}

fn to_protocol_err(err: BridgeError) -> ProtocolError {
    match err {
        BridgeError::Protocol(p) => p,
        other => ProtocolError::Other(other.to_string()),
    }
}

async fn attempt(state: &AppState, bridge: &Arc<Bridge>, body: &SendTextRequest) -> std::result::Result<SendTextResponse, ProtocolError> {
    let entity = bridge.resolve_entity(&body.chat).await.map_err(to_protocol_err)?;
    let is_user = matches!(entity, Entity::User { .. });
    let parse_mode = body.parse_mode.clone().unwrap_or_else(|| "html".to_string());
    let options = SendTextOptions {
        reply_to: body.reply_to,
        disable_preview: body.disable_preview.unwrap_or(true),
        parse_mode: Some(parse_mode),
    };

    if is_user && !body.tag_client {
        let sent = bridge.send_text(&entity, &body.text, options).await.map_err(to_protocol_err)?;
        return Ok(SendTextResponse {
            status: "ok",
            reason: None,
            chat_id: Some(entity.canonical_id()),
            message_id: Some(sent.message_id),
            client_tagged_id: None,
            client_tagged_name: None,
            chat_type: Some("private"),
        });
    }

    let participants = if is_user {
        Vec::new()
    } else {
        bridge.list_participants(entity.canonical_id()).await.map_err(to_protocol_err)?
    };

    let mut exclude_ids = HashSet::new();
    for username in &body.exclude_usernames {
        if let Ok(resolved) = bridge.resolve_entity(username).await {
            exclude_ids.insert(resolved.raw_id());
        }
    }

    let client_user = resolve_client_user(bridge, &entity, is_user, body, &participants, &exclude_ids).await;
    let message = build_message(&body.text, client_user.as_ref());

    let sent = bridge.send_text(&entity, &message, options).await.map_err(to_protocol_err)?;

    Ok(SendTextResponse {
        status: "ok",
        reason: None,
        chat_id: Some(entity.canonical_id()),
        message_id: Some(sent.message_id),
        client_tagged_id: client_user.as_ref().map(|c| c.id),
        client_tagged_name: client_user.map(|c| c.name),
        chat_type: Some(if is_user { "private" } else { "group" }),
    })
}

/// Resolve which participant to tag, spec.md §4.5.2's `client_user` order:
/// private chat with `tag_client` → the peer itself; else `client_id`, then
/// `client_username`, then any non-bot, non-excluded, non-self participant.
async fn resolve_client_user(
    bridge: &Arc<Bridge>,
    entity: &Entity,
    is_user: bool,
    body: &SendTextRequest,
    participants: &[i64],
    exclude_ids: &HashSet<i64>,
) -> Option<ClientUser> {
    if is_user && body.tag_client {
        if let Entity::User { id, bot: false, username, first_name } = entity {
            if Some(*id) != bridge.self_id() {
                return Some(ClientUser { id: *id, name: display_name(*id, first_name.as_deref(), username.as_deref()) });
            }
        }
        return None;
    }

    if let Some(client_id) = body.client_id {
        if !exclude_ids.contains(&client_id)
            && let Ok(Entity::User { id, bot: false, first_name, username }) = bridge.resolve_entity(&client_id.to_string()).await
        {
            return Some(ClientUser { id, name: display_name(id, first_name.as_deref(), username.as_deref()) });
        }
    }

    if let Some(username) = &body.client_username
        && let Ok(Entity::User { id, bot: false, first_name, username: resolved_username }) = bridge.resolve_entity(username).await
        && !exclude_ids.contains(&id)
    {
        return Some(ClientUser { id, name: display_name(id, first_name.as_deref(), resolved_username.as_deref()) });
    }

    for participant_id in participants {
        if Some(*participant_id) == bridge.self_id() || exclude_ids.contains(participant_id) {
            continue;
        }
        if let Ok(Entity::User { id, bot: false, first_name, username }) = bridge.resolve_entity(&participant_id.to_string()).await {
            return Some(ClientUser { id, name: display_name(id, first_name.as_deref(), username.as_deref()) });
        }
    }
    None
}

fn display_name(id: i64, first_name: Option<&str>, username: Option<&str>) -> String {
    first_name.or(username).map(str::to_string).unwrap_or_else(|| id.to_string())
}

/// Substitute `{client}`/`{{client}}` with an HTML mention, or prepend one
/// when the placeholder is absent (spec.md §4.5.2).
fn build_message(text: &str, client: Option<&ClientUser>) -> String {
    let Some(client) = client else { return text.to_string() };
    let mention = format!("<a href=\"tg://user?id={}\">{}</a>", client.id, html_escape(&client.name));
    if text.contains("{{client}}") {
        text.replace("{{client}}", &mention)
    } else if text.contains("{client}") {
        text.replace("{client}", &mention)
    } else {
        format!("{mention} {text}")
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
