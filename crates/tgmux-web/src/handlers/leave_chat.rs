//! `POST /leave_chat` (spec.md §4.5.4).

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use tgmux_protocol::{Entity, Service};

use crate::error::Result;
use crate::handlers::chat_key;
use crate::state::AppState;

/// Spacing between participant kicks in a supergroup leave, to avoid
/// tripping Telegram's own rate limiter (spec.md §4.5.4).
const KICK_SPACING: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
pub struct LeaveChatRequest {
    pub chat: String,
}

#[derive(Debug, Serialize)]
pub struct LeaveChatResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub left_type: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kicked: Vec<i64>,
}

pub async fn leave_chat(State(state): State<Arc<AppState>>, Json(body): Json<LeaveChatRequest>) -> Result<Json<LeaveChatResponse>> {
    let timeout = state.config.leave_timeout();
    let task_state = Arc::clone(&state);
    let outcome = state.scheduler.submit_and_wait("leave_chat", timeout, async move { run(task_state, body).await }).await?;
    Ok(Json(outcome?))
}

async fn run(state: Arc<AppState>, body: LeaveChatRequest) -> Result<LeaveChatResponse> {
    let chat_id_str = chat_key(&body.chat);
    if state.registry.is_left(&chat_id_str).await? {
        return Ok(LeaveChatResponse { status: "skipped", reason: Some("chat already left"), left_type: "unresolvable", kicked: vec![] });
    }

    let selection = state.router.pick_for_chat(&chat_id_str, Service::LeaveChat).await?;
    let bridge = selection.bridge;

    let entity = match bridge.resolve_entity(&body.chat).await {
        Ok(entity) => entity,
        Err(err) => {
            tracing::warn!(chat = %body.chat, error = %err, "leave_chat: entity unresolvable, marking left anyway");
            state.registry.mark_left(&chat_id_str).await?;
            return Ok(LeaveChatResponse { status: "ok", reason: None, left_type: "unresolvable", kicked: vec![] });
        }
    };

    let (left_type, kicked) = match &entity {
        Entity::Supergroup { .. } => {
            let self_id = bridge.self_id();
            let participants = match bridge.list_participants(entity.canonical_id()).await {
                Ok(participants) => participants,
                Err(err) => {
                    state.router.handle_error(&bridge, &err.to_string(), &chat_id_str, "leave_chat").await.ok();
                    return Err(err.into());
                }
            };
            let mut kicked = Vec::new();
            for (i, user_id) in participants.iter().enumerate() {
                if Some(*user_id) == self_id {
                    continue;
                }
                if i > 0 {
                    tokio::time::sleep(KICK_SPACING).await;
                }
                match bridge.kick_participant(entity.canonical_id(), *user_id).await {
                    Ok(()) => kicked.push(*user_id),
                    Err(err) => {
                        state.router.handle_error(&bridge, &err.to_string(), &chat_id_str, "leave_chat").await.ok();
                        tracing::warn!(chat = %body.chat, user_id, error = %err, "leave_chat: kick failed, continuing");
                    }
                }
            }
            if let Err(err) = bridge.leave(&entity).await {
                state.router.handle_error(&bridge, &err.to_string(), &chat_id_str, "leave_chat").await.ok();
                return Err(err.into());
            }
            ("supergroup", kicked)
        }
        Entity::BasicGroup { .. } => {
            if let Err(err) = bridge.leave(&entity).await {
                state.router.handle_error(&bridge, &err.to_string(), &chat_id_str, "leave_chat").await.ok();
                return Err(err.into());
            }
            ("basic_group", vec![])
        }
        Entity::User { .. } => {
            if let Err(err) = bridge.leave(&entity).await {
                state.router.handle_error(&bridge, &err.to_string(), &chat_id_str, "leave_chat").await.ok();
                return Err(err.into());
            }
            ("private", vec![])
        }
    };

    state.router.handle_success(&bridge, &chat_id_str, "leave_chat").await.ok();
    state.registry.mark_left(&chat_id_str).await?;

    Ok(LeaveChatResponse { status: "ok", reason: None, left_type, kicked })
}
