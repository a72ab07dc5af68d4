//! `POST /send_media` (spec.md §4.5.3).

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use tgmux_bridge::{Bridge, BridgeError};
use tgmux_protocol::{Entity, MediaUpload, ProtocolError, Service};

use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct SendMediaRequest {
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub files: Vec<FileInput>,
    pub caption: Option<String>,
    pub parse_mode: Option<String>,
    #[serde(default)]
    pub disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FileInput {
    Simple(String),
    Detailed {
        #[serde(alias = "url", alias = "path")]
        file: String,
        filename: Option<String>,
        force_document: Option<bool>,
        supports_streaming: Option<bool>,
    },
}

impl FileInput {
    fn source(&self) -> &str {
        match self {
            FileInput::Simple(s) => s,
            FileInput::Detailed { file, .. } => file,
        }
    }

    fn filename(&self) -> Option<&str> {
        match self {
            FileInput::Simple(_) => None,
            FileInput::Detailed { filename, .. } => filename.as_deref(),
        }
    }

    fn force_document(&self) -> Option<bool> {
        match self {
            FileInput::Simple(_) => None,
            FileInput::Detailed { force_document, .. } => *force_document,
        }
    }

    fn supports_streaming(&self) -> Option<bool> {
        match self {
            FileInput::Simple(_) => None,
            FileInput::Detailed { supports_streaming, .. } => *supports_streaming,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SendMediaResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    pub message_ids: Vec<i32>,
}

impl SendMediaResponse {
    fn skipped_already_left() -> Self {
        Self { status: "skipped", reason: Some("chat already left"), chat_id: None, message_ids: vec![] }
    }
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm", "m4v"];

pub async fn send_media(State(state): State<Arc<AppState>>, Json(body): Json<SendMediaRequest>) -> Result<Json<SendMediaResponse>> {
    if body.files.is_empty() {
        return Err(ApiError::BadRequest("files must not be empty".into()));
    }
    if body.user_id.is_none() && body.username.is_none() {
        return Err(ApiError::BadRequest("either user_id or username is required".into()));
    }

    let timeout = state.config.create_send_timeout();
    let task_state = Arc::clone(&state);
    let outcome = state.scheduler.submit_and_wait("send_media", timeout, async move { run(task_state, body).await }).await?;
    Ok(Json(outcome?))
}

async fn run(state: Arc<AppState>, body: SendMediaRequest) -> Result<SendMediaResponse> {
    if let Some(user_id) = body.user_id
        && state.registry.is_left(&user_id.to_string()).await?
    {
        return Ok(SendMediaResponse::skipped_already_left());
    }

    let selection = state.router.pick_for_recipient(Service::SendMedia, body.user_id, body.username.as_deref()).await?;
    let bridge = selection.bridge;
    let first_key = bridge.key();

    match attempt(&bridge, &body).await {
        Ok(resp) => {
            let chat_id_str = resp.chat_id.map(|id| id.to_string()).unwrap_or_default();
            state.router.handle_success(&bridge, &chat_id_str, "send_media").await.ok();
            return Ok(resp);
        }
        Err(err) => {
            if !failover_eligible(&err) {
                return fail_without_failover(&state, &bridge, &body, err).await;
            }
            state.router.handle_error(&bridge, &err.to_string(), "", "send_media").await.ok();
            tracing::warn!(bridge = %first_key, error = %err, "send_media failed, failing over");
        }
    }

    for candidate in state.router.pool().get_all_healthy_except(Service::SendMedia, &first_key) {
        match attempt(&candidate, &body).await {
            Ok(resp) => {
                let chat_id_str = resp.chat_id.map(|id| id.to_string()).unwrap_or_default();
                state.router.handle_success(&candidate, &chat_id_str, "send_media").await.ok();
                return Ok(resp);
            }
            Err(err) => {
                if !failover_eligible(&err) {
                    return fail_without_failover(&state, &candidate, &body, err).await;
                }
                state.router.handle_error(&candidate, &err.to_string(), "", "send_media").await.ok();
                tracing::warn!(bridge = %candidate.key(), error = %err, "send_media failed on failover candidate");
            }
        }
    }

    state
        .registry
        .save_failed_request(
            "send_media",
            tgmux_store::RequestDirection::Inbound,
            None,
            &serde_json::to_value(&body).unwrap_or(serde_json::Value::Null),
            "send_media exhausted every healthy account",
        )
        .await?;
    Err(ApiError::Internal("send_media exhausted every healthy account".into()))
}

/// `FileReferenceExpired`/`UsernameNotOccupied`/`PeerIdInvalid` are
/// domain-level: failing over just fails identically on the next bridge
/// (spec.md §4.5.3 error handling).
fn failover_eligible(err: &ProtocolError) -> bool {
    !matches!(
        err,
        ProtocolError::FileReferenceExpired(_) | ProtocolError::UsernameNotOccupied(_) | ProtocolError::PeerIdInvalid(_)
    )
}

async fn fail_without_failover(state: &AppState, bridge: &Arc<Bridge>, body: &SendMediaRequest, err: ProtocolError) -> Result<SendMediaResponse> {
    state.router.handle_error(bridge, &err.to_string(), "", "send_media").await.ok();
    state
        .registry
        .save_failed_request(
            "send_media",
            tgmux_store::RequestDirection::Inbound,
            None,
            &serde_json::to_value(body).unwrap_or(serde_json::Value::Null),
            &err.to_string(),
        )
        .await?;
    Err(ApiError::from(err))
}

fn to_protocol_err(err: BridgeError) -> ProtocolError {
    match err {
        BridgeError::Protocol(p) => p,
        other => ProtocolError::Other(other.to_string()),
    }
}

async fn attempt(bridge: &Arc<Bridge>, body: &SendMediaRequest) -> std::result::Result<SendMediaResponse, ProtocolError> {
    let reference = body.user_id.map(|id| id.to_string()).or_else(|| body.username.clone()).ok_or_else(|| {
        ProtocolError::Other("send_media requires user_id or username".into())
    })?;
    let entity = bridge.resolve_entity(&reference).await.map_err(to_protocol_err)?;

    let uploads = normalize_files(bridge, body).await?;

    let message_ids = if uploads.len() == 1 {
        let sent = bridge.send_media(&entity, uploads.into_iter().next().unwrap()).await.map_err(to_protocol_err)?;
        vec![sent.message_id]
    } else {
        bridge.send_media_group(&entity, uploads).await.map_err(to_protocol_err)?.into_iter().map(|m| m.message_id).collect()
    };

    Ok(SendMediaResponse { status: "ok", reason: None, chat_id: Some(entity.canonical_id()), message_ids })
}

async fn normalize_files(bridge: &Arc<Bridge>, body: &SendMediaRequest) -> std::result::Result<Vec<MediaUpload>, ProtocolError> {
    let single = body.files.len() == 1;
    let mut uploads = Vec::with_capacity(body.files.len());

    for file in &body.files {
        let mut upload = if let Some((channel, message_id)) = parse_post_link(file.source()) {
            bridge.fetch_post_media(&channel, message_id).await.map_err(to_protocol_err)?
        } else if is_http_url(file.source()) {
            MediaUpload {
                url: Some(file.source().to_string()),
                file_path: None,
                caption: None,
                parse_mode: None,
                disable_web_page_preview: false,
                filename: file.filename().map(str::to_string),
                force_document: false,
                supports_streaming: false,
            }
        } else {
            MediaUpload {
                url: None,
                file_path: Some(file.source().to_string()),
                caption: None,
                parse_mode: None,
                disable_web_page_preview: false,
                filename: file.filename().map(str::to_string),
                force_document: false,
                supports_streaming: false,
            }
        };

        upload.caption = body.caption.clone();
        upload.parse_mode = body.parse_mode.clone();
        upload.disable_web_page_preview = body.disable_web_page_preview;
        upload.force_document = file.force_document().unwrap_or(false);
        upload.supports_streaming = match file.supports_streaming() {
            Some(explicit) => explicit,
            None if single && !upload.force_document => {
                let name = upload.filename.as_deref().or(upload.url.as_deref()).or(upload.file_path.as_deref()).unwrap_or("");
                looks_like_video(name)
            }
            None => false,
        };

        uploads.push(upload);
    }

    Ok(uploads)
}

/// A file source counts as a downloadable URL only if it parses as one
/// with an http(s) scheme — a bare `"http://"` prefix check would also
/// accept malformed strings like `"http://\0"` that `reqwest` rejects
/// later with a less useful error.
fn is_http_url(source: &str) -> bool {
    url::Url::parse(source).is_ok_and(|u| u.scheme() == "http" || u.scheme() == "https")
}

fn looks_like_video(name: &str) -> bool {
    let lower = name.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(&format!(".{ext}"))) || lower.starts_with("video/")
}

/// Parse `t.me/<channel>/<id>`, `telegram.me/<channel>/<id>`, with or
/// without a scheme, into `(channel, message_id)` (spec.md §4.5.3).
fn parse_post_link(raw: &str) -> Option<(String, i32)> {
    let without_scheme = raw.trim_start_matches("https://").trim_start_matches("http://");
    let rest = without_scheme.strip_prefix("t.me/").or_else(|| without_scheme.strip_prefix("telegram.me/"))?;
    let mut parts = rest.trim_end_matches('/').splitn(2, '/');
    let channel = parts.next()?;
    let id_part = parts.next()?;
    if channel.is_empty() || channel.starts_with('+') || channel == "joinchat" {
        return None;
    }
    let message_id: i32 = id_part.split(['?', '/']).next()?.parse().ok()?;
    Some((channel.to_string(), message_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_post_link_extracts_channel_and_id() {
        assert_eq!(parse_post_link("t.me/somechannel/123"), Some(("somechannel".to_string(), 123)));
        assert_eq!(parse_post_link("https://t.me/somechannel/123"), Some(("somechannel".to_string(), 123)));
        assert_eq!(parse_post_link("telegram.me/somechannel/456"), Some(("somechannel".to_string(), 456)));
    }

    #[test]
    fn parse_post_link_rejects_invite_links() {
        assert_eq!(parse_post_link("https://t.me/+AbCdEf12345"), None);
        assert_eq!(parse_post_link("https://t.me/joinchat/AbCdEf"), None);
    }

    #[test]
    fn parse_post_link_rejects_plain_urls() {
        assert_eq!(parse_post_link("https://example.com/video.mp4"), None);
    }

    #[test]
    fn is_http_url_accepts_only_http_and_https() {
        assert!(is_http_url("https://example.com/video.mp4"));
        assert!(is_http_url("http://example.com/photo.jpg"));
        assert!(!is_http_url("/local/path/file.jpg"));
        assert!(!is_http_url("ftp://example.com/file.jpg"));
    }

    #[test]
    fn looks_like_video_matches_common_extensions() {
        assert!(looks_like_video("clip.mp4"));
        assert!(looks_like_video("CLIP.MOV"));
        assert!(!looks_like_video("photo.jpg"));
    }
}
