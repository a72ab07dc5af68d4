//! Contract a connected Telegram user session must satisfy.
//!
//! Bridges depend on this trait rather than on `grammers_client::Client`
//! directly so the retry/reconnect wrapper and the unit tests in
//! `tgmux-bridge` can run against an in-memory fake instead of a live MTProto
//! connection.

use async_trait::async_trait;

use crate::entity::{ChatRef, Entity};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: i32,
}

#[derive(Debug, Clone)]
pub struct CreatedChat {
    pub chat_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Default)]
pub struct SendTextOptions {
    pub reply_to: Option<i32>,
    pub disable_preview: bool,
    pub parse_mode: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub url: Option<String>,
    pub file_path: Option<String>,
    pub caption: Option<String>,
    pub parse_mode: Option<String>,
    pub disable_web_page_preview: bool,
    pub filename: Option<String>,
    pub force_document: bool,
    pub supports_streaming: bool,
}

/// Progressively smaller sets of administrator rights to attempt, in
/// order, when promoting a bot into a freshly created chat — the protocol
/// library version installed at runtime may not expose every right the
/// superset requests, so the caller retries with a smaller set on a
/// type-error rather than failing the whole promotion (spec.md §4.5.1
/// step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRightsTier {
    /// Every right the installed protocol-library version supports.
    Full,
    /// Common subset any protocol-library version is expected to support.
    Reduced,
    /// The bare minimum: can post and invite, nothing else.
    Minimal,
}

impl AdminRightsTier {
    pub const FALLBACK_ORDER: [AdminRightsTier; 3] =
        [AdminRightsTier::Full, AdminRightsTier::Reduced, AdminRightsTier::Minimal];
}

/// One authenticated Telegram user session. Implemented for real use by a
/// wrapper over `grammers_client::Client`; implemented for tests by an
/// in-memory fake.
#[async_trait]
pub trait TelegramSession: Send + Sync {
    /// Connect and authenticate. Returns the session's own user id.
    async fn connect(&self) -> Result<i64>;

    async fn disconnect(&self);

    /// True if the underlying transport still reports itself authorized,
    /// used by the reconnect wrapper after a forced disconnect.
    async fn is_authorized(&self) -> Result<bool>;

    /// List every dialog visible to this account, used for cache warmup.
    async fn iter_dialogs(&self) -> Result<Vec<Entity>>;

    /// Resolve a single entity by id or username without consulting any
    /// cache — a direct protocol round trip.
    async fn resolve(&self, reference: &ChatRef) -> Result<Entity>;

    async fn send_text(
        &self,
        target: &Entity,
        text: &str,
        options: SendTextOptions,
    ) -> Result<SentMessage>;

    async fn send_media(
        &self,
        target: &Entity,
        upload: MediaUpload,
    ) -> Result<SentMessage>;

    async fn create_group(&self, title: &str, invite: &[String]) -> Result<CreatedChat>;

    async fn invite_to_supergroup(&self, chat_id: i64, users: &[String]) -> Result<()>;

    async fn kick_participant(&self, chat_id: i64, user_id: i64) -> Result<()>;

    async fn list_participants(&self, chat_id: i64) -> Result<Vec<i64>>;

    async fn leave(&self, target: &Entity) -> Result<()>;

    /// Reveal full chat history to members who join after creation — the
    /// megagroup defaults to hiding pre-join history, so `create_chat`
    /// always toggles this off (spec.md §4.5.1 step 4).
    async fn set_history_hidden(&self, chat_id: i64, hidden: bool) -> Result<()>;

    /// Promote `user_id` to administrator with the given rights tier and
    /// `title` (always `"Admin Bot"` per spec.md §4.5.1 step 6). Returns an
    /// error the caller treats as a signal to retry with a smaller tier
    /// only when the library rejected the *shape* of the rights request,
    /// not when the promotion itself was refused.
    async fn promote_admin(&self, chat_id: i64, user_id: i64, title: &str, tier: AdminRightsTier) -> Result<()>;

    async fn export_invite_link(&self, chat_id: i64) -> Result<String>;

    /// Fetch message `message_id` from `channel` and extract its media
    /// payload, so forwarding a `t.me/<channel>/<id>` link never re-uploads
    /// the file (spec.md §4.5.3).
    async fn fetch_post_media(&self, channel: &str, message_id: i32) -> Result<MediaUpload>;

    /// Send a multi-file album in one request (spec.md §4.5.3).
    async fn send_media_group(&self, target: &Entity, uploads: Vec<MediaUpload>) -> Result<Vec<SentMessage>>;
}
