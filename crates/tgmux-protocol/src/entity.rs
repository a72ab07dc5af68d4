//! Chat/user entity model and peer-id normalization.
//!
//! Telegram exposes three peer shapes (user, basic group, channel/supergroup)
//! under three separate id spaces. The gateway works in one flattened
//! "canonical" id space so a chat can be addressed the same way regardless
//! of which shape it turned out to be, mirroring the normalization
//! `core/bridge.py::_add_to_cache` performed ad hoc on dicts.

use serde::{Deserialize, Serialize};

/// The constant Telegram uses to fold supergroup/channel ids into the
/// negative range reserved for them (`-100<raw_id>` in bot-API notation).
pub const SUPERGROUP_ID_OFFSET: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    User {
        id: i64,
        username: Option<String>,
        first_name: Option<String>,
        bot: bool,
    },
    BasicGroup {
        id: i64,
        title: String,
    },
    Supergroup {
        id: i64,
        title: String,
        megagroup: bool,
        broadcast: bool,
    },
}

impl Entity {
    /// The raw id Telegram assigned this entity, before canonicalization.
    pub fn raw_id(&self) -> i64 {
        match self {
            Entity::User { id, .. } => *id,
            Entity::BasicGroup { id, .. } => *id,
            Entity::Supergroup { id, .. } => *id,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Entity::User { username, .. } => username.as_deref(),
            _ => None,
        }
    }

    /// Canonical id used as the dialog-cache key: supergroups/channels fold
    /// into `-1_000_000_000_000 - id`, basic groups into `-id`, users keep
    /// their raw positive id.
    pub fn canonical_id(&self) -> i64 {
        match self {
            Entity::Supergroup { id, .. } => SUPERGROUP_ID_OFFSET.saturating_neg() - id,
            Entity::BasicGroup { id, .. } => -id,
            Entity::User { id, .. } => *id,
        }
    }
}

/// Normalize a user-supplied chat reference the way every service handler
/// does before it touches the registry or the protocol client.
///
/// Rules (spec EXTERNAL INTERFACES):
///   - `@username` strings pass through unchanged.
///   - an all-digit negative string parses straight to `i64`.
///   - an all-digit positive string or a bare positive integer gets the
///     `-100` supergroup prefix applied.
///   - a negative integer passes through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRef {
    Username(String),
    Id(i64),
}

pub fn normalize_chat_ref(raw: &str) -> ChatRef {
    if let Some(stripped) = raw.strip_prefix('@') {
        return ChatRef::Username(format!("@{stripped}"));
    }
    if !raw.chars().all(|c| c.is_ascii_digit() || c == '-') {
        return ChatRef::Username(raw.to_string());
    }
    match raw.parse::<i64>() {
        Ok(n) if n < 0 => ChatRef::Id(n),
        Ok(n) => ChatRef::Id(supergroup_prefixed(n)),
        Err(_) => ChatRef::Username(raw.to_string()),
    }
}

pub fn normalize_chat_id(raw: i64) -> i64 {
    if raw < 0 { raw } else { supergroup_prefixed(raw) }
}

fn supergroup_prefixed(positive_id: i64) -> i64 {
    format!("-100{positive_id}").parse().expect("digits only")
}
