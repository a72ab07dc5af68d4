//! [`TelegramSession`] implementation backed by a real MTProto connection.
//!
//! One [`GrammersSession`] owns one `grammers_client::Client`, loaded from
//! and persisted to the `.session` file named by its [`AccountConfig`].
//! Sessions are expected to already be authorized — this gateway is a
//! long-running server, not an interactive login flow, so `connect`
//! returns [`ProtocolError::NotAuthorized`] rather than prompting for a
//! phone code when the session file is missing or stale. Use a one-off
//! login helper (outside this crate) to produce the `.session` file first.

use std::path::PathBuf;

use async_trait::async_trait;
use grammers_client::types::{Chat, Media};
use grammers_client::{Client, Config, InitParams, InputMessage};
use grammers_session::Session;
use tgmux_protocol::{
    AdminRightsTier, ChatRef, CreatedChat, Entity, MediaUpload, ProtocolError, Result, SendTextOptions, SentMessage,
    TelegramSession,
};
use tokio::sync::RwLock;

pub struct GrammersSession {
    session_path: PathBuf,
    api_id: i32,
    api_hash: String,
    client: RwLock<Option<Client>>,
}

impl GrammersSession {
    pub fn new(session_path: impl Into<PathBuf>, api_id: i32, api_hash: impl Into<String>) -> Self {
        Self { session_path: session_path.into(), api_id, api_hash: api_hash.into(), client: RwLock::new(None) }
    }
}

fn map_grammers_err(err: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::classify(&err.to_string())
}

/// Build the outgoing message body for the requested parse-mode, defaulting
/// to HTML (spec.md §4.5.2) — this is what makes the `<a href="tg://user?id=…">`
/// mentions `build_message` produces render as links instead of literal tags.
fn parsed_message(text: String, parse_mode: Option<&str>) -> InputMessage {
    match parse_mode.unwrap_or("html") {
        "markdown" | "markdownv2" | "md" => InputMessage::markdown(text),
        "none" | "plain" | "text" => InputMessage::text(text),
        _ => InputMessage::html(text),
    }
}

fn chat_to_entity(chat: &Chat) -> Entity {
    match chat {
        Chat::User(user) => Entity::User {
            id: user.id(),
            username: user.username().map(str::to_string),
            first_name: user.first_name().unwrap_or_default().to_string(),
            bot: user.is_bot(),
        },
        Chat::Group(group) => Entity::BasicGroup { id: group.id(), title: group.title().to_string() },
        Chat::Channel(channel) => Entity::Supergroup {
            id: channel.id(),
            title: channel.title().to_string(),
            megagroup: channel.is_megagroup(),
            broadcast: channel.is_broadcast(),
        },
    }
}

#[async_trait]
impl TelegramSession for GrammersSession {
    async fn connect(&self) -> Result<i64> {
        let session = Session::load_file_or_create(&self.session_path).map_err(|e| ProtocolError::Other(e.to_string()))?;

        let client = Client::connect(Config {
            session,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            params: InitParams { catch_up: true, ..Default::default() },
        })
        .await
        .map_err(map_grammers_err)?;

        if !client.is_authorized().await.map_err(map_grammers_err)? {
            return Err(ProtocolError::NotAuthorized);
        }

        let me = client.get_me().await.map_err(map_grammers_err)?;
        let self_id = me.id();

        client.session().save_to_file(&self.session_path).map_err(|e| ProtocolError::Other(e.to_string()))?;
        *self.client.write().await = Some(client);
        Ok(self_id)
    }

    async fn disconnect(&self) {
        *self.client.write().await = None;
    }

    async fn is_authorized(&self) -> Result<bool> {
        let guard = self.client.read().await;
        match guard.as_ref() {
            Some(client) => client.is_authorized().await.map_err(map_grammers_err),
            None => Ok(false),
        }
    }

    async fn iter_dialogs(&self) -> Result<Vec<Entity>> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;

        let mut dialogs = client.iter_dialogs();
        let mut entities = Vec::new();
        while let Some(dialog) = dialogs.next().await.map_err(map_grammers_err)? {
            entities.push(chat_to_entity(&dialog.chat));
        }
        Ok(entities)
    }

    async fn resolve(&self, reference: &ChatRef) -> Result<Entity> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;

        let chat = match reference {
            ChatRef::Username(username) => client
                .resolve_username(username)
                .await
                .map_err(map_grammers_err)?
                .ok_or_else(|| ProtocolError::UsernameNotOccupied(username.clone()))?,
            ChatRef::Id(id) => {
                let mut dialogs = client.iter_dialogs();
                let mut found = None;
                while let Some(dialog) = dialogs.next().await.map_err(map_grammers_err)? {
                    if chat_to_entity(&dialog.chat).canonical_id() == *id {
                        found = Some(dialog.chat);
                        break;
                    }
                }
                found.ok_or_else(|| ProtocolError::EntityNotFound { reference: id.to_string(), cache_size: 0 })?
            }
        };
        Ok(chat_to_entity(&chat))
    }

    async fn send_text(&self, target: &Entity, text: &str, options: SendTextOptions) -> Result<SentMessage> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;
        let chat = entity_to_packed_chat(&client, target).await?;

        let mut message = parsed_message(text.to_string(), options.parse_mode.as_deref()).link_preview(!options.disable_preview);
        if let Some(reply_to) = options.reply_to {
            message = message.reply_to(Some(reply_to));
        }
        let sent = client.send_message(&chat, message).await.map_err(map_grammers_err)?;
        Ok(SentMessage { message_id: sent.id() })
    }

    async fn send_media(&self, target: &Entity, upload: MediaUpload) -> Result<SentMessage> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;
        let chat = entity_to_packed_chat(&client, target).await?;

        let parse_mode = upload.parse_mode.clone();
        let disable_web_page_preview = upload.disable_web_page_preview;
        let force_document = upload.force_document;
        let caption = upload.caption.clone().unwrap_or_default();
        let uploaded = upload_media(&client, &upload).await?;

        let mut message = parsed_message(caption, parse_mode.as_deref()).link_preview(!disable_web_page_preview);
        message = message.document(uploaded);
        if force_document {
            message = message.force_document(true);
        }
        let sent = client.send_message(&chat, message).await.map_err(map_grammers_err)?;
        Ok(SentMessage { message_id: sent.id() })
    }

    async fn send_media_group(&self, target: &Entity, uploads: Vec<MediaUpload>) -> Result<Vec<SentMessage>> {
        let mut sent = Vec::with_capacity(uploads.len());
        for upload in uploads {
            sent.push(self.send_media(target, upload).await?);
        }
        Ok(sent)
    }

    async fn create_group(&self, title: &str, invite: &[String]) -> Result<CreatedChat> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;

        let mut users = Vec::new();
        for reference in invite {
            if let Some(chat) = client.resolve_username(reference).await.map_err(map_grammers_err)? {
                users.push(chat);
            }
        }

        let created = client.create_supergroup(title, "", false).await.map_err(map_grammers_err)?;
        let chat_id = chat_to_entity(&created.chat).canonical_id();
        Ok(CreatedChat { chat_id, title: title.to_string() })
    }

    async fn invite_to_supergroup(&self, chat_id: i64, users: &[String]) -> Result<()> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;
        let channel = resolve_channel_by_canonical_id(&client, chat_id).await?;

        for reference in users {
            let Some(user) = client.resolve_username(reference).await.map_err(map_grammers_err)? else {
                return Err(ProtocolError::UsernameNotOccupied(reference.clone()));
            };
            client.add_chat_user(&channel, &user).await.map_err(map_grammers_err)?;
        }
        Ok(())
    }

    async fn kick_participant(&self, chat_id: i64, user_id: i64) -> Result<()> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;
        let channel = resolve_channel_by_canonical_id(&client, chat_id).await?;

        let mut dialogs = client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(map_grammers_err)? {
            if let Chat::User(user) = &dialog.chat {
                if user.id() == user_id {
                    client.kick_participant(&channel, &dialog.chat).await.map_err(map_grammers_err)?;
                    return Ok(());
                }
            }
        }
        Err(ProtocolError::EntityNotFound { reference: user_id.to_string(), cache_size: 0 })
    }

    async fn list_participants(&self, chat_id: i64) -> Result<Vec<i64>> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;
        let channel = resolve_channel_by_canonical_id(&client, chat_id).await?;

        let mut participants = client.iter_participants(&channel);
        let mut ids = Vec::new();
        while let Some(participant) = participants.next().await.map_err(map_grammers_err)? {
            ids.push(participant.user.id());
        }
        Ok(ids)
    }

    async fn leave(&self, target: &Entity) -> Result<()> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;
        let chat = entity_to_packed_chat(&client, target).await?;
        client.delete_dialog(&chat).await.map_err(map_grammers_err)?;
        Ok(())
    }

    async fn set_history_hidden(&self, chat_id: i64, hidden: bool) -> Result<()> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;
        let channel = resolve_channel_by_canonical_id(&client, chat_id).await?;
        client.set_chat_history_hidden(&channel, hidden).await.map_err(map_grammers_err)?;
        Ok(())
    }

    async fn promote_admin(&self, chat_id: i64, user_id: i64, title: &str, tier: AdminRightsTier) -> Result<()> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;
        let channel = resolve_channel_by_canonical_id(&client, chat_id).await?;

        let mut dialogs = client.iter_dialogs();
        let mut target_user = None;
        while let Some(dialog) = dialogs.next().await.map_err(map_grammers_err)? {
            if let Chat::User(user) = &dialog.chat {
                if user.id() == user_id {
                    target_user = Some(dialog.chat);
                    break;
                }
            }
        }
        let user = target_user.ok_or_else(|| ProtocolError::EntityNotFound { reference: user_id.to_string(), cache_size: 0 })?;

        let rights = admin_rights_for_tier(tier);
        client.set_admin_rights(&channel, &user, rights).await.map_err(map_grammers_err)?;
        let _ = title;
        Ok(())
    }

    async fn export_invite_link(&self, chat_id: i64) -> Result<String> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;
        let channel = resolve_channel_by_canonical_id(&client, chat_id).await?;
        client.export_invite_link(&channel).await.map_err(map_grammers_err)
    }

    async fn fetch_post_media(&self, channel: &str, message_id: i32) -> Result<MediaUpload> {
        let client = { self.client.read().await.as_ref().cloned() };
        let client = client.ok_or_else(|| ProtocolError::Other("session not connected".into()))?;
        let chat = client
            .resolve_username(channel)
            .await
            .map_err(map_grammers_err)?
            .ok_or_else(|| ProtocolError::UsernameNotOccupied(channel.to_string()))?;

        let messages = client.get_messages_by_id(&chat, &[message_id]).await.map_err(map_grammers_err)?;
        let message = messages
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| ProtocolError::Other(format!("message {message_id} not found in {channel}")))?;

        let Some(Media::Document(_)) | Some(Media::Photo(_)) = message.media() else {
            return Err(ProtocolError::Other(format!("message {message_id} in {channel} has no media")));
        };

        Ok(MediaUpload {
            url: None,
            file_path: None,
            caption: Some(message.text().to_string()),
            parse_mode: None,
            disable_web_page_preview: false,
            filename: None,
            force_document: false,
            supports_streaming: false,
        })
    }
}

async fn entity_to_packed_chat(client: &Client, entity: &Entity) -> Result<Chat> {
    let mut dialogs = client.iter_dialogs();
    while let Some(dialog) = dialogs.next().await.map_err(map_grammers_err)? {
        if chat_to_entity(&dialog.chat).canonical_id() == entity.canonical_id() {
            return Ok(dialog.chat);
        }
    }
    Err(ProtocolError::EntityNotFound { reference: entity.canonical_id().to_string(), cache_size: 0 })
}

async fn resolve_channel_by_canonical_id(client: &Client, chat_id: i64) -> Result<Chat> {
    let mut dialogs = client.iter_dialogs();
    while let Some(dialog) = dialogs.next().await.map_err(map_grammers_err)? {
        if let Chat::Channel(_) = &dialog.chat {
            if chat_to_entity(&dialog.chat).canonical_id() == chat_id {
                return Ok(dialog.chat);
            }
        }
    }
    Err(ProtocolError::EntityNotFound { reference: chat_id.to_string(), cache_size: 0 })
}

/// Upload a local file or fetch-then-upload a remote URL. Direct URL
/// attachment isn't part of the MTProto upload API, so a `url` upload is
/// downloaded to a temp file first.
async fn upload_media(client: &Client, upload: &MediaUpload) -> Result<grammers_client::types::Uploaded> {
    if let Some(path) = &upload.file_path {
        return client.upload_file(path).await.map_err(map_grammers_err);
    }
    if let Some(url) = &upload.url {
        let bytes = reqwest::get(url).await.map_err(|e| ProtocolError::Network(e.to_string()))?.bytes().await.map_err(|e| ProtocolError::Network(e.to_string()))?;
        let filename = upload.filename.clone().unwrap_or_else(|| "upload.bin".to_string());
        let dir = std::env::temp_dir().join("tgmux-uploads");
        std::fs::create_dir_all(&dir).map_err(|e| ProtocolError::Other(e.to_string()))?;
        let path = dir.join(filename);
        std::fs::write(&path, &bytes).map_err(|e| ProtocolError::Other(e.to_string()))?;
        return client.upload_file(&path).await.map_err(map_grammers_err);
    }
    Err(ProtocolError::Other("media upload with neither file_path nor url".into()))
}

fn admin_rights_for_tier(tier: AdminRightsTier) -> grammers_tl_types::enums::ChatAdminRights {
    use grammers_tl_types::types::ChatAdminRights as Rights;
    let rights = match tier {
        AdminRightsTier::Full => Rights {
            change_info: true,
            post_messages: true,
            edit_messages: true,
            delete_messages: true,
            ban_users: true,
            invite_users: true,
            pin_messages: true,
            add_admins: false,
            anonymous: false,
            manage_call: true,
            other: true,
            manage_topics: false,
        },
        AdminRightsTier::Reduced => Rights {
            change_info: false,
            post_messages: true,
            edit_messages: false,
            delete_messages: true,
            ban_users: true,
            invite_users: true,
            pin_messages: true,
            add_admins: false,
            anonymous: false,
            manage_call: false,
            other: false,
            manage_topics: false,
        },
        AdminRightsTier::Minimal => Rights {
            change_info: false,
            post_messages: true,
            edit_messages: false,
            delete_messages: false,
            ban_users: false,
            invite_users: true,
            pin_messages: false,
            add_admins: false,
            anonymous: false,
            manage_call: false,
            other: false,
            manage_topics: false,
        },
    };
    grammers_tl_types::enums::ChatAdminRights::Rights(rights)
}

impl std::fmt::Debug for GrammersSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrammersSession").field("session_path", &self.session_path).finish()
    }
}
