//! Integration tests for the tgmux-router crate.
//!
//! Exercises the affinity-guard contract a handler relies on: once a chat
//! is marked left, the registry must keep reporting it as left and no
//! further `ok` operation rows should accumulate for it.

use std::sync::Arc;

use async_trait::async_trait;
use tgmux_bridge::{Bridge, Pool};
use tgmux_protocol::{
    AccountConfig, ChatRef, CreatedChat, Entity, MediaUpload, Result as ProtoResult, Service,
    SendTextOptions, SentMessage, TelegramSession,
};
use tgmux_router::Router;
use tgmux_store::{Database, Registry};

struct NoopSession;

#[async_trait]
impl TelegramSession for NoopSession {
    async fn connect(&self) -> ProtoResult<i64> {
        Ok(1)
    }
    async fn disconnect(&self) {}
    async fn is_authorized(&self) -> ProtoResult<bool> {
        Ok(true)
    }
    async fn iter_dialogs(&self) -> ProtoResult<Vec<Entity>> {
        Ok(vec![])
    }
    async fn resolve(&self, _: &ChatRef) -> ProtoResult<Entity> {
        Err(tgmux_protocol::ProtocolError::Other("unused".into()))
    }
    async fn send_text(&self, _: &Entity, _: &str, _: SendTextOptions) -> ProtoResult<SentMessage> {
        Ok(SentMessage { message_id: 1 })
    }
    async fn send_media(&self, _: &Entity, _: MediaUpload) -> ProtoResult<SentMessage> {
        Ok(SentMessage { message_id: 1 })
    }
    async fn create_group(&self, title: &str, _: &[String]) -> ProtoResult<CreatedChat> {
        Ok(CreatedChat { chat_id: -1001, title: title.to_string() })
    }
    async fn invite_to_supergroup(&self, _: i64, _: &[String]) -> ProtoResult<()> {
        Ok(())
    }
    async fn kick_participant(&self, _: i64, _: i64) -> ProtoResult<()> {
        Ok(())
    }
    async fn list_participants(&self, _: i64) -> ProtoResult<Vec<i64>> {
        Ok(vec![])
    }
    async fn leave(&self, _: &Entity) -> ProtoResult<()> {
        Ok(())
    }
    async fn set_history_hidden(&self, _: i64, _: bool) -> ProtoResult<()> {
        Ok(())
    }
    async fn promote_admin(&self, _: i64, _: i64, _: &str, _: tgmux_protocol::AdminRightsTier) -> ProtoResult<()> {
        Ok(())
    }
    async fn export_invite_link(&self, _: i64) -> ProtoResult<String> {
        Ok("https://t.me/+fake".into())
    }
    async fn fetch_post_media(&self, _: &str, _: i32) -> ProtoResult<MediaUpload> {
        Err(tgmux_protocol::ProtocolError::Other("unused".into()))
    }
    async fn send_media_group(&self, _: &Entity, uploads: Vec<MediaUpload>) -> ProtoResult<Vec<SentMessage>> {
        Ok(uploads.iter().map(|_| SentMessage { message_id: 1 }).collect())
    }
}

fn account(name: &str) -> AccountConfig {
    AccountConfig { name: name.to_string(), session_path: format!("{name}.session"), api_id: 1, api_hash: "hash".into(), priority: 1, is_main: name == "main" }
}

async fn router_with_bridge(name: &str, service: Service) -> Router {
    let bridge = Arc::new(Bridge::new(account(name), service, Arc::new(NoopSession)));
    bridge.start().await.unwrap();
    let pool = Arc::new(Pool::new());
    pool.insert(bridge);
    let db = Database::open_in_memory().unwrap();
    db.execute_mut(|conn| Ok(tgmux_store::migration::run_all(conn)?)).await.unwrap();
    Router::new(pool, Registry::new(db))
}

/// Scenario D (leave propagates guard): after `mark_left`, the registry
/// keeps reporting the chat as left and `get_account` no longer resolves
/// an owner for it, which is the guard a send handler checks before
/// invoking `pick_for_chat` at all.
#[tokio::test]
async fn leave_then_is_left_guards_further_sends() {
    let router = router_with_bridge("main", Service::SendText).await;
    router.registry().assign("-1001", "main", Some("Chat".into()), None).await.unwrap();

    let selection = router.pick_for_chat("-1001", Service::SendText).await.unwrap();
    router.handle_success(&selection.bridge, "-1001", "send_text").await.unwrap();

    router.registry().mark_left("-1001").await.unwrap();
    assert!(router.registry().is_left("-1001").await.unwrap());
    assert_eq!(router.registry().get_account("-1001").await.unwrap(), None);

    // A second mark_left is idempotent and does not add further rows.
    router.registry().mark_left("-1001").await.unwrap();
    let ops_before = router.registry().get_recent_operations(100).await.unwrap().len();
    assert!(router.registry().is_left("-1001").await.unwrap());
    let ops_after = router.registry().get_recent_operations(100).await.unwrap().len();
    assert_eq!(ops_before, ops_after, "checking is_left must not itself log an operation");
}
