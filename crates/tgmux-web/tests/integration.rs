//! ═══════════════════════════════════════════════════════════════════════
//! Handler-level integration tests exercising the full HTTP-to-registry
//! path through one in-memory pool + database, no network involved.
//! ═══════════════════════════════════════════════════════════════════════

use std::sync::Arc;

use async_trait::async_trait;
use tgmux_bridge::{Bridge, Pool};
use tgmux_kernel::Scheduler;
use tgmux_protocol::{
    AccountConfig, ChatRef, CreatedChat, Entity, MediaUpload, ProtocolError, Result as ProtoResult, SendTextOptions, SentMessage, Service,
    TelegramSession,
};
use tgmux_router::Router;
use tgmux_store::{Database, Registry};
use tgmux_web::handlers::send_text::{SendTextRequest, send_text};
use tgmux_web::{AppState, GatewayConfig};

/// Always healthy to connect, but every `resolve` fails — the session
/// never has the chat and the bridge's own dialog cache starts empty, so
/// every resolution attempt bottoms out in `EntityNotFound`.
struct UnresolvableSession;

#[async_trait]
impl TelegramSession for UnresolvableSession {
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
        Err(ProtocolError::Other("no such peer".into()))
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
        Err(ProtocolError::Other("unused".into()))
    }
    async fn send_media_group(&self, _: &Entity, uploads: Vec<MediaUpload>) -> ProtoResult<Vec<SentMessage>> {
        Ok(uploads.iter().map(|_| SentMessage { message_id: 1 }).collect())
    }
}

fn account(name: &str) -> AccountConfig {
    AccountConfig { name: name.to_string(), session_path: format!("{name}.session"), api_id: 1, api_hash: "hash".into(), priority: 1, is_main: true }
}

fn blank_request(chat: &str) -> SendTextRequest {
    SendTextRequest {
        chat: chat.to_string(),
        text: "hello".to_string(),
        tag_client: false,
        client_id: None,
        client_username: None,
        exclude_usernames: vec![],
        disable_preview: None,
        reply_to: None,
        parse_mode: None,
    }
}

/// Scenario F (spec.md §8): every healthy bridge fails to resolve the
/// target, the handler exhausts its single-candidate selection plus every
/// failover candidate (none, in a one-bridge pool), and persists the
/// request to `failed_requests` instead of losing it.
#[tokio::test]
async fn send_text_exhaustion_persists_a_failed_request() {
    let bridge = Arc::new(Bridge::new(account("solo"), Service::SendText, Arc::new(UnresolvableSession)));
    bridge.start().await.unwrap();

    let pool = Arc::new(Pool::new());
    pool.insert(Arc::clone(&bridge));

    let db = Database::open_in_memory().unwrap();
    db.execute_mut(|conn| Ok(tgmux_store::migration::run_all(conn)?)).await.unwrap();
    let registry = Registry::new(db);

    let router = Arc::new(Router::new(pool, registry.clone()));
    let scheduler = Scheduler::new();
    let config = Arc::new(GatewayConfig { create_send_timeout_secs: 5, ..GatewayConfig::default() });
    let http = reqwest::Client::new();

    let state = Arc::new(AppState { router, registry: registry.clone(), scheduler, config, http });

    let result = send_text(axum::extract::State(Arc::clone(&state)), axum::Json(blank_request("999"))).await;
    assert!(result.is_err(), "expected exhaustion to surface as an error response");

    assert_eq!(registry.get_failed_requests_count().await.unwrap(), 1);
    let saved = registry.get_failed_requests(10).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].service, "send_text");
}

/// Scenario A (spec.md §8): `create_chat`'s weighted-balanced draw keeps
/// the `main` account near its reserved floor rather than splitting evenly
/// with backups once a backup is already under-loaded.
#[tokio::test]
async fn pick_for_create_favors_under_loaded_backup_over_many_draws() {
    let main = Arc::new(Bridge::new(account("main"), Service::CreateChat, Arc::new(UnresolvableSession)));
    main.start().await.unwrap();
    let backup = Arc::new(Bridge::new(
        AccountConfig { name: "backup".into(), session_path: "backup.session".into(), api_id: 1, api_hash: "hash".into(), priority: 2, is_main: false },
        Service::CreateChat,
        Arc::new(UnresolvableSession),
    ));
    backup.start().await.unwrap();

    let pool = Arc::new(Pool::new());
    pool.insert(Arc::clone(&main));
    pool.insert(Arc::clone(&backup));

    let db = Database::open_in_memory().unwrap();
    db.execute_mut(|conn| Ok(tgmux_store::migration::run_all(conn)?)).await.unwrap();
    let registry = Registry::new(db);

    for i in 0..50 {
        registry.assign(&format!("-{i}"), "backup", None, None).await.unwrap();
    }

    let router = Router::new(pool, registry);

    let mut main_draws = 0;
    for _ in 0..200 {
        let bridge = router.pick_for_create(Service::CreateChat).await.unwrap();
        if bridge.account.name == "main" {
            main_draws += 1;
        }
    }

    assert!(main_draws < 40, "main should stay near its reserved floor once backup is already loaded, got {main_draws}/200");
}
