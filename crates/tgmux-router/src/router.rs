//! Stateless policy layer over [`Pool`] + [`Registry`].
//!
//! Three selection entry points (spec.md §4.4) plus outcome handling.
//! Grounded on the teacher's tiered-selection shape in
//! `openintent-kernel/src/router.rs` and the cooldown/fallback idiom in
//! `openintent-cli/src/failover.rs`, generalized from LLM-provider failover
//! to Telegram-account failover.

use std::collections::HashMap;
use std::sync::Arc;

use tgmux_bridge::{Bridge, Pool};
use tgmux_protocol::{ProtocolError, Service};
use tgmux_store::Registry;

use crate::error::{Result, RouterError};

#[derive(Clone)]
pub struct Router {
    pool: Arc<Pool>,
    registry: Registry,
}

/// Outcome of a chat-affinity selection: whether the router had to fail
/// over away from the registry's recorded owner.
pub struct Selection {
    pub bridge: Arc<Bridge>,
    pub failed_over_from: Option<String>,
}

impl Router {
    pub fn new(pool: Arc<Pool>, registry: Registry) -> Self {
        Self { pool, registry }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn chat_counts(&self) -> Result<HashMap<String, i64>> {
        Ok(self.registry.get_account_chat_counts().await?.into_iter().collect())
    }

    /// Weighted-balanced pick across healthy bridges for `service`, used
    /// only by `create_chat` — there is no existing owner to respect.
    pub async fn pick_for_create(&self, service: Service) -> Result<Arc<Bridge>> {
        let counts = self.chat_counts().await?;
        self.pool
            .get_weighted_balanced(service, &counts, None)
            .ok_or_else(|| RouterError::PoolEmpty { service: service.to_string() })
    }

    /// Affinity selection for chat-scoped operations (`send_text`,
    /// `leave_chat`): prefer the registry-assigned account; on absent or
    /// unhealthy, fall back to least-loaded and rewrite ownership.
    pub async fn pick_for_chat(&self, chat_id: &str, service: Service) -> Result<Selection> {
        let assigned = self.registry.get_account(chat_id).await?;

        if let Some(account_name) = &assigned {
            if let Some(bridge) = self.pool.get_by_account(account_name, service) {
                if bridge.is_healthy() {
                    return Ok(Selection { bridge, failed_over_from: None });
                }
            }
        }

        let counts = self.chat_counts().await?;
        let exclude = assigned
            .as_deref()
            .and_then(|name| self.pool.get_by_account(name, service))
            .map(|b| b.key());
        let fallback = self
            .pool
            .get_least_loaded(service, &counts, exclude.as_deref())
            .ok_or_else(|| RouterError::PoolEmpty { service: service.to_string() })?;

        if let Some(from_account) = assigned {
            if from_account != fallback.account.name {
                self.registry.update_account(chat_id, &fallback.account.name).await?;
                self.registry
                    .log_failover(chat_id, &from_account, &fallback.account.name, "owner unhealthy, rewrote ownership")
                    .await?;
                tracing::warn!(chat_id, from = %from_account, to = %fallback.account.name, "rewrote chat ownership after owner became unhealthy");
                return Ok(Selection { bridge: fallback, failed_over_from: Some(from_account) });
            }
        }

        Ok(Selection { bridge: fallback, failed_over_from: None })
    }

    /// `send_media`'s selection: affinity when a known recipient id is
    /// already in the registry, otherwise least-loaded (there is no chat to
    /// anchor affinity to for a brand-new private recipient).
    pub async fn pick_for_recipient(&self, service: Service, user_id: Option<i64>, _username: Option<&str>) -> Result<Selection> {
        if let Some(id) = user_id {
            let chat_id = id.to_string();
            if self.registry.get_account(&chat_id).await?.is_some() {
                return self.pick_for_chat(&chat_id, service).await;
            }
        }

        let counts = self.chat_counts().await?;
        let bridge = self
            .pool
            .get_least_loaded(service, &counts, None)
            .ok_or_else(|| RouterError::PoolEmpty { service: service.to_string() })?;
        Ok(Selection { bridge, failed_over_from: None })
    }

    pub async fn handle_success(&self, bridge: &Bridge, chat_id: &str, operation: &str) -> Result<()> {
        bridge.health().mark_success();
        self.registry
            .log_operation(&bridge.account.name, chat_id, operation, "ok", None)
            .await?;
        Ok(())
    }

    /// Classify a raw error once into flood-wait / banned-or-deactivated /
    /// generic, update the bridge's health accordingly, and log the
    /// outcome with the matching status string.
    pub async fn handle_error(&self, bridge: &Bridge, raw_error: &str, chat_id: &str, operation: &str) -> Result<ProtocolError> {
        let classified = ProtocolError::classify(raw_error);
        let status = match &classified {
            ProtocolError::FloodWait { seconds } => {
                bridge.health().mark_flood(*seconds);
                "flood_wait"
            }
            ProtocolError::Banned { detail } => {
                bridge.health().mark_banned(detail.clone());
                "banned"
            }
            other => {
                bridge.health().mark_error(other.to_string());
                "error"
            }
        };
        self.registry
            .log_operation(&bridge.account.name, chat_id, operation, status, Some(raw_error.to_string()))
            .await?;
        tracing::warn!(account = %bridge.account.name, chat_id, operation, status, "operation failed");
        Ok(classified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tgmux_bridge::Bridge;
    use tgmux_protocol::{AccountConfig, ChatRef, CreatedChat, Entity, MediaUpload, Result as ProtoResult, SendTextOptions, SentMessage, TelegramSession};
    use tgmux_store::Database;

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

    fn account(name: &str, priority: u32, is_main: bool) -> AccountConfig {
        AccountConfig { name: name.to_string(), session_path: format!("{name}.session"), api_id: 1, api_hash: "hash".into(), priority, is_main }
    }

    async fn healthy_bridge(name: &str, priority: u32, is_main: bool, service: Service) -> Arc<Bridge> {
        let bridge = Arc::new(Bridge::new(account(name, priority, is_main), service, Arc::new(NoopSession)));
        bridge.start().await.unwrap();
        bridge
    }

    async fn router_with(bridges: Vec<Arc<Bridge>>) -> Router {
        let pool = Arc::new(Pool::new());
        for b in bridges {
            pool.insert(b);
        }
        let db = Database::open_in_memory().unwrap();
        db.execute_mut(|conn| Ok(tgmux_store::migration::run_all(conn)?)).await.unwrap();
        Router::new(pool, Registry::new(db))
    }

    #[tokio::test]
    async fn pick_for_chat_honors_affinity_when_healthy() {
        let main = healthy_bridge("main", 1, true, Service::SendText).await;
        let b1 = healthy_bridge("b1", 2, false, Service::SendText).await;
        let router = router_with(vec![main, b1]).await;
        router.registry().assign("-1001", "b1", None, None).await.unwrap();

        let selection = router.pick_for_chat("-1001", Service::SendText).await.unwrap();
        assert_eq!(selection.bridge.account.name, "b1");
        assert!(selection.failed_over_from.is_none());
    }

    #[tokio::test]
    async fn pick_for_chat_fails_over_and_rewrites_ownership() {
        let main = healthy_bridge("main", 1, true, Service::SendText).await;
        let b1 = healthy_bridge("b1", 2, false, Service::SendText).await;
        b1.health().mark_flood(3600);
        let router = router_with(vec![main, b1]).await;
        router.registry().assign("-1001", "b1", None, None).await.unwrap();

        let selection = router.pick_for_chat("-1001", Service::SendText).await.unwrap();
        assert_eq!(selection.bridge.account.name, "main");
        assert_eq!(selection.failed_over_from.as_deref(), Some("b1"));
        assert_eq!(router.registry().get_account("-1001").await.unwrap(), Some("main".to_string()));
        let failovers = router.registry().get_failover_log(10).await.unwrap();
        assert_eq!(failovers.len(), 1);
    }

    #[tokio::test]
    async fn handle_error_classifies_flood_wait() {
        let main = healthy_bridge("main", 1, true, Service::SendText).await;
        let router = router_with(vec![Arc::clone(&main)]).await;
        let classified = router.handle_error(&main, "A wait of 30 seconds is required", "-1001", "send_text").await.unwrap();
        assert!(matches!(classified, ProtocolError::FloodWait { seconds: 30 }));
        assert!(!main.is_healthy());
    }

    #[tokio::test]
    async fn pick_for_create_is_weighted_balanced() {
        let main = healthy_bridge("main", 1, true, Service::CreateChat).await;
        let b1 = healthy_bridge("b1", 2, false, Service::CreateChat).await;
        let router = router_with(vec![main, b1]).await;
        let selection = router.pick_for_create(Service::CreateChat).await.unwrap();
        assert!(["main", "b1"].contains(&selection.account.name.as_str()));
    }
}
