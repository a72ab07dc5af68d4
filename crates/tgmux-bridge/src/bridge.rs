//! One authenticated Telegram session bound to one service role.
//!
//! Combines a [`TelegramSession`], the [`Health`] state machine, and a
//! [`DialogCache`] into the runtime object spec.md §3/§4.2 describes,
//! wrapping every outbound protocol call in the retry/reconnect driver from
//! [`crate::retry`].

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tgmux_protocol::{
    AccountConfig, ChatRef, CreatedChat, Entity, MediaUpload, ProtocolError, Result as ProtoResult, SendTextOptions,
    SentMessage, Service, TelegramSession, entity::SUPERGROUP_ID_OFFSET,
};

use crate::cache::{CacheStats, DialogCache};
use crate::error::{BridgeError, Result};
use crate::health::{BridgeStatus, Health};
use crate::retry::{ReconnectOutcome, RetryPolicy, with_retry};

/// Full dialog warmup repeats on this interval (spec.md §4.2).
pub const CACHE_WARMUP_INTERVAL: Duration = Duration::from_secs(1800);
/// Mini-refresh (last 100 dialogs) cannot run more often than this, to avoid
/// tripping Telegram's own rate limits.
pub const MINI_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);
const MINI_REFRESH_DIALOG_LIMIT: usize = 100;
const MAX_PARTICIPANTS_FETCH: usize = 200;

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Key identifying one bridge in the pool: `"{account_name}:{service}"`.
pub fn bridge_key(account_name: &str, service: Service) -> String {
    format!("{account_name}:{service}")
}

pub struct Bridge {
    pub account: AccountConfig,
    pub service: Service,
    session: Arc<dyn TelegramSession>,
    health: Health,
    cache: DialogCache,
    self_id: std::sync::RwLock<Option<i64>>,
    last_active: AtomicI64,
    last_mini_refresh: AtomicI64,
    operations_count: AtomicU64,
}

impl Bridge {
    pub fn new(account: AccountConfig, service: Service, session: Arc<dyn TelegramSession>) -> Self {
        Self {
            account,
            service,
            session,
            health: Health::new(),
            cache: DialogCache::new(50_000),
            self_id: std::sync::RwLock::new(None),
            last_active: AtomicI64::new(0),
            last_mini_refresh: AtomicI64::new(0),
            operations_count: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> String {
        bridge_key(&self.account.name, self.service)
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub fn status(&self) -> BridgeStatus {
        self.health.status()
    }

    pub fn operations_count(&self) -> u64 {
        self.operations_count.load(Ordering::Relaxed)
    }

    pub fn self_id(&self) -> Option<i64> {
        *self.self_id.read().expect("self_id lock poisoned")
    }

    fn touch(&self) {
        self.last_active.store(now_unix(), Ordering::Relaxed);
        self.operations_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Authenticate, discover self identity, and run the first full
    /// warmup. Startup of one bridge never blocks another — the caller
    /// (Pool::start_all) runs these concurrently via `join_all`.
    pub async fn start(&self) -> Result<()> {
        self.health.mark_starting();
        match self.session.connect().await {
            Ok(id) => {
                *self.self_id.write().expect("self_id lock poisoned") = Some(id);
            }
            Err(err) => {
                self.health.mark_error(err.to_string());
                return Err(BridgeError::Protocol(err));
            }
        }
        if let Err(err) = self.full_warmup().await {
            self.health.mark_error(err.to_string());
            return Err(err);
        }
        self.health.mark_success();
        Ok(())
    }

    /// Iterate every dialog visible to this account and fill the cache.
    pub async fn full_warmup(&self) -> Result<()> {
        let dialogs = self.session.iter_dialogs().await.map_err(BridgeError::Protocol)?;
        let count = dialogs.len();
        self.cache.insert_all(dialogs).await;
        tracing::info!(bridge = %self.key(), cached = count, "full dialog warmup complete");
        Ok(())
    }

    /// Fetch the last 100 dialogs on demand, rate-limited by
    /// `MINI_REFRESH_COOLDOWN` so a burst of cache misses can't hammer
    /// Telegram's own rate limiter.
    async fn mini_refresh(&self) -> Result<()> {
        let last = self.last_mini_refresh.load(Ordering::SeqCst);
        let now = now_unix();
        if now - last < MINI_REFRESH_COOLDOWN.as_secs() as i64 {
            return Ok(());
        }
        self.last_mini_refresh.store(now, Ordering::SeqCst);
        let dialogs = self.session.iter_dialogs().await.map_err(BridgeError::Protocol)?;
        let limited = dialogs.into_iter().take(MINI_REFRESH_DIALOG_LIMIT);
        self.cache.insert_all(limited).await;
        Ok(())
    }

    /// Entity resolution, spec.md §4.2 `get_entity` algorithm:
    /// normalize → direct protocol call → cache scan → mini-refresh + cache
    /// scan → protocol call again → peer-id wrapper probing → fail.
    pub async fn resolve_entity(&self, reference: &str) -> Result<Entity> {
        let chat_ref = tgmux_protocol::normalize_chat_ref(reference);

        if let Ok(entity) = self.session.resolve(&chat_ref).await {
            self.cache.insert(entity.clone()).await;
            return Ok(entity);
        }

        if let Some(found) = self.scan_cache(&chat_ref) {
            return Ok(found);
        }

        self.mini_refresh().await?;

        if let Some(found) = self.scan_cache(&chat_ref) {
            return Ok(found);
        }

        if let Ok(entity) = self.session.resolve(&chat_ref).await {
            self.cache.insert(entity.clone()).await;
            return Ok(entity);
        }

        if let ChatRef::Id(raw) = chat_ref {
            for wrapper in peer_id_wrappers(raw) {
                if let Ok(entity) = self.session.resolve(&ChatRef::Id(wrapper)).await {
                    self.cache.insert(entity.clone()).await;
                    return Ok(entity);
                }
            }
        }

        Err(BridgeError::Protocol(ProtocolError::EntityNotFound {
            reference: reference.to_string(),
            cache_size: self.cache.len() as usize,
        }))
    }

    fn scan_cache(&self, chat_ref: &ChatRef) -> Option<Entity> {
        match chat_ref {
            ChatRef::Id(id) => self.cache.get(*id).or_else(|| self.cache.by_raw_id(*id)),
            ChatRef::Username(name) => self.cache.by_username(name),
        }
    }

    /// Outbound protocol calls wrapped in the retry/reconnect driver.
    /// Flood-wait and domain errors propagate to the caller unchanged so
    /// the router can decide on failover; transient errors get
    /// `RetryPolicy::max_retries` local attempts first.
    async fn call_with_retry<T, F, Fut>(&self, policy: RetryPolicy, mut op: F) -> ProtoResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ProtoResult<T>>,
    {
        with_retry(
            policy,
            &mut op,
            || async {
                self.session.disconnect().await;
                match self.session.connect().await {
                    Ok(_) => match self.session.is_authorized().await {
                        Ok(true) => ReconnectOutcome::Recovered,
                        _ => ReconnectOutcome::Unauthorized,
                    },
                    Err(_) => ReconnectOutcome::Unauthorized,
                }
            },
        )
        .await
    }

    pub async fn send_text(&self, target: &Entity, text: &str, options: SendTextOptions) -> Result<SentMessage> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.send_text(target, text, options.clone()))
            .await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    pub async fn send_media(&self, target: &Entity, upload: MediaUpload) -> Result<SentMessage> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.send_media(target, upload.clone()))
            .await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    pub async fn create_group(&self, title: &str, invite: &[String]) -> Result<CreatedChat> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.create_group(title, invite))
            .await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    pub async fn invite_to_supergroup(&self, chat_id: i64, users: &[String]) -> Result<()> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.invite_to_supergroup(chat_id, users))
            .await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    pub async fn kick_participant(&self, chat_id: i64, user_id: i64) -> Result<()> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.kick_participant(chat_id, user_id))
            .await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    pub async fn list_participants(&self, chat_id: i64) -> Result<Vec<i64>> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.list_participants(chat_id))
            .await
            .map(|ids| ids.into_iter().take(MAX_PARTICIPANTS_FETCH).collect());
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    pub async fn leave(&self, target: &Entity) -> Result<()> {
        let result = self.call_with_retry(RetryPolicy::default(), || self.session.leave(target)).await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    /// Reveal full chat history to members who join after creation
    /// (spec.md §4.5.1 step 4).
    pub async fn set_history_hidden(&self, chat_id: i64, hidden: bool) -> Result<()> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.set_history_hidden(chat_id, hidden))
            .await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    /// Promote `user_id` with `tier`. The caller (the `create_chat` handler)
    /// walks [`tgmux_protocol::AdminRightsTier::FALLBACK_ORDER`] itself,
    /// retrying with a smaller tier on failure — that fallback is a
    /// business decision the handler makes, not something the bridge
    /// should hide behind an automatic retry.
    pub async fn promote_admin(
        &self,
        chat_id: i64,
        user_id: i64,
        title: &str,
        tier: tgmux_protocol::AdminRightsTier,
    ) -> Result<()> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.promote_admin(chat_id, user_id, title, tier))
            .await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    pub async fn export_invite_link(&self, chat_id: i64) -> Result<String> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.export_invite_link(chat_id))
            .await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    pub async fn fetch_post_media(&self, channel: &str, message_id: i32) -> Result<MediaUpload> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.fetch_post_media(channel, message_id))
            .await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    pub async fn send_media_group(&self, target: &Entity, uploads: Vec<MediaUpload>) -> Result<Vec<SentMessage>> {
        let result = self
            .call_with_retry(RetryPolicy::default(), || self.session.send_media_group(target, uploads.clone()))
            .await;
        self.record_outcome(&result);
        result.map_err(BridgeError::Protocol)
    }

    /// Bump `operations_count`/`last_active` for every call, win or lose.
    /// The health transition itself (`mark_success`/`mark_flood`/`mark_banned`/
    /// `mark_error`) lives solely in `Router::handle_success`/`handle_error`,
    /// which every caller invokes right after — duplicating it here would
    /// double-count each outcome against spec.md §4.2's error threshold.
    fn record_outcome<T>(&self, _result: &ProtoResult<T>) {
        self.touch();
    }
}

/// The three peer-id wrappers a raw reference could have been spelled with.
/// Tried in an order driven by the sign/magnitude of `raw`: if it already
/// looks like a folded supergroup id, try the user-id interpretation first
/// (and vice versa), so the common case resolves on the first probe.
fn peer_id_wrappers(raw: i64) -> Vec<i64> {
    let as_user = raw.unsigned_abs() as i64;
    let as_basic_group = -raw.unsigned_abs() as i64;
    let as_supergroup = -SUPERGROUP_ID_OFFSET - raw.unsigned_abs() as i64;
    let mut wrappers = vec![as_user, as_basic_group, as_supergroup];
    wrappers.dedup();
    wrappers.retain(|w| *w != raw);
    wrappers
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tgmux_protocol::{ChatRef, Result as ProtoResult};

    struct FakeSession {
        dialogs: Vec<Entity>,
        direct_resolves: Mutex<Vec<ChatRef>>,
        resolvable: Vec<Entity>,
    }

    #[async_trait]
    impl TelegramSession for FakeSession {
        async fn connect(&self) -> ProtoResult<i64> {
            Ok(1)
        }
        async fn disconnect(&self) {}
        async fn is_authorized(&self) -> ProtoResult<bool> {
            Ok(true)
        }
        async fn iter_dialogs(&self) -> ProtoResult<Vec<Entity>> {
            Ok(self.dialogs.clone())
        }
        async fn resolve(&self, reference: &ChatRef) -> ProtoResult<Entity> {
            self.direct_resolves.lock().unwrap().push(reference.clone());
            match reference {
                ChatRef::Username(name) => self
                    .resolvable
                    .iter()
                    .find(|e| e.username().map(|u| u.trim_start_matches('@')) == Some(name.trim_start_matches('@')))
                    .cloned()
                    .ok_or(ProtocolError::EntityNotFound { reference: name.clone(), cache_size: 0 }),
                ChatRef::Id(id) => self
                    .resolvable
                    .iter()
                    .find(|e| e.raw_id() == *id || e.canonical_id() == *id)
                    .cloned()
                    .ok_or(ProtocolError::EntityNotFound { reference: id.to_string(), cache_size: 0 }),
            }
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
            Err(ProtocolError::Other("fetch_post_media not supported by fake session".into()))
        }
        async fn send_media_group(&self, _: &Entity, uploads: Vec<MediaUpload>) -> ProtoResult<Vec<SentMessage>> {
            Ok(uploads.iter().map(|_| SentMessage { message_id: 1 }).collect())
        }
    }

    fn account(name: &str) -> AccountConfig {
        AccountConfig {
            name: name.to_string(),
            session_path: format!("{name}.session"),
            api_id: 1,
            api_hash: "hash".into(),
            priority: 1,
            is_main: false,
        }
    }

    #[tokio::test]
    async fn start_warms_cache_from_dialogs() {
        let session = Arc::new(FakeSession {
            dialogs: vec![Entity::User { id: 10, username: Some("bob".into()), first_name: None, bot: false }],
            direct_resolves: Mutex::new(vec![]),
            resolvable: vec![],
        });
        let bridge = Bridge::new(account("main"), Service::SendText, session);
        bridge.start().await.unwrap();
        assert!(bridge.is_healthy());
        assert_eq!(bridge.cache_stats().size, 1);
    }

    #[tokio::test]
    async fn resolve_entity_finds_in_cache_after_miss_on_direct_call() {
        let session = Arc::new(FakeSession {
            dialogs: vec![Entity::User { id: 10, username: Some("bob".into()), first_name: None, bot: false }],
            direct_resolves: Mutex::new(vec![]),
            resolvable: vec![],
        });
        let bridge = Bridge::new(account("main"), Service::SendText, session);
        bridge.start().await.unwrap();
        let found = bridge.resolve_entity("@bob").await.unwrap();
        assert_eq!(found.raw_id(), 10);
    }

    #[tokio::test]
    async fn resolve_entity_fails_with_cache_size_in_message() {
        let session = Arc::new(FakeSession {
            dialogs: vec![],
            direct_resolves: Mutex::new(vec![]),
            resolvable: vec![],
        });
        let bridge = Bridge::new(account("main"), Service::SendText, session);
        bridge.start().await.unwrap();
        let err = bridge.resolve_entity("999").await.unwrap_err();
        assert!(err.to_string().contains("cache size"));
    }

    #[test]
    fn peer_id_wrappers_excludes_the_original() {
        let wrappers = peer_id_wrappers(42);
        assert!(!wrappers.contains(&42));
        assert!(wrappers.contains(&-42));
    }
}
