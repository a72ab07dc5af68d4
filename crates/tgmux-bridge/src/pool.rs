//! Container of all bridges, indexed by `(account, service)`.
//!
//! Mirrors `AdapterRegistry`'s `DashMap`-backed concurrent-map design
//! (`openintent-kernel/src/registry.rs`) but specialized to the
//! account×service product this gateway builds at startup from static
//! config rather than dynamic adapter registration.

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use tgmux_protocol::{AccountConfig, Service};

use crate::bridge::{Bridge, bridge_key};
use crate::error::{BridgeError, Result};

/// Share of `create_chat` probability mass reserved for the `main` account
/// in weighted-balanced selection, so it stays warm without absorbing the
/// bulk of new chats (spec.md §4.3).
pub const MAIN_PCT: f64 = 0.05;

pub struct Pool {
    bridges: DashMap<String, Arc<Bridge>>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    pub fn new() -> Self {
        Self { bridges: DashMap::new() }
    }

    pub fn insert(&self, bridge: Arc<Bridge>) {
        self.bridges.insert(bridge.key(), bridge);
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Bridge>> {
        self.bridges.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Start every bridge concurrently; one failing account must not
    /// prevent the others from starting (spec.md §4.3). Returns the
    /// healthy/total count per service for startup logging.
    pub async fn start_all(&self) -> Vec<(Service, usize, usize)> {
        let bridges = self.all();
        let starts = bridges.iter().map(|b| {
            let b = Arc::clone(b);
            async move {
                if let Err(err) = b.start().await {
                    tracing::warn!(bridge = %b.key(), error = %err, "bridge failed to start");
                }
            }
        });
        futures::future::join_all(starts).await;

        Service::ALL
            .iter()
            .map(|&service| {
                let in_service: Vec<_> = bridges.iter().filter(|b| b.service == service).collect();
                let healthy = in_service.iter().filter(|b| b.is_healthy()).count();
                (service, healthy, in_service.len())
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Bridge>> {
        self.bridges.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn get_by_account(&self, account_name: &str, service: Service) -> Option<Arc<Bridge>> {
        self.get(&bridge_key(account_name, service))
    }

    /// All bridges for `service`, sorted by account priority ascending (so
    /// index 0 is the preferred candidate).
    pub fn by_service(&self, service: Service) -> Vec<Arc<Bridge>> {
        let mut bridges: Vec<_> = self.bridges.iter().filter(|e| e.service == service).map(|e| Arc::clone(e.value())).collect();
        bridges.sort_by_key(|b| b.account.priority);
        bridges
    }

    pub fn get_healthy_list(&self, service: Service) -> Vec<Arc<Bridge>> {
        self.by_service(service).into_iter().filter(|b| b.is_healthy()).collect()
    }

    /// Highest-priority healthy bridge for `service`, or `None` if the pool
    /// is exhausted.
    pub fn get_best(&self, service: Service) -> Option<Arc<Bridge>> {
        self.get_healthy_list(service).into_iter().next()
    }

    /// Next healthy bridge after excluding one key, in priority order —
    /// used by `pick_for_chat`'s single-candidate ownership-rewrite
    /// failover.
    pub fn get_next_healthy(&self, service: Service, exclude_key: &str) -> Option<Arc<Bridge>> {
        self.get_healthy_list(service).into_iter().find(|b| b.key() != exclude_key)
    }

    /// Every other healthy bridge for `service`, in priority order — the
    /// fan-out candidate list service handlers retry through when a
    /// single-candidate failover isn't enough (spec.md §4.5.2/§4.5.3).
    pub fn get_all_healthy_except(&self, service: Service, exclude_key: &str) -> Vec<Arc<Bridge>> {
        self.get_healthy_list(service).into_iter().filter(|b| b.key() != exclude_key).collect()
    }

    /// Healthy bridge with the lowest active-chat count, per `counts`
    /// (account_name → active chats). Accounts absent from `counts` are
    /// treated as having zero chats.
    pub fn get_least_loaded(
        &self,
        service: Service,
        counts: &std::collections::HashMap<String, i64>,
        exclude: Option<&str>,
    ) -> Option<Arc<Bridge>> {
        self.get_healthy_list(service)
            .into_iter()
            .filter(|b| exclude != Some(b.key().as_str()))
            .min_by_key(|b| counts.get(&b.account.name).copied().unwrap_or(0))
    }

    /// Weighted-balanced draw used by `create_chat` (spec.md §4.3): `main`
    /// gets a fixed `MAIN_PCT` of the probability mass; backups split the
    /// remainder by deficit weight `w_i = max(C_backup) - c_i + 1`, so the
    /// most under-loaded backup is the most likely draw. Falls back to pure
    /// deficit-weighting among backups if no `main` is present, and returns
    /// deterministically if only one eligible bridge exists.
    pub fn get_weighted_balanced(
        &self,
        service: Service,
        counts: &std::collections::HashMap<String, i64>,
        exclude: Option<&str>,
    ) -> Option<Arc<Bridge>> {
        let candidates: Vec<_> = self
            .get_healthy_list(service)
            .into_iter()
            .filter(|b| exclude != Some(b.key().as_str()))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        if candidates.len() == 1 {
            return Some(candidates.into_iter().next().unwrap());
        }

        let main_idx = candidates.iter().position(|b| b.account.is_main);
        let backups: Vec<usize> = (0..candidates.len()).filter(|&i| Some(i) != main_idx).collect();

        let mut weights = vec![0.0_f64; candidates.len()];

        if backups.is_empty() {
            // Only main(s) are healthy; split evenly.
            let share = 1.0 / candidates.len() as f64;
            weights.iter_mut().for_each(|w| *w = share);
        } else {
            let backup_counts: Vec<i64> = backups.iter().map(|&i| counts.get(&candidates[i].account.name).copied().unwrap_or(0)).collect();
            let max_c = backup_counts.iter().copied().max().unwrap_or(0);
            let deficit_weights: Vec<f64> = backup_counts.iter().map(|&c| (max_c - c + 1) as f64).collect();
            let total_deficit: f64 = deficit_weights.iter().sum();

            let backup_mass = match main_idx {
                Some(idx) => {
                    weights[idx] = MAIN_PCT;
                    1.0 - MAIN_PCT
                }
                None => 1.0,
            };

            for (&candidate_idx, &w) in backups.iter().zip(deficit_weights.iter()) {
                weights[candidate_idx] = backup_mass * (w / total_deficit);
            }
        }

        let total: f64 = weights.iter().sum();
        let mut draw = rand::thread_rng().gen_range(0.0..total);
        for (idx, w) in weights.iter().enumerate() {
            if draw < *w {
                return Some(Arc::clone(&candidates[idx]));
            }
            draw -= w;
        }
        candidates.last().cloned()
    }

    pub fn reset_bridge_by_admin(&self, key: &str) -> Result<()> {
        let bridge = self.get(key).ok_or_else(|| BridgeError::AccountNotFound { name: key.to_string() })?;
        bridge.health().admin_reset();
        Ok(())
    }

    /// Static Account × Service product used to build the pool at startup.
    pub fn expected_keys(accounts: &[AccountConfig]) -> Vec<String> {
        accounts
            .iter()
            .flat_map(|account| Service::ALL.iter().map(move |&service| bridge_key(&account.name, service)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tgmux_protocol::{ChatRef, CreatedChat, Entity, MediaUpload, Result as ProtoResult, SendTextOptions, SentMessage, TelegramSession};

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
        AccountConfig {
            name: name.to_string(),
            session_path: format!("{name}.session"),
            api_id: 1,
            api_hash: "hash".into(),
            priority,
            is_main,
        }
    }

    async fn healthy_bridge(name: &str, priority: u32, is_main: bool, service: Service) -> Arc<Bridge> {
        let bridge = Arc::new(Bridge::new(account(name, priority, is_main), service, Arc::new(NoopSession)));
        bridge.start().await.unwrap();
        bridge
    }

    #[tokio::test]
    async fn get_best_returns_highest_priority_healthy() {
        let pool = Pool::new();
        pool.insert(healthy_bridge("main", 1, true, Service::SendText).await);
        pool.insert(healthy_bridge("b1", 2, false, Service::SendText).await);
        let best = pool.get_best(Service::SendText).unwrap();
        assert_eq!(best.account.name, "main");
    }

    #[tokio::test]
    async fn get_next_healthy_excludes_key() {
        let pool = Pool::new();
        let main = healthy_bridge("main", 1, true, Service::SendText).await;
        pool.insert(Arc::clone(&main));
        pool.insert(healthy_bridge("b1", 2, false, Service::SendText).await);
        let next = pool.get_next_healthy(Service::SendText, &main.key()).unwrap();
        assert_eq!(next.account.name, "b1");
    }

    #[tokio::test]
    async fn get_least_loaded_picks_lowest_count() {
        let pool = Pool::new();
        pool.insert(healthy_bridge("main", 1, true, Service::SendText).await);
        pool.insert(healthy_bridge("b1", 2, false, Service::SendText).await);
        let mut counts = HashMap::new();
        counts.insert("main".to_string(), 10);
        counts.insert("b1".to_string(), 2);
        let chosen = pool.get_least_loaded(Service::SendText, &counts, None).unwrap();
        assert_eq!(chosen.account.name, "b1");
    }

    #[tokio::test]
    async fn weighted_balanced_single_candidate_is_deterministic() {
        let pool = Pool::new();
        pool.insert(healthy_bridge("main", 1, true, Service::CreateChat).await);
        let counts = HashMap::new();
        let chosen = pool.get_weighted_balanced(Service::CreateChat, &counts, None).unwrap();
        assert_eq!(chosen.account.name, "main");
    }

    #[tokio::test]
    async fn weighted_balanced_respects_main_pct_over_many_draws() {
        let pool = Pool::new();
        pool.insert(healthy_bridge("main", 1, true, Service::CreateChat).await);
        pool.insert(healthy_bridge("b1", 2, false, Service::CreateChat).await);
        pool.insert(healthy_bridge("b2", 3, false, Service::CreateChat).await);
        pool.insert(healthy_bridge("b3", 4, false, Service::CreateChat).await);

        let mut counts = HashMap::new();
        counts.insert("main".to_string(), 100);
        counts.insert("b1".to_string(), 10);
        counts.insert("b2".to_string(), 10);
        counts.insert("b3".to_string(), 10);

        let mut main_hits = 0u32;
        let mut backup_hits: HashMap<String, u32> = HashMap::new();
        const DRAWS: u32 = 10_000;
        for _ in 0..DRAWS {
            let chosen = pool.get_weighted_balanced(Service::CreateChat, &counts, None).unwrap();
            if chosen.account.name == "main" {
                main_hits += 1;
            } else {
                *backup_hits.entry(chosen.account.name.clone()).or_insert(0) += 1;
            }
        }

        let main_freq = main_hits as f64 / DRAWS as f64;
        assert!((0.04..=0.06).contains(&main_freq), "main_freq={main_freq}");
        for (_, hits) in backup_hits {
            let freq = hits as f64 / DRAWS as f64;
            assert!((0.29..=0.35).contains(&freq), "backup freq={freq}");
        }
    }

    #[test]
    fn expected_keys_is_account_times_service_product() {
        let accounts = vec![account("main", 1, true), account("b1", 2, false)];
        let keys = Pool::expected_keys(&accounts);
        assert_eq!(keys.len(), accounts.len() * Service::ALL.len());
    }
}
