//! Composition root: builds the pool, registry, router and scheduler from
//! [`GatewayConfig`] into one [`AppState`], and owns the background tasks
//! that keep the pool warm.
//!
//! Replaces the original's process-wide mutable singletons with one
//! constructed value threaded explicitly through the handlers, the way the
//! teacher's CLI builds its adapters and hands them to a single `AppState`
//! in `main.rs` rather than reaching for statics.

use std::sync::Arc;
use std::time::Duration;

use tgmux_bridge::{Bridge, Pool};
use tgmux_kernel::Scheduler;
use tgmux_router::Router;
use tgmux_store::{Database, Registry};
use tgmux_web::AppState;

use crate::config::GatewayConfig;
use crate::telegram_session::GrammersSession;

pub struct Platform {
    pub state: Arc<AppState>,
}

impl Platform {
    /// Opens and migrates the registry database, builds one bridge per
    /// (account, service) pair, starts them all concurrently, and wires
    /// the result into an [`AppState`].
    pub async fn bootstrap(config: &GatewayConfig) -> anyhow::Result<Self> {
        let database = Database::open_and_migrate(&config.registry_db)?;
        let registry = Registry::new(database);

        let pool = Arc::new(Pool::new());
        for (account, service) in &config.bridges {
            let session = Arc::new(GrammersSession::new(&account.session_path, account.api_id, account.api_hash.clone()));
            pool.insert(Arc::new(Bridge::new(account.clone(), *service, session)));
        }

        let started = pool.start_all().await;
        for (service, healthy, total) in started {
            tracing::info!(%service, healthy, total, "bridge pool started");
        }

        let router = Arc::new(Router::new(Arc::clone(&pool), registry.clone()));
        let scheduler = Scheduler::new();
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;

        let state = Arc::new(AppState {
            router,
            registry,
            scheduler,
            config: Arc::new(config.to_web_config()),
            http,
        });

        Ok(Self { state })
    }

    /// Spawns the two long-running maintenance loops: the registry's
    /// retention sweep and a periodic full-dialog-cache refresh per
    /// bridge, both detached for the life of the process.
    pub fn spawn_background_tasks(&self) {
        tokio::spawn(tgmux_store::janitor::run(self.state.registry.clone()));

        let pool_router = Arc::clone(&self.state.router);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tgmux_bridge::CACHE_WARMUP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                for bridge in pool_router.pool().all() {
                    if let Err(err) = bridge.full_warmup().await {
                        tracing::warn!(bridge = %bridge.key(), error = %err, "periodic cache warmup failed");
                    }
                }
            }
        });
    }
}
