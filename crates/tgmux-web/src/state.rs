//! Shared application state threaded into every Axum handler.
//!
//! Replaces the original's process-wide mutable singletons (`_router`,
//! `_pool`, `_registry`) with one constructed value, following the
//! teacher's `AppState` pattern (`openintent-web/src/state.rs`) of owning
//! everything request handlers need behind an `Arc`.

use std::sync::Arc;

use tgmux_kernel::Scheduler;
use tgmux_router::Router;
use tgmux_store::Registry;

/// Config fields the web layer itself needs — the rest of [`tgmux_cli`]'s
/// configuration (accounts, DB path, ports) stays in the CLI crate, which
/// is the only thing that constructs a [`GatewayConfig`].
#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    pub monitor_user: String,
    pub monitor_pass: String,
    pub salebot_callback_url: Option<String>,
    pub salebot_group_id: Option<String>,
    pub amo_observer_username: Option<String>,
    /// Wall-clock budget for create/send task submission (spec.md §5).
    pub create_send_timeout_secs: u64,
    /// Wall-clock budget for leave-chat task submission (spec.md §5).
    pub leave_timeout_secs: u64,
}

impl GatewayConfig {
    pub fn create_send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.create_send_timeout_secs)
    }

    pub fn leave_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.leave_timeout_secs)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
    pub registry: Registry,
    pub scheduler: Scheduler,
    pub config: Arc<GatewayConfig>,
    pub http: reqwest::Client,
}
