//! Daily sweep that deletes stale audit rows, owned and spawned by the CLI
//! at startup rather than by the registry itself so tests can exercise
//! `Registry::cleanup_old_logs` without a background loop running.

use std::time::Duration;

use crate::registry::Registry;

pub const RETENTION_DAYS: i64 = 30;
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub async fn run(registry: Registry) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        match registry.cleanup_old_logs(RETENTION_DAYS).await {
            Ok((ops, failovers, failed)) => {
                tracing::info!(ops, failovers, failed, "janitor: cleaned old registry rows");
            }
            Err(err) => {
                tracing::warn!(error = %err, "janitor: cleanup failed");
            }
        }
    }
}
