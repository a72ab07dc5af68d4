//! Retry/reconnect wrapper around outbound protocol calls.
//!
//! Generalizes the teacher's `FailoverManager::try_failover` cooldown idiom
//! (`openintent-cli/src/failover.rs`) into a higher-order retry driver:
//! transient errors get a bounded number of reconnect-and-retry attempts,
//! flood waits and domain errors propagate immediately so the router can
//! decide whether to fail the call over to a different bridge.

use std::future::Future;
use std::time::Duration;

use tgmux_protocol::ProtocolError;

pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(2);
pub const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub reconnect_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
            reconnect_pause: RECONNECT_PAUSE,
        }
    }
}

/// What the retry loop should do after a failed attempt, decided by a
/// reconnect hook the bridge supplies (disconnect, pause, reconnect,
/// re-check authorization).
pub enum ReconnectOutcome {
    /// Reconnected and still authorized; retry the call.
    Recovered,
    /// Reconnected but the session lost authorization; fatal, stop retrying.
    Unauthorized,
}

/// Drive `attempt` up to `policy.max_retries` times. `attempt` performs one
/// protocol call; `reconnect` is invoked between attempts only when the
/// error was classified as locally retriable (transient network /
/// timestamp-outdated). Flood-wait and other domain errors are returned to
/// the caller immediately without consuming a retry.
pub async fn with_retry<T, F, Fut, R, RFut>(policy: RetryPolicy, mut attempt: F, mut reconnect: R) -> Result<T, ProtocolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProtocolError>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = ReconnectOutcome>,
{
    let mut last_err = None;
    for attempt_no in 0..=policy.max_retries {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_locally_retriable() => {
                last_err = Some(err);
                if attempt_no == policy.max_retries {
                    break;
                }
                tokio::time::sleep(policy.reconnect_pause).await;
                match reconnect().await {
                    ReconnectOutcome::Recovered => {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                    ReconnectOutcome::Unauthorized => {
                        return Err(ProtocolError::NotAuthorized);
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or(ProtocolError::Other("retry loop exhausted with no error".into())))
}
