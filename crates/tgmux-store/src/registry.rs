//! Chat-account registry: durable ownership of which account a chat belongs
//! to, plus the audit trail (operations, failovers, failed downstream
//! callbacks) that the admin dashboard and janitor read back.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Database;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAssignment {
    pub chat_id: String,
    pub account_name: String,
    pub status: String,
    pub title: Option<String>,
    pub invite_link: Option<String>,
    pub assigned_ts: i64,
    pub last_active_ts: Option<i64>,
}

/// Batches passed to `WHERE chat_id IN (...)` must stay under SQLite's
/// default bound-parameter limit (999); the registry chunks at a generous
/// margin below that, matching the 500-row chunking `core/registry.py`
/// did for `get_chat_titles`.
const CHAT_ID_QUERY_CHUNK: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub account_name: String,
    pub chat_id: String,
    pub operation: String,
    pub status: String,
    pub detail: Option<String>,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverLogEntry {
    pub chat_id: String,
    pub from_account: String,
    pub to_account: String,
    pub reason: Option<String>,
    pub ts: i64,
}

/// Which side of the gateway originated the request that failed: `inbound`
/// for an HTTP request this process received and couldn't satisfy on any
/// bridge, `outbound` for a callback POST this process tried to send
/// downstream (spec.md §3, §4.5.1 step 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestDirection {
    Inbound,
    Outbound,
}

impl RequestDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestDirection::Inbound => "inbound",
            RequestDirection::Outbound => "outbound",
        }
    }
}

impl std::str::FromStr for RequestDirection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inbound" => Ok(RequestDirection::Inbound),
            "outbound" => Ok(RequestDirection::Outbound),
            other => Err(StoreError::InvalidArgument(format!("unknown request direction: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRequest {
    pub id: i64,
    pub service: String,
    pub direction: RequestDirection,
    pub endpoint: Option<String>,
    pub payload: Value,
    pub status: String,
    pub error: Option<String>,
    pub retry_count: i64,
    pub created_ts: i64,
    pub last_retry_ts: Option<i64>,
    pub last_retry_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryStats {
    pub active_assignments: i64,
    pub total_operations: i64,
    pub total_failovers: i64,
    pub pending_failed_requests: i64,
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Thin, cloneable facade over [`Database`] exposing the registry's CRUD and
/// reporting surface. Every method matches an operation `core/registry.py`
/// performed with raw SQL under `threading.local()` connections; here each
/// call instead dispatches onto a blocking task against the shared,
/// WAL-mode connection.
#[derive(Clone)]
pub struct Registry {
    db: Database,
}

impl Registry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn assign(
        &self,
        chat_id: &str,
        account_name: &str,
        title: Option<String>,
        invite_link: Option<String>,
    ) -> Result<()> {
        let chat_id = chat_id.to_string();
        let account_name = account_name.to_string();
        let ts = now_ts();
        self.db
            .execute_mut(move |conn| {
                conn.execute(
                    "INSERT INTO chat_assignments (chat_id, account_name, status, title, invite_link, assigned_ts, last_active_ts)
                     VALUES (?1, ?2, 'active', ?3, ?4, ?5, ?5)
                     ON CONFLICT(chat_id) DO UPDATE SET
                        account_name = excluded.account_name,
                        status = 'active',
                        title = COALESCE(excluded.title, chat_assignments.title),
                        invite_link = COALESCE(excluded.invite_link, chat_assignments.invite_link),
                        last_active_ts = excluded.last_active_ts",
                    params![chat_id, account_name, title, invite_link, ts],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    /// Insert a row only if `chat_id` is entirely absent (active or left).
    /// Used by dialog-cache sync to backfill assignments discovered via
    /// warmup without clobbering an existing, possibly-failed-over, owner.
    pub async fn assign_if_not_exists(
        &self,
        chat_id: &str,
        account_name: &str,
        title: Option<String>,
        created_at: Option<i64>,
    ) -> Result<bool> {
        let chat_id = chat_id.to_string();
        let account_name = account_name.to_string();
        let ts = created_at.unwrap_or_else(now_ts);
        self.db
            .execute_mut(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO chat_assignments (chat_id, account_name, status, title, assigned_ts, last_active_ts)
                     VALUES (?1, ?2, 'active', ?3, ?4, ?4)
                     ON CONFLICT(chat_id) DO NOTHING",
                    params![chat_id, account_name, title, ts],
                )
                .map_err(StoreError::from)?;
                Ok(changed > 0)
            })
            .await
    }

    pub async fn get_account(&self, chat_id: &str) -> Result<Option<String>> {
        let chat_id = chat_id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT account_name FROM chat_assignments WHERE chat_id = ?1 AND status != 'left'",
                    [&chat_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await
    }

    pub async fn update_account(&self, chat_id: &str, account_name: &str) -> Result<()> {
        let chat_id = chat_id.to_string();
        let account_name = account_name.to_string();
        let ts = now_ts();
        self.db
            .execute_mut(move |conn| {
                conn.execute(
                    "UPDATE chat_assignments SET account_name = ?2, last_active_ts = ?3 WHERE chat_id = ?1",
                    params![chat_id, account_name, ts],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    pub async fn mark_left(&self, chat_id: &str) -> Result<()> {
        let chat_id = chat_id.to_string();
        self.db
            .execute_mut(move |conn| {
                conn.execute(
                    "UPDATE chat_assignments SET status = 'left' WHERE chat_id = ?1",
                    [&chat_id],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    pub async fn is_left(&self, chat_id: &str) -> Result<bool> {
        let chat_id = chat_id.to_string();
        let status: Option<String> = self
            .db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT status FROM chat_assignments WHERE chat_id = ?1",
                    [&chat_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;
        Ok(status.as_deref() == Some("left"))
    }

    pub async fn get_all_assignments(&self, limit: i64) -> Result<Vec<ChatAssignment>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chat_id, account_name, status, title, invite_link, assigned_ts, last_active_ts
                     FROM chat_assignments ORDER BY assigned_ts DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], row_to_assignment)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(StoreError::from)?;
                Ok(rows)
            })
            .await
    }

    /// Titles for a subset of chats (or all chats when `ids` is `None`),
    /// chunked so the `IN (...)` clause never exceeds SQLite's bound
    /// parameter limit.
    pub async fn get_chat_titles(&self, ids: Option<&[String]>) -> Result<Vec<(String, Option<String>)>> {
        match ids {
            None => {
                self.db
                    .execute(|conn| {
                        let mut stmt =
                            conn.prepare("SELECT chat_id, title FROM chat_assignments")?;
                        let rows = stmt
                            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                            .collect::<std::result::Result<Vec<_>, _>>()
                            .map_err(StoreError::from)?;
                        Ok(rows)
                    })
                    .await
            }
            Some(ids) => {
                let mut out = Vec::with_capacity(ids.len());
                for chunk in ids.chunks(CHAT_ID_QUERY_CHUNK) {
                    let chunk = chunk.to_vec();
                    let rows = self
                        .db
                        .execute(move |conn| {
                            let placeholders = vec!["?"; chunk.len()].join(",");
                            let sql = format!(
                                "SELECT chat_id, title FROM chat_assignments WHERE chat_id IN ({placeholders})"
                            );
                            let mut stmt = conn.prepare(&sql)?;
                            let params = rusqlite::params_from_iter(chunk.iter());
                            let rows = stmt
                                .query_map(params, |row| Ok((row.get(0)?, row.get(1)?)))?
                                .collect::<std::result::Result<Vec<_>, _>>()
                                .map_err(StoreError::from)?;
                            Ok(rows)
                        })
                        .await?;
                    out.extend(rows);
                }
                Ok(out)
            }
        }
    }

    pub async fn get_active_count(&self) -> Result<i64> {
        self.db
            .execute(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM chat_assignments WHERE status = 'active'",
                    [],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)
            })
            .await
    }

    /// Active-chat count per account, the raw material the balancer's
    /// least-loaded selection reads.
    pub async fn get_account_chat_counts(&self) -> Result<Vec<(String, i64)>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT account_name, COUNT(*) FROM chat_assignments
                     WHERE status = 'active' GROUP BY account_name",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(StoreError::from)?;
                Ok(rows)
            })
            .await
    }

    pub async fn log_operation(
        &self,
        account_name: &str,
        chat_id: &str,
        operation: &str,
        status: &str,
        detail: Option<String>,
    ) -> Result<()> {
        let account_name = account_name.to_string();
        let chat_id = chat_id.to_string();
        let operation = operation.to_string();
        let status = status.to_string();
        let ts = now_ts();
        self.db
            .execute_mut(move |conn| {
                conn.execute(
                    "INSERT INTO operations_log (account_name, chat_id, operation, status, detail, ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![account_name, chat_id, operation, status, detail, ts],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    pub async fn get_recent_operations(&self, limit: i64) -> Result<Vec<OperationLogEntry>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT account_name, chat_id, operation, status, detail, ts
                     FROM operations_log ORDER BY ts DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], |row| {
                        Ok(OperationLogEntry {
                            account_name: row.get(0)?,
                            chat_id: row.get(1)?,
                            operation: row.get(2)?,
                            status: row.get(3)?,
                            detail: row.get(4)?,
                            ts: row.get(5)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(StoreError::from)?;
                Ok(rows)
            })
            .await
    }

    pub async fn log_failover(
        &self,
        chat_id: &str,
        from_account: &str,
        to_account: &str,
        reason: &str,
    ) -> Result<()> {
        let chat_id_s = chat_id.to_string();
        let from_account = from_account.to_string();
        let to_account = to_account.to_string();
        let reason = reason.to_string();
        let ts = now_ts();
        tracing::warn!(chat_id = %chat_id, from_account = %from_account, to_account = %to_account, reason = %reason, "failover");
        self.db
            .execute_mut(move |conn| {
                conn.execute(
                    "INSERT INTO failover_log (chat_id, from_account, to_account, reason, ts)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![chat_id_s, from_account, to_account, reason, ts],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    pub async fn get_failover_log(&self, limit: i64) -> Result<Vec<FailoverLogEntry>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chat_id, from_account, to_account, reason, ts
                     FROM failover_log ORDER BY ts DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], |row| {
                        Ok(FailoverLogEntry {
                            chat_id: row.get(0)?,
                            from_account: row.get(1)?,
                            to_account: row.get(2)?,
                            reason: row.get(3)?,
                            ts: row.get(4)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(StoreError::from)?;
                Ok(rows)
            })
            .await
    }

    pub async fn save_failed_request(
        &self,
        service: &str,
        direction: RequestDirection,
        endpoint: Option<&str>,
        payload: &Value,
        error: &str,
    ) -> Result<i64> {
        let service = service.to_string();
        let direction = direction.as_str();
        let endpoint = endpoint.map(str::to_string);
        let payload_json = serde_json::to_string(payload)?;
        let error = error.to_string();
        let ts = now_ts();
        self.db
            .execute_mut(move |conn| {
                conn.execute(
                    "INSERT INTO failed_requests (service, direction, endpoint, payload, status, error, retry_count, created_ts)
                     VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 0, ?6)",
                    params![service, direction, endpoint, payload_json, error, ts],
                )
                .map_err(StoreError::from)?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    pub async fn get_failed_requests(&self, limit: i64) -> Result<Vec<FailedRequest>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, service, direction, endpoint, payload, status, error, retry_count, created_ts, last_retry_ts, last_retry_error
                     FROM failed_requests WHERE status = 'pending' ORDER BY created_ts ASC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], row_to_failed_request)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(StoreError::from)?;
                Ok(rows)
            })
            .await
    }

    pub async fn get_failed_request_by_id(&self, id: i64) -> Result<Option<FailedRequest>> {
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT id, service, direction, endpoint, payload, status, error, retry_count, created_ts, last_retry_ts, last_retry_error
                     FROM failed_requests WHERE id = ?1",
                    [id],
                    row_to_failed_request,
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await
    }

    /// Transition a failed request to `status` after a retry attempt,
    /// recording the retry's own error (if any) separately from the
    /// original failure's `error` column.
    pub async fn update_failed_request(&self, id: i64, status: &str, last_retry_error: Option<String>) -> Result<()> {
        let status = status.to_string();
        let ts = now_ts();
        self.db
            .execute_mut(move |conn| {
                conn.execute(
                    "UPDATE failed_requests SET status = ?2, last_retry_error = ?3,
                        retry_count = retry_count + 1, last_retry_ts = ?4
                     WHERE id = ?1",
                    params![id, status, last_retry_error, ts],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    pub async fn delete_failed_request(&self, id: i64) -> Result<()> {
        self.db
            .execute_mut(move |conn| {
                conn.execute("DELETE FROM failed_requests WHERE id = ?1", [id])
                    .map_err(StoreError::from)?;
                Ok(())
            })
            .await
    }

    pub async fn get_failed_requests_count(&self) -> Result<i64> {
        self.db
            .execute(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM failed_requests WHERE status = 'pending'",
                    [],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)
            })
            .await
    }

    pub async fn get_stats(&self) -> Result<RegistryStats> {
        self.db
            .execute(|conn| {
                let active_assignments = conn.query_row(
                    "SELECT COUNT(*) FROM chat_assignments WHERE status = 'active'",
                    [],
                    |row| row.get(0),
                )?;
                let total_operations = conn.query_row("SELECT COUNT(*) FROM operations_log", [], |row| row.get(0))?;
                let total_failovers = conn.query_row("SELECT COUNT(*) FROM failover_log", [], |row| row.get(0))?;
                let pending_failed_requests = conn.query_row(
                    "SELECT COUNT(*) FROM failed_requests WHERE status = 'pending'",
                    [],
                    |row| row.get(0),
                )?;
                Ok(RegistryStats {
                    active_assignments,
                    total_operations,
                    total_failovers,
                    pending_failed_requests,
                })
            })
            .await
    }

    /// Delete operation/failover log rows and non-pending failed requests
    /// older than `days`. Run daily by the janitor background task.
    pub async fn cleanup_old_logs(&self, days: i64) -> Result<(usize, usize, usize)> {
        let cutoff = now_ts() - days * 86_400;
        self.db
            .execute_mut(move |conn| {
                let ops = conn.execute("DELETE FROM operations_log WHERE ts < ?1", [cutoff])?;
                let failovers = conn.execute("DELETE FROM failover_log WHERE ts < ?1", [cutoff])?;
                let failed = conn.execute(
                    "DELETE FROM failed_requests WHERE status != 'pending' AND created_ts < ?1",
                    [cutoff],
                )?;
                Ok((ops, failovers, failed))
            })
            .await
    }
}

fn row_to_assignment(row: &rusqlite::Row) -> rusqlite::Result<ChatAssignment> {
    Ok(ChatAssignment {
        chat_id: row.get(0)?,
        account_name: row.get(1)?,
        status: row.get(2)?,
        title: row.get(3)?,
        invite_link: row.get(4)?,
        assigned_ts: row.get(5)?,
        last_active_ts: row.get(6)?,
    })
}

fn row_to_failed_request(row: &rusqlite::Row) -> rusqlite::Result<FailedRequest> {
    let payload_raw: String = row.get(4)?;
    let payload: Value = serde_json::from_str(&payload_raw).unwrap_or(Value::Null);
    let direction_raw: String = row.get(2)?;
    let direction = direction_raw.parse().unwrap_or(RequestDirection::Inbound);
    Ok(FailedRequest {
        id: row.get(0)?,
        service: row.get(1)?,
        direction,
        endpoint: row.get(3)?,
        payload,
        status: row.get(5)?,
        error: row.get(6)?,
        retry_count: row.get(7)?,
        created_ts: row.get(8)?,
        last_retry_ts: row.get(9)?,
        last_retry_error: row.get(10)?,
    })
}
