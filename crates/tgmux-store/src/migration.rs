//! Versioned schema migrations, applied transactionally and tracked in a
//! `_migrations` bookkeeping table so the registry can be upgraded in place
//! instead of relying on `CREATE TABLE IF NOT EXISTS` everywhere.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "chat_assignments + operations_log",
        sql: "
            CREATE TABLE chat_assignments (
                chat_id         TEXT PRIMARY KEY,
                account_name    TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'active',
                title           TEXT,
                assigned_ts     INTEGER NOT NULL,
                last_active_ts  INTEGER
            );
            CREATE INDEX idx_chat_assignments_account ON chat_assignments(account_name);
            CREATE INDEX idx_chat_assignments_status ON chat_assignments(status);

            CREATE TABLE operations_log (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                account_name    TEXT NOT NULL,
                chat_id         TEXT NOT NULL,
                operation       TEXT NOT NULL,
                status          TEXT NOT NULL,
                detail          TEXT,
                ts              INTEGER NOT NULL
            );
            CREATE INDEX idx_operations_log_ts ON operations_log(ts);
            CREATE INDEX idx_operations_log_account ON operations_log(account_name);
        ",
    },
    Migration {
        version: 2,
        description: "failover_log",
        sql: "
            CREATE TABLE failover_log (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id         TEXT NOT NULL,
                from_account    TEXT NOT NULL,
                to_account      TEXT NOT NULL,
                reason          TEXT,
                ts              INTEGER NOT NULL
            );
            CREATE INDEX idx_failover_log_ts ON failover_log(ts);
        ",
    },
    Migration {
        version: 3,
        description: "failed_requests",
        sql: "
            CREATE TABLE failed_requests (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                service         TEXT NOT NULL,
                payload         TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending',
                error           TEXT,
                retry_count     INTEGER NOT NULL DEFAULT 0,
                created_ts      INTEGER NOT NULL,
                last_retry_ts   INTEGER
            );
            CREATE INDEX idx_failed_requests_status ON failed_requests(status);
        ",
    },
    Migration {
        version: 4,
        description: "invite_link on chat_assignments",
        sql: "
            ALTER TABLE chat_assignments ADD COLUMN invite_link TEXT;
        ",
    },
    Migration {
        version: 5,
        description: "direction/endpoint/last_retry_error on failed_requests",
        sql: "
            ALTER TABLE failed_requests ADD COLUMN direction TEXT NOT NULL DEFAULT 'inbound';
            ALTER TABLE failed_requests ADD COLUMN endpoint TEXT;
            ALTER TABLE failed_requests ADD COLUMN last_retry_error TEXT;
        ",
    },
];

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_ts  INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i32> {
    ensure_migrations_table(conn)?;
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
        .unwrap_or(None);
    Ok(version.unwrap_or(0))
}

fn apply(conn: &mut Connection, migration: &Migration) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
        .map_err(StoreError::from)?;
    tx.execute_batch(migration.sql).map_err(|e| StoreError::Migration {
        version: migration.version,
        message: e.to_string(),
    })?;
    tx.execute(
        "INSERT INTO _migrations (version, description, applied_ts) VALUES (?1, ?2, strftime('%s','now'))",
        rusqlite::params![migration.version, migration.description],
    )
    .map_err(StoreError::from)?;
    tx.commit().map_err(StoreError::from)?;
    Ok(())
}

pub fn run_all(conn: &mut Connection) -> Result<()> {
    ensure_migrations_table(conn)?;
    let current = current_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(conn, migration)?;
    }
    Ok(())
}
