//! Thin async wrapper over a single `rusqlite::Connection`.
//!
//! rusqlite is synchronous, so every call dispatches through
//! `tokio::task::spawn_blocking`; the connection itself lives behind a
//! `Mutex` since SQLite's WAL mode still serializes writers.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migration;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_and_migrate(path: impl AsRef<Path>) -> Result<Self> {
        let db = Self::open(path)?;
        db.migrate_blocking()?;
        Ok(db)
    }

    fn migrate_blocking(&self) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        migration::run_all(&conn)
    }

    /// Run a read-only closure against the connection on a blocking thread.
    pub async fn execute<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("db mutex poisoned");
            f(&guard)
        })
        .await?
    }

    /// Run a mutating closure against the connection on a blocking thread.
    pub async fn execute_mut<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().expect("db mutex poisoned");
            f(&mut guard)
        })
        .await?
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_and_migrate() {
        let db = Database::open_in_memory().unwrap();
        db.migrate_blocking().unwrap();
        let version = db
            .execute(|conn| Ok(migration::current_version(conn)?))
            .await
            .unwrap();
        assert_eq!(version, migration::MIGRATIONS.last().unwrap().version);
    }

    #[tokio::test]
    async fn execute_mut_persists_writes() {
        let db = Database::open_in_memory().unwrap();
        db.migrate_blocking().unwrap();
        db.execute_mut(|conn| {
            conn.execute(
                "INSERT INTO chat_assignments (chat_id, account_name, status, assigned_ts) VALUES (?1, ?2, 'active', 0)",
                rusqlite::params!["123", "main"],
            )
            .map_err(StoreError::from)?;
            Ok(())
        })
        .await
        .unwrap();

        let count: i64 = db
            .execute(|conn| {
                conn.query_row("SELECT COUNT(*) FROM chat_assignments", [], |row| row.get(0))
                    .map_err(StoreError::from)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    /// `open_and_migrate` against a real file, not `:memory:` — exercises
    /// the WAL pragma path and confirms writes survive a reopen.
    #[tokio::test]
    async fn open_and_migrate_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");

        let db = Database::open_and_migrate(&path).unwrap();
        db.execute_mut(|conn| {
            conn.execute(
                "INSERT INTO chat_assignments (chat_id, account_name, status, assigned_ts) VALUES (?1, ?2, 'active', 0)",
                rusqlite::params!["456", "main"],
            )
            .map_err(StoreError::from)?;
            Ok(())
        })
        .await
        .unwrap();
        drop(db);

        let reopened = Database::open_and_migrate(&path).unwrap();
        let count: i64 = reopened
            .execute(|conn| {
                conn.query_row("SELECT COUNT(*) FROM chat_assignments", [], |row| row.get(0))
                    .map_err(StoreError::from)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
