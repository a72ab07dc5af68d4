//! Integration tests for the tgmux-store crate.
//!
//! Exercises the registry's assignment, leave, and audit-log tables as
//! integrated subsystems backed by a real (in-memory) SQLite connection.

use std::sync::Arc;

use tgmux_store::{Database, Registry};

async fn registry() -> Registry {
    let db = Database::open_in_memory().unwrap();
    db.execute_mut(|conn| Ok(tgmux_store::migration::run_all(conn)?)).await.unwrap();
    Registry::new(db)
}

// ═══════════════════════════════════════════════════════════════════════
//  Uniqueness of active assignment
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn only_one_active_row_survives_repeated_reassignment() {
    let reg = registry().await;

    reg.assign("-1001", "main", Some("Chat".into()), None).await.unwrap();
    reg.assign("-1001", "b1", None, None).await.unwrap();
    reg.assign("-1001", "b2", None, None).await.unwrap();

    let rows = reg.get_all_assignments(100).await.unwrap();
    let for_chat: Vec<_> = rows.iter().filter(|r| r.chat_id == "-1001").collect();
    assert_eq!(for_chat.len(), 1, "re-assigning the same chat must upsert, not duplicate rows");
    assert_eq!(for_chat[0].account_name, "b2");
    assert_eq!(for_chat[0].status, "active");
}

// ═══════════════════════════════════════════════════════════════════════
//  Idempotent leave
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn marking_left_twice_leaves_exactly_one_left_row() {
    let reg = registry().await;
    reg.assign("-1002", "main", None, None).await.unwrap();

    reg.mark_left("-1002").await.unwrap();
    assert!(reg.is_left("-1002").await.unwrap());

    // Repeated leave is a no-op update, not a second row.
    reg.mark_left("-1002").await.unwrap();

    let rows = reg.get_all_assignments(100).await.unwrap();
    let for_chat: Vec<_> = rows.iter().filter(|r| r.chat_id == "-1002").collect();
    assert_eq!(for_chat.len(), 1);
    assert_eq!(for_chat[0].status, "left");

    // A left chat no longer resolves as an active owner.
    assert_eq!(reg.get_account("-1002").await.unwrap(), None);
}

// ═══════════════════════════════════════════════════════════════════════
//  Registry concurrency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn concurrent_operation_log_writes_do_not_lose_rows() {
    let reg = Arc::new(registry().await);

    let mut handles = Vec::with_capacity(64);
    for i in 0..64u32 {
        let reg = Arc::clone(&reg);
        handles.push(tokio::spawn(async move {
            reg.log_operation("main", &format!("-100{i}"), "send_text", "ok", None).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let rows = reg.get_recent_operations(1000).await.unwrap();
    assert_eq!(rows.len(), 64, "all 64 concurrent writers must be durably recorded");
}
