//! Integration tests for the transaction coordinator.

mod common;

use common::{Script, coordinator, eventually};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use taskflow_db::config::TransactionConfig;
use taskflow_db::db::{IsolationLevel, PoolStats, TransactionCoordinator, TransactionOptions};
use taskflow_db::error::DbError;
use taskflow_db::models::{DatabaseType, TransactionState};

fn fast_retries(max_retries: u32) -> TransactionConfig {
    TransactionConfig {
        max_retries,
        retry_backoff: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_begin_commit_releases_connection() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;

    let ctx = txns
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    assert!(ctx.id().starts_with("tx_"));
    assert_eq!(ctx.state().await, TransactionState::Active);
    assert_eq!(txns.active_count(), 1);

    ctx.execute("INSERT INTO tasks (title) VALUES ($1)", &["write docs".into()])
        .await
        .unwrap();
    ctx.commit().await.unwrap();

    assert_eq!(txns.active_count(), 0);
    assert_eq!(
        script.statements(),
        vec!["BEGIN", "INSERT INTO tasks (title) VALUES ($1)", "COMMIT"]
    );
}

#[tokio::test]
async fn test_isolation_level_statement_order() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    let options = TransactionOptions::default().with_isolation(IsolationLevel::Serializable);
    let ctx = txns.begin_transaction(options).await.unwrap();
    ctx.rollback().await.unwrap();
    assert_eq!(
        script.statements(),
        vec!["BEGIN", "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE", "ROLLBACK"]
    );

    let script = Script::new(DatabaseType::MySQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    let options = TransactionOptions::default().with_isolation(IsolationLevel::ReadCommitted);
    let ctx = txns.begin_transaction(options).await.unwrap();
    ctx.commit().await.unwrap();
    assert_eq!(
        script.statements(),
        vec![
            "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            "START TRANSACTION",
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn test_savepoint_stack() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    let ctx = txns
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();

    for name in ["s1", "s2", "s3"] {
        ctx.savepoint(Some(name)).await.unwrap();
    }
    assert_eq!(txns.list_transactions()[0].savepoint_depth, 3);

    ctx.rollback_to_savepoint("s1").await.unwrap();
    assert_eq!(ctx.savepoints().await, vec!["s1"]);
    assert_eq!(txns.list_transactions()[0].savepoint_depth, 1);

    let generated = ctx.savepoint(None).await.unwrap();
    assert_eq!(generated, "sp_1");
    ctx.release_savepoint("s1").await.unwrap();
    assert!(ctx.savepoints().await.is_empty());

    ctx.commit().await.unwrap();
    assert!(script.statements().contains(&"ROLLBACK TO SAVEPOINT s1".to_string()));
    assert!(script.statements().contains(&"RELEASE SAVEPOINT s1".to_string()));
}

#[tokio::test]
async fn test_unknown_savepoint_does_not_touch_connection() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    let ctx = txns
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    let before = script.statements().len();

    let err = ctx.rollback_to_savepoint("missing").await.unwrap_err();
    assert!(matches!(err, DbError::TransactionState { .. }));
    let err = ctx.savepoint(Some("bad name;")).await.unwrap_err();
    assert!(matches!(err, DbError::TransactionState { .. }));

    assert_eq!(script.statements().len(), before);
    ctx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_operations_on_ended_transaction_fail() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    let ctx = txns
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    let handle = ctx.handle();
    txns.commit_transaction(ctx).await.unwrap();
    let before = script.statements().len();

    assert_eq!(handle.state().await, TransactionState::Committed);
    assert!(matches!(
        handle.execute("SELECT 1", &[]).await,
        Err(DbError::TransactionState { .. })
    ));
    assert!(handle.savepoint(None).await.is_err());
    assert_eq!(script.statements().len(), before);
}

#[tokio::test]
async fn test_commit_failure_rolls_back_on_same_connection() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    script.fail_commit.store(true, Ordering::SeqCst);

    let ctx = txns
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    let handle = ctx.handle();
    ctx.execute("UPDATE tasks SET done = true", &[]).await.unwrap();

    let err = txns.commit_transaction(ctx).await.unwrap_err();
    match err {
        DbError::Statement { message, .. } => assert!(message.contains("could not commit")),
        other => panic!("expected the commit error, got {other}"),
    }

    let conn = script.conn_of("COMMIT").unwrap();
    assert_eq!(script.conn_of("ROLLBACK"), Some(conn));
    let on_conn = script.statements_on(conn);
    assert_eq!(&on_conn[on_conn.len() - 2..], ["COMMIT", "ROLLBACK"]);

    assert_eq!(handle.state().await, TransactionState::RolledBack);
    assert_eq!(txns.active_count(), 0);
    assert_eq!(txns_pool_active(&txns), 0);
}

#[tokio::test]
async fn test_failed_rollback_after_commit_failure_propagates() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    script.fail_commit.store(true, Ordering::SeqCst);
    script.fail_rollback.store(true, Ordering::SeqCst);

    let ctx = txns
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    let err = ctx.commit().await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));

    // the broken connection was destroyed rather than returned
    assert_eq!(script.closes(), 1);
    assert_eq!(txns_pool_active(&txns), 0);
}

#[tokio::test]
async fn test_rollback_is_idempotent() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    let options = TransactionOptions::default().with_timeout(Duration::from_millis(20));
    let ctx = txns.begin_transaction(options).await.unwrap();

    assert!(
        eventually(Duration::from_secs(1), || txns.active_count() == 0).await,
        "timeout should deregister the transaction"
    );
    let rollbacks = script
        .statements()
        .iter()
        .filter(|s| *s == "ROLLBACK")
        .count();

    ctx.rollback().await.unwrap();
    let after = script
        .statements()
        .iter()
        .filter(|s| *s == "ROLLBACK")
        .count();
    assert_eq!(rollbacks, after);
}

#[tokio::test]
async fn test_timeout_rolls_back() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    let options = TransactionOptions::default().with_timeout(Duration::from_millis(50));
    let ctx = txns.begin_transaction(options).await.unwrap();
    assert_eq!(txns.list_transactions()[0].timeout_ms, Some(50));

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(ctx.state().await, TransactionState::TimedOut);
    assert_eq!(txns.active_count(), 0);
    assert!(matches!(
        ctx.execute("SELECT 1", &[]).await,
        Err(DbError::TransactionState { .. })
    ));
    assert!(ctx.commit().await.is_err());
    assert_eq!(txns_pool_active(&txns), 0);
}

#[tokio::test]
async fn test_execute_in_transaction_commits() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;

    let id = txns
        .execute_in_transaction(
            |tx| async move {
                tx.execute("INSERT INTO projects (name) VALUES ('alpha')", &[])
                    .await?;
                Ok::<_, DbError>(tx.id().to_string())
            },
            TransactionOptions::default(),
        )
        .await
        .unwrap();

    assert!(id.starts_with("tx_"));
    assert_eq!(script.statements().last().map(String::as_str), Some("COMMIT"));
    assert_eq!(txns.active_count(), 0);
}

#[tokio::test]
async fn test_execute_in_transaction_rolls_back_on_error() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;

    let result: Result<(), DbError> = txns
        .execute_in_transaction(
            |tx| async move {
                tx.execute("INSERT INTO tasks (title) VALUES ('a')", &[]).await?;
                tx.execute("INSERT INTO tasks (title) VALUES ('b')", &[]).await?;
                Err(DbError::aborted("assignee not found"))
            },
            TransactionOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(DbError::Aborted { ref reason }) if reason == "assignee not found"));
    assert_eq!(script.statements().last().map(String::as_str), Some("ROLLBACK"));
    assert!(!script.statements().contains(&"COMMIT".to_string()));

    let stats = txns_pool_stats(&txns);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, stats.total);
}

#[tokio::test]
async fn test_serialization_failures_are_retried() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, fast_retries(2)).await;
    let attempts = Arc::new(AtomicU32::new(0));

    let value = txns
        .execute_in_transaction(
            |tx| {
                let attempts = Arc::clone(&attempts);
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    tx.execute("UPDATE tasks SET version = version + 1", &[])
                        .await?;
                    if n < 3 {
                        return Err(DbError::statement(
                            "could not serialize access",
                            Some("40001".to_string()),
                        ));
                    }
                    Ok(n)
                }
            },
            TransactionOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(value, 3);
    let statements = script.statements();
    assert_eq!(statements.iter().filter(|s| *s == "BEGIN").count(), 3);
    assert_eq!(statements.iter().filter(|s| *s == "ROLLBACK").count(), 2);
    assert_eq!(statements.iter().filter(|s| *s == "COMMIT").count(), 1);
}

#[tokio::test]
async fn test_retries_are_capped_and_skip_other_errors() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, fast_retries(1)).await;
    let attempts = Arc::new(AtomicU32::new(0));

    let result: Result<(), DbError> = txns
        .execute_in_transaction(
            |_tx| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(DbError::statement("deadlock detected", Some("40P01".to_string())))
                }
            },
            TransactionOptions::default(),
        )
        .await;
    assert!(result.unwrap_err().retry_reason().is_some());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    attempts.store(0, Ordering::SeqCst);
    let result: Result<(), DbError> = txns
        .execute_in_transaction(
            |_tx| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(DbError::invalid_input("title must not be empty"))
                }
            },
            TransactionOptions::default().with_max_retries(5),
        )
        .await;
    assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropped_context_rolls_back() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;

    {
        let ctx = txns
            .begin_transaction(TransactionOptions::default())
            .await
            .unwrap();
        ctx.execute("DELETE FROM tasks", &[]).await.unwrap();
    }

    assert!(eventually(Duration::from_secs(1), || txns.active_count() == 0).await);
    assert!(
        eventually(Duration::from_secs(1), || {
            script.statements().last().map(String::as_str) == Some("ROLLBACK")
        })
        .await
    );
}

#[tokio::test]
async fn test_rollback_all() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;

    let first = txns
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    let second = txns
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    assert_eq!(txns.list_transactions().len(), 2);

    assert_eq!(txns.rollback_all().await, 2);
    assert_eq!(txns.active_count(), 0);
    assert_eq!(first.state().await, TransactionState::RolledBack);
    assert_eq!(second.state().await, TransactionState::RolledBack);

    // contexts finishing afterwards are no-ops
    first.rollback().await.unwrap();
    second.rollback().await.unwrap();
}

#[tokio::test]
async fn test_failed_rollback_still_releases_and_deregisters() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;

    let ctx = txns
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    let handle = ctx.handle();
    ctx.execute("DELETE FROM tasks WHERE id = 3", &[]).await.unwrap();

    script.fail_rollback.store(true, Ordering::SeqCst);
    let err = txns.rollback_transaction(ctx).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));

    assert_eq!(handle.state().await, TransactionState::RolledBack);
    assert_eq!(txns.active_count(), 0);
    assert!(txns.list_transactions().is_empty());
    assert_eq!(txns_pool_active(&txns), 0);
    assert_eq!(script.closes(), 1);
    assert!(matches!(
        handle.execute("SELECT 1", &[]).await,
        Err(DbError::TransactionState { .. })
    ));
}

#[tokio::test]
async fn test_work_error_wins_over_rollback_error() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    script.fail_rollback.store(true, Ordering::SeqCst);

    let result: Result<(), DbError> = txns
        .execute_in_transaction(
            |tx| async move {
                tx.execute("INSERT INTO tasks (title) VALUES ('late')", &[]).await?;
                Err(DbError::aborted("due date is in the past"))
            },
            TransactionOptions::default(),
        )
        .await;

    assert!(
        matches!(result, Err(DbError::Aborted { ref reason }) if reason == "due date is in the past")
    );
    assert_eq!(script.statements().last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(txns.active_count(), 0);
    assert_eq!(txns_pool_active(&txns), 0);
    assert_eq!(script.closes(), 1);
}

#[tokio::test]
async fn test_failed_isolation_statement_releases_connection() {
    let script = Script::new(DatabaseType::PostgreSQL);
    let txns = coordinator(&script, TransactionConfig::default()).await;
    script.fail_isolation.store(true, Ordering::SeqCst);
    let options = TransactionOptions::default().with_isolation(IsolationLevel::Serializable);

    let err = txns.begin_transaction(options.clone()).await.unwrap_err();
    assert!(matches!(err, DbError::Statement { ref message, .. } if message.contains("isolation")));
    assert_eq!(
        script.statements(),
        vec!["BEGIN", "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE", "ROLLBACK"]
    );
    // cleaned up, so the connection goes back to the pool
    assert_eq!(script.closes(), 0);
    assert_eq!(txns_pool_active(&txns), 0);

    // when the cleanup rollback fails too, the connection is destroyed
    script.fail_rollback.store(true, Ordering::SeqCst);
    let err = txns.begin_transaction(options).await.unwrap_err();
    assert!(matches!(err, DbError::Statement { .. }));
    assert_eq!(script.closes(), 1);
    assert_eq!(txns.active_count(), 0);
    assert_eq!(txns_pool_active(&txns), 0);
}

fn txns_pool_stats(txns: &TransactionCoordinator) -> PoolStats {
    txns.pool().stats()
}

fn txns_pool_active(txns: &TransactionCoordinator) -> u32 {
    txns_pool_stats(txns).active
}
