//! SQLite backend parity tests

mod common;

use agent_perflog::audit::{ChainVerifier, EntryKind, VerificationResult, GENESIS_HASH};
use agent_perflog::error::LogError;
use agent_perflog::settings::{AppConfig, BackendKind};
use agent_perflog::store::{LogRange, LogStore};
use chrono::{Duration, Utc};
use common::*;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_sqlite_scenario() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = open_sqlite_store(&db_path(&dir)).await;
    let builder = signed_builder();

    let decision = store
        .record(&builder, EntryKind::Decision, decision_payload(4.2))
        .await?;
    let trade = store
        .record(&builder, EntryKind::Trade, trade_payload(71000.0, None))
        .await?;
    let snapshot = store
        .record(&builder, EntryKind::Snapshot, snapshot_payload(12.5))
        .await?;

    assert_eq!(decision.sequence, 1);
    assert_eq!(decision.prev_hash, GENESIS_HASH);
    assert_eq!(trade.prev_hash, decision.hash);
    assert_eq!(snapshot.sequence, 3);

    let report = store
        .verify(LogRange::new(1, 4), &ChainVerifier::new())
        .await?;
    assert_eq!(report.result, VerificationResult::Valid);
    assert_eq!(store.read_range(1, 4).await?, vec![decision, trade, snapshot.clone()]);
    assert_eq!(store.latest_of_kind(EntryKind::Snapshot).await?, Some(snapshot));
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_sqlite_race_admits_one() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = Arc::new(open_sqlite_store(&db_path(&dir)).await);
    let builder = signed_builder();

    let tail = store.current_tail().await;
    let first = store
        .prepare(&builder, EntryKind::Decision, decision_payload(1.0), &tail.hash)
        .await?;
    let second = store
        .prepare(&builder, EntryKind::Decision, decision_payload(2.0), &tail.hash)
        .await?;

    let (a, b) = tokio::join!(store.append(first), store.append(second));
    assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
    assert!([&a, &b]
        .iter()
        .any(|r| matches!(r, Err(LogError::ChainConflict { .. }))));
    assert_eq!(store.len().await, 1);
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_sqlite_reopen_and_since() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);
    let builder = signed_builder();
    let before = Utc::now() - Duration::seconds(1);

    let head = {
        let store = open_sqlite_store(&path).await;
        for i in 0..3 {
            store
                .record(&builder, EntryKind::Decision, decision_payload(i as f64))
                .await?;
        }
        let head = store.current_tail().await;
        store.close().await;
        head
    };

    let store = open_sqlite_store(&path).await;
    assert!(store.recovery().is_clean());
    assert_eq!(store.current_tail().await.hash, head.hash);
    assert_eq!(store.since(before).await?.len(), 3);
    assert_eq!(store.tail(2).await?.len(), 2);
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_sqlite_damaged_tail_row_is_dropped() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);
    {
        let store = open_sqlite_store(&path).await;
        for i in 0..3 {
            store
                .record(&signed_builder(), EntryKind::Decision, decision_payload(i as f64))
                .await?;
        }
        store.close().await;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite://{}", path.display()))
        .await?;
    sqlx::query("UPDATE log_entries SET body = replace(body, '\"edge_bps\":2.0', '\"edge_bps\":2.5') WHERE sequence = 3")
        .execute(&pool)
        .await?;
    pool.close().await;

    let store = open_sqlite_store(&path).await;
    assert_eq!(store.recovery().discarded, 1);
    assert_eq!(store.len().await, 2);

    let next = store
        .record(&signed_builder(), EntryKind::Decision, decision_payload(7.0))
        .await?;
    assert_eq!(next.sequence, 3);
    assert!(store
        .verify(LogRange::through(3), &ChainVerifier::new())
        .await?
        .result
        .is_valid());
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_open_from_config_selects_backend() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let mut config = AppConfig::default();
    config.agent_id = "alpha".to_string();
    config.store.data_dir = dir.path().to_path_buf();
    config.store.backend = BackendKind::Sqlite;
    config.store.allow_unsigned = true;

    let store = LogStore::open(&config).await?;
    store
        .record(
            &agent_perflog::audit::EntryBuilder::unsigned(),
            EntryKind::Decision,
            decision_payload(1.0),
        )
        .await?;
    store.close().await;

    assert!(dir.path().join("alpha.db").exists());
    assert!(!dir.path().join("alpha.jsonl").exists());
    Ok(())
}
