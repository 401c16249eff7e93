#![allow(dead_code)]

use agent_perflog::audit::EntryBuilder;
use agent_perflog::crypto::AgentSigner;
use agent_perflog::store::{LogStore, StoreOptions};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Deterministic key so signer hex is stable across tests
pub fn test_signer() -> AgentSigner {
    AgentSigner::from_hex(&"3b".repeat(32)).expect("valid test key")
}

pub fn signed_builder() -> EntryBuilder {
    EntryBuilder::signed(test_signer())
}

pub fn test_options() -> StoreOptions {
    StoreOptions {
        sync_writes: false,
        ..StoreOptions::default()
    }
}

pub fn unsigned_options() -> StoreOptions {
    StoreOptions {
        allow_unsigned: true,
        ..test_options()
    }
}

pub fn log_path(dir: &TempDir) -> PathBuf {
    dir.path().join("agent-test.jsonl")
}

pub fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("agent-test.db")
}

pub async fn open_file_store(path: &Path) -> LogStore {
    LogStore::open_file(path, test_options())
        .await
        .expect("Failed to open file store")
}

pub async fn open_sqlite_store(path: &Path) -> LogStore {
    LogStore::open_sqlite(path, test_options())
        .await
        .expect("Failed to open SQLite store")
}

pub fn decision_payload(edge_bps: f64) -> Value {
    json!({
        "symbol": "BTC",
        "action": "no_trade",
        "edge_bps": edge_bps,
        "target_edge_bps": 8.0,
        "funding_rate": 0.0001,
        "reason": "edge below target"
    })
}

pub fn trade_payload(price: f64, realized_pnl: Option<f64>) -> Value {
    let mut payload = json!({
        "symbol": "BTC",
        "side": "buy",
        "size": 0.1,
        "price": price,
        "fee": 3.55,
        "order_id": "oid-1"
    });
    if let Some(pnl) = realized_pnl {
        payload["side"] = json!("sell");
        payload["realized_pnl"] = json!(pnl);
    }
    payload
}

pub fn snapshot_payload(cumulative_pnl: f64) -> Value {
    json!({
        "account_value": 10250.0,
        "margin_used": 1200.0,
        "open_positions": [{
            "symbol": "BTC",
            "size": 0.1,
            "entry_price": 71000.0,
            "mark_price": 71250.0,
            "unrealized_pnl": 25.0,
            "leverage": 3.0
        }],
        "cumulative_pnl": cumulative_pnl,
        "drawdown": 0.02,
        "window_hours": 24.0
    })
}
