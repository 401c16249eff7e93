//! Embedded SQLite backend.
//!
//! Each entry is one row keyed by its sequence; the full JSON form is kept in
//! `body` so reads decode exactly what the file backend would.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audit::entry::LogEntry;
use crate::audit::payload::EntryKind;
use crate::error::{LogError, Result};
use crate::store::recovery::{self, RawRecord, RecoveryReport};

pub struct SqliteLog {
    pool: SqlitePool,
}

impl SqliteLog {
    pub async fn open(
        path: &Path,
        sync_writes: bool,
        tolerance: usize,
        busy_timeout: Duration,
    ) -> Result<(Self, RecoveryReport)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(if sync_writes {
                SqliteSynchronous::Full
            } else {
                SqliteSynchronous::Normal
            })
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let log = Self { pool };
        log.run_migrations().await?;
        let report = log.recover(tolerance).await?;
        info!("Opened SQLite log {:?} with {} entries", path, report.kept);
        Ok((log, report))
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_log_entries.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop a damaged suffix. Rows commit atomically, so only rows whose body
    /// no longer decodes or hashes can be found here.
    async fn recover(&self, tolerance: usize) -> Result<RecoveryReport> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM log_entries")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;

        let rows = sqlx::query(
            "SELECT sequence, body FROM log_entries ORDER BY sequence DESC LIMIT ?",
        )
        .bind(tolerance as i64 + 1)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            let sequence: i64 = row.try_get("sequence")?;
            let body: String = row.try_get("body")?;
            records.push(RawRecord {
                position: sequence as u64,
                bytes: body.into_bytes(),
                complete: true,
            });
        }

        let report = recovery::plan(&records, total as usize, tolerance)?;
        if !report.is_clean() {
            let keep_through = report.tail.as_ref().map(|t| t.sequence).unwrap_or(0);
            warn!(
                "Deleting {} damaged rows after sequence {}",
                report.discarded, keep_through
            );
            sqlx::query("DELETE FROM log_entries WHERE sequence > ?")
                .bind(keep_through as i64)
                .execute(&self.pool)
                .await?;
        }
        Ok(report)
    }

    pub async fn append(&self, entry: &LogEntry, body: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO log_entries (sequence, prev_hash, hash, kind, timestamp_ms, body)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.sequence as i64)
        .bind(&entry.prev_hash)
        .bind(&entry.hash)
        .bind(entry.kind().as_str())
        .bind(entry.timestamp.timestamp_millis())
        .bind(body)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Inserted row {}", entry.sequence);
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let tail = self.last_entry().await?;
                Err(LogError::ChainConflict {
                    sequence: entry.sequence,
                    tail_sequence: tail.as_ref().map(|t| t.sequence).unwrap_or(0),
                    tail_hash: tail.map(|t| t.hash).unwrap_or_default(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rows with `start <= sequence < end`, ascending.
    pub async fn read(&self, start: u64, end: u64) -> Result<Vec<LogEntry>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT sequence, body FROM log_entries WHERE sequence >= ? AND sequence < ? ORDER BY sequence",
        )
        .bind(start as i64)
        .bind(end.min(i64::MAX as u64) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_row).collect()
    }

    pub async fn last_entry(&self) -> Result<Option<LogEntry>> {
        let row = sqlx::query("SELECT sequence, body FROM log_entries ORDER BY sequence DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    pub async fn latest_of_kind(&self, kind: EntryKind, upto: u64) -> Result<Option<LogEntry>> {
        let row = sqlx::query(
            "SELECT sequence, body FROM log_entries WHERE kind = ? AND sequence <= ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(kind.as_str())
        .bind(upto as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_row).transpose()
    }

    pub async fn since(&self, since: DateTime<Utc>, upto: u64) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            "SELECT sequence, body FROM log_entries WHERE timestamp_ms >= ? AND sequence <= ? ORDER BY sequence",
        )
        .bind(since.timestamp_millis())
        .bind(upto as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = decode_row(row)?;
            // Sub-millisecond precision is only in the body.
            if entry.timestamp >= since {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_row(row: &SqliteRow) -> Result<LogEntry> {
    let sequence: i64 = row.try_get("sequence")?;
    let body: String = row.try_get("body")?;
    let entry = LogEntry::from_json_line(&body, sequence as u64)?;
    if entry.sequence != sequence as u64 {
        return Err(LogError::corrupt(
            sequence as u64,
            format!("row holds entry {}", entry.sequence),
        ));
    }
    Ok(entry)
}
