//! Log Store
//!
//! Durable, strictly ordered persistence of entries. A single writer lock
//! serializes check-and-append; readers snapshot the committed cursor and then
//! read the medium without blocking writers. An entry becomes visible only
//! after it is durable and the cursor has advanced past it.

pub mod file;
pub mod recovery;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::audit::builder::EntryBuilder;
use crate::audit::entry::{LogEntry, GENESIS_HASH};
use crate::audit::payload::{EntryKind, EntryPayload};
use crate::audit::verify::{ChainAnchor, ChainVerifier, VerificationReport, VerificationResult};
use crate::error::{LogError, Result};
use crate::settings::{AppConfig, BackendKind, StoreConfig};

use self::file::FileLog;
use self::recovery::RecoveryReport;
use self::sqlite::SqliteLog;

const EVENT_CAPACITY: usize = 1024;

/// Position of the most recently committed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TailCursor {
    pub sequence: u64,
    pub hash: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl TailCursor {
    pub fn genesis() -> Self {
        Self {
            sequence: 0,
            hash: GENESIS_HASH.to_string(),
            timestamp: None,
        }
    }

    pub fn of(entry: &LogEntry) -> Self {
        Self {
            sequence: entry.sequence,
            hash: entry.hash.clone(),
            timestamp: Some(entry.timestamp),
        }
    }
}

/// Half-open `[start, end)` range of sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogRange {
    pub start: u64,
    pub end: u64,
}

impl LogRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Every entry up to and including `tail`.
    pub fn through(tail: u64) -> Self {
        Self::new(1, tail + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Restrict to sequences that exist in a log whose tail is `tail`.
    pub fn clamp(&self, tail: u64) -> Self {
        Self::new(self.start.max(1), self.end.min(tail + 1))
    }
}

/// Store tuning, usually derived from [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub io_timeout: Duration,
    pub max_recovery_truncation: usize,
    pub clock_skew_tolerance_ms: u64,
    pub allow_unsigned: bool,
    pub sync_writes: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for StoreOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            io_timeout: Duration::from_millis(config.io_timeout_ms),
            max_recovery_truncation: config.max_recovery_truncation,
            clock_skew_tolerance_ms: config.clock_skew_tolerance_ms,
            allow_unsigned: config.allow_unsigned,
            sync_writes: config.sync_writes,
        }
    }
}

enum Backend {
    File(Arc<FileLog>),
    Sqlite(SqliteLog),
}

pub struct LogStore {
    backend: Backend,
    options: StoreOptions,
    writer: Mutex<()>,
    committed: RwLock<TailCursor>,
    needs_resync: AtomicBool,
    events: broadcast::Sender<LogEntry>,
    recovery: RecoveryReport,
}

impl LogStore {
    /// Open the store configured for `config.agent_id`.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let path = config.store_path();
        let options = StoreOptions::from(&config.store);
        match config.store.backend {
            BackendKind::File => Self::open_file(&path, options).await,
            BackendKind::Sqlite => Self::open_sqlite(&path, options).await,
        }
    }

    pub async fn open_file(path: &Path, options: StoreOptions) -> Result<Self> {
        let path = path.to_path_buf();
        let sync_writes = options.sync_writes;
        let tolerance = options.max_recovery_truncation;
        let (log, report) =
            spawn_io(move || FileLog::open(&path, sync_writes, tolerance)).await?;
        Ok(Self::with_backend(Backend::File(Arc::new(log)), options, report))
    }

    pub async fn open_sqlite(path: &Path, options: StoreOptions) -> Result<Self> {
        let (log, report) = SqliteLog::open(
            path,
            options.sync_writes,
            options.max_recovery_truncation,
            options.io_timeout,
        )
        .await?;
        Ok(Self::with_backend(Backend::Sqlite(log), options, report))
    }

    fn with_backend(backend: Backend, options: StoreOptions, recovery: RecoveryReport) -> Self {
        let cursor = recovery
            .tail
            .as_ref()
            .map(TailCursor::of)
            .unwrap_or_else(TailCursor::genesis);
        if !recovery.is_clean() {
            warn!(
                "Recovered log: kept {} entries, discarded {}",
                recovery.kept, recovery.discarded
            );
        }
        info!("Log store ready at sequence {}", cursor.sequence);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            options,
            writer: Mutex::new(()),
            committed: RwLock::new(cursor),
            needs_resync: AtomicBool::new(false),
            events,
            recovery,
        }
    }

    /// What recovery did when the store was opened.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub async fn current_tail(&self) -> TailCursor {
        self.committed.read().await.clone()
    }

    /// Sequence of the committed tail; the entry count of an intact log.
    pub async fn len(&self) -> u64 {
        self.committed.read().await.sequence
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Receive every entry committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.events.subscribe()
    }

    /// Persist a built entry; it must extend the current tail exactly.
    pub async fn append(&self, entry: LogEntry) -> Result<u64> {
        let _guard = self.writer.lock().await;
        self.append_locked(entry).await
    }

    /// Build an entry against `prior_hash`, which must still be the tail.
    pub async fn prepare(
        &self,
        builder: &EntryBuilder,
        kind: EntryKind,
        payload: Value,
        prior_hash: &str,
    ) -> Result<LogEntry> {
        let cursor = self.current_tail().await;
        if cursor.hash != prior_hash {
            return Err(LogError::ChainMismatch {
                supplied: prior_hash.to_string(),
                tail: cursor.hash,
            });
        }
        builder.build(kind, payload, &cursor)
    }

    /// Build against the tail and append in one step.
    pub async fn record(
        &self,
        builder: &EntryBuilder,
        kind: EntryKind,
        payload: Value,
    ) -> Result<LogEntry> {
        let payload = EntryPayload::from_value(kind, payload)?;
        self.record_payload(builder, payload).await
    }

    pub async fn record_payload(
        &self,
        builder: &EntryBuilder,
        payload: EntryPayload,
    ) -> Result<LogEntry> {
        let _guard = self.writer.lock().await;
        self.resync_if_needed().await?;
        let cursor = self.current_tail().await;
        let entry = builder.build_payload(payload, &cursor)?;
        self.append_locked(entry.clone()).await?;
        Ok(entry)
    }

    async fn append_locked(&self, entry: LogEntry) -> Result<u64> {
        self.resync_if_needed().await?;
        let cursor = self.current_tail().await;

        if entry.prev_hash != cursor.hash || entry.sequence != cursor.sequence + 1 {
            return Err(LogError::ChainConflict {
                sequence: entry.sequence,
                tail_sequence: cursor.sequence,
                tail_hash: cursor.hash,
            });
        }

        if !entry.verify_hash() {
            return Err(LogError::HashMismatch(entry.sequence));
        }

        if !entry.is_signed() && !self.options.allow_unsigned {
            return Err(LogError::SigningUnavailable(format!(
                "entry {} is unsigned and this store requires signatures",
                entry.sequence
            )));
        }

        self.check_timestamp(&entry, &cursor)?;

        let line = entry.to_json_line()?;
        let written = match &self.backend {
            Backend::File(log) => {
                let log = Arc::clone(log);
                bounded(
                    self.options.io_timeout,
                    "append",
                    spawn_io(move || log.append(&line)),
                )
                .await
            }
            Backend::Sqlite(log) => {
                bounded(self.options.io_timeout, "append", log.append(&entry, &line)).await
            }
        };

        if let Err(e) = written {
            if !matches!(e, LogError::ChainConflict { .. }) {
                self.needs_resync.store(true, Ordering::SeqCst);
            }
            warn!("Append of entry {} failed: {}", entry.sequence, e);
            return Err(e);
        }

        let sequence = entry.sequence;
        *self.committed.write().await = TailCursor::of(&entry);
        debug!("Committed {}", entry.summary());
        // No receivers is fine.
        let _ = self.events.send(entry);
        Ok(sequence)
    }

    fn check_timestamp(&self, entry: &LogEntry, cursor: &TailCursor) -> Result<()> {
        let Some(tail_time) = cursor.timestamp else {
            return Ok(());
        };
        if entry.timestamp >= tail_time {
            return Ok(());
        }
        let behind_ms = (tail_time - entry.timestamp).num_milliseconds();
        if behind_ms as u64 > self.options.clock_skew_tolerance_ms {
            return Err(LogError::TimestampRegression {
                sequence: entry.sequence,
                behind_ms,
                tolerance_ms: self.options.clock_skew_tolerance_ms,
            });
        }
        warn!(
            "Entry {} is {}ms behind the tail; accepted within clock skew tolerance",
            entry.sequence, behind_ms
        );
        Ok(())
    }

    /// After a failed or timed-out write the medium may hold more than the
    /// cursor knows; adopt whatever actually committed.
    async fn resync_if_needed(&self) -> Result<()> {
        if !self.needs_resync.load(Ordering::SeqCst) {
            return Ok(());
        }
        let last = self.last_on_medium().await?;
        let cursor = last.as_ref().map(TailCursor::of).unwrap_or_else(TailCursor::genesis);
        info!("Resynchronized tail cursor at sequence {}", cursor.sequence);
        *self.committed.write().await = cursor;
        self.needs_resync.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn last_on_medium(&self) -> Result<Option<LogEntry>> {
        match &self.backend {
            Backend::File(log) => {
                let log = Arc::clone(log);
                bounded(
                    self.options.io_timeout,
                    "resync",
                    spawn_io(move || log.last_entry()),
                )
                .await
            }
            Backend::Sqlite(log) => {
                bounded(self.options.io_timeout, "resync", log.last_entry()).await
            }
        }
    }

    /// Committed entries with `start <= sequence < end`, ascending.
    pub async fn read_range(&self, start: u64, end: u64) -> Result<Vec<LogEntry>> {
        self.read(LogRange::new(start, end)).await
    }

    /// Reads address positions in the medium, which equal sequences in an
    /// intact log; gaps left by tampering surface in verification.
    pub async fn read(&self, range: LogRange) -> Result<Vec<LogEntry>> {
        let tail = self.len().await;
        let range = range.clamp(tail);
        if range.is_empty() {
            return Ok(Vec::new());
        }

        match &self.backend {
            Backend::File(log) => {
                let log = Arc::clone(log);
                bounded(
                    self.options.io_timeout,
                    "read",
                    spawn_io(move || log.read(range.start, range.end)),
                )
                .await
            }
            Backend::Sqlite(log) => {
                bounded(self.options.io_timeout, "read", log.read(range.start, range.end)).await
            }
        }
    }

    /// The last `n` committed entries, ascending.
    pub async fn tail(&self, n: usize) -> Result<Vec<LogEntry>> {
        let tail = self.len().await;
        let start = tail.saturating_sub(n as u64) + 1;
        self.read(LogRange::new(start, tail + 1)).await
    }

    /// Most recent committed entry of `kind`.
    pub async fn latest_of_kind(&self, kind: EntryKind) -> Result<Option<LogEntry>> {
        let upto = self.len().await;
        if upto == 0 {
            return Ok(None);
        }
        match &self.backend {
            Backend::File(log) => {
                let log = Arc::clone(log);
                bounded(
                    self.options.io_timeout,
                    "latest_of_kind",
                    spawn_io(move || log.latest_of_kind(kind, upto)),
                )
                .await
            }
            Backend::Sqlite(log) => {
                bounded(
                    self.options.io_timeout,
                    "latest_of_kind",
                    log.latest_of_kind(kind, upto),
                )
                .await
            }
        }
    }

    /// Committed entries stamped at or after `since`, ascending.
    pub async fn since(&self, since: DateTime<Utc>) -> Result<Vec<LogEntry>> {
        let upto = self.len().await;
        if upto == 0 {
            return Ok(Vec::new());
        }
        match &self.backend {
            Backend::File(log) => {
                let log = Arc::clone(log);
                bounded(
                    self.options.io_timeout,
                    "since",
                    spawn_io(move || log.since(since, upto)),
                )
                .await
            }
            Backend::Sqlite(log) => {
                bounded(self.options.io_timeout, "since", log.since(since, upto)).await
            }
        }
    }

    /// Verify a range, anchored on the entry just before it.
    pub async fn verify(&self, range: LogRange, verifier: &ChainVerifier) -> Result<VerificationReport> {
        let (report, _) = self.read_verified(range, verifier).await?;
        Ok(report)
    }

    /// Read `range` once and audit exactly the entries returned. The range is
    /// clamped to the tail at call time, so later appends are never included.
    /// When the range holds an undecodable entry the vector is empty.
    pub async fn read_verified(
        &self,
        range: LogRange,
        verifier: &ChainVerifier,
    ) -> Result<(VerificationReport, Vec<LogEntry>)> {
        let tail = self.len().await;
        let range = range.clamp(tail);

        let anchor = if range.start <= 1 || range.is_empty() {
            None
        } else {
            match self.read(LogRange::new(range.start - 1, range.start)).await {
                Ok(mut before) => before.pop().map(|e| ChainAnchor::of(&e)),
                Err(LogError::CorruptEntry { position, .. }) => {
                    return Ok((undecodable_report(range, position), Vec::new()));
                }
                Err(e) => return Err(e),
            }
        };

        match self.read(range).await {
            Ok(entries) => Ok((verifier.audit(&entries, anchor.as_ref()), entries)),
            Err(LogError::CorruptEntry { position, .. }) => {
                Ok((undecodable_report(range, position), Vec::new()))
            }
            Err(e) => Err(e),
        }
    }

    /// Release the medium.
    pub async fn close(&self) {
        if let Backend::Sqlite(log) = &self.backend {
            log.close().await;
        }
    }
}

/// A stored entry that no longer decodes breaks the chain at its position.
fn undecodable_report(range: LogRange, position: u64) -> VerificationReport {
    let broken = position.max(range.start);
    VerificationReport {
        result: VerificationResult::BrokenLink(broken),
        entries_checked: 0,
        first_sequence: Some(range.start),
        last_sequence: Some(range.end - 1),
        untrusted: (broken..range.end).collect(),
        unsigned: Vec::new(),
    }
}

async fn spawn_io<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LogError::StorageUnavailable(format!("I/O task failed: {}", e)))?
}

async fn bounded<T, F>(timeout: Duration, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(LogError::StorageUnavailable(format!(
            "{} timed out after {}ms",
            op,
            timeout.as_millis()
        ))),
    }
}
