//! Newline-delimited JSON file backend.
//!
//! One entry per line; the trailing newline is the commit marker. The byte
//! offset where each committed record ends is kept in memory so range reads
//! seek straight to their span. All methods block and are driven from
//! `spawn_blocking` by the store.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::audit::entry::LogEntry;
use crate::audit::payload::EntryKind;
use crate::error::{LogError, Result};
use crate::store::recovery::{self, RawRecord, RecoveryReport};

pub struct FileLog {
    path: PathBuf,
    writer: Mutex<File>,
    /// End offset of each committed record; record `i` holds position `i + 1`.
    offsets: RwLock<Vec<u64>>,
    sync_writes: bool,
}

impl FileLog {
    /// Open (or create) the log file, truncating a damaged tail.
    pub fn open(path: &Path, sync_writes: bool, tolerance: usize) -> Result<(Self, RecoveryReport)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LogError::StorageUnavailable(format!("Failed to create log directory: {}", e))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| LogError::StorageUnavailable(format!("Failed to open log file: {}", e)))?;

        let bytes = fs::read(path)?;
        let (records, ends) = split_records(&bytes);
        let report = recovery::plan(&records, records.len(), tolerance)?;

        let mut offsets = ends;
        offsets.truncate(report.kept);
        let keep_len = offsets.last().copied().unwrap_or(0);
        if keep_len < bytes.len() as u64 {
            warn!(
                "Truncating {:?} from {} to {} bytes ({} damaged records)",
                path,
                bytes.len(),
                keep_len,
                report.discarded
            );
            file.set_len(keep_len)?;
            file.sync_all()?;
        }

        info!("Opened log file {:?} with {} entries", path, offsets.len());
        Ok((
            Self {
                path: path.to_path_buf(),
                writer: Mutex::new(file),
                offsets: RwLock::new(offsets),
                sync_writes,
            },
            report,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn committed_records(&self) -> u64 {
        self.offsets.read().map(|o| o.len() as u64).unwrap_or(0)
    }

    /// Append one serialized entry (without trailing newline).
    pub fn append(&self, line: &str) -> Result<()> {
        let mut file = self
            .writer
            .lock()
            .map_err(|_| LogError::StorageUnavailable("log writer poisoned".to_string()))?;

        let start = self.end_offset()?;
        if file.metadata()?.len() != start {
            // Leftovers from a write that failed after partially landing.
            file.set_len(start)?;
        }

        let mut record = Vec::with_capacity(line.len() + 1);
        record.extend_from_slice(line.as_bytes());
        record.push(b'\n');

        let written = file.write_all(&record).and_then(|_| {
            if self.sync_writes {
                file.sync_data()
            } else {
                file.flush()
            }
        });

        if let Err(e) = written {
            if let Err(rollback) = file.set_len(start) {
                warn!("Failed to roll back partial write at offset {}: {}", start, rollback);
            }
            return Err(LogError::StorageUnavailable(format!(
                "Failed to write to log file: {}",
                e
            )));
        }

        let mut offsets = self
            .offsets
            .write()
            .map_err(|_| LogError::StorageUnavailable("log index poisoned".to_string()))?;
        offsets.push(start + record.len() as u64);
        debug!("Appended record {} to {:?}", offsets.len(), self.path);
        Ok(())
    }

    /// Read records at positions `[start, end)`, clamped to what is committed.
    pub fn read(&self, start: u64, end: u64) -> Result<Vec<LogEntry>> {
        let (first_offset, spans) = {
            let offsets = self
                .offsets
                .read()
                .map_err(|_| LogError::StorageUnavailable("log index poisoned".to_string()))?;
            let end = end.min(offsets.len() as u64 + 1);
            if start < 1 || start >= end {
                return Ok(Vec::new());
            }
            let first = (start - 1) as usize;
            let last = (end - 1) as usize;
            let first_offset = if first == 0 { 0 } else { offsets[first - 1] };
            (first_offset, offsets[first..last].to_vec())
        };

        let total = spans.last().copied().unwrap_or(first_offset) - first_offset;
        let mut buffer = vec![0u8; total as usize];
        let mut reader = File::open(&self.path)?;
        reader.seek(SeekFrom::Start(first_offset))?;
        reader.read_exact(&mut buffer)?;

        let mut entries = Vec::with_capacity(spans.len());
        let mut cursor = first_offset;
        for (i, end_offset) in spans.iter().enumerate() {
            let position = start + i as u64;
            let from = (cursor - first_offset) as usize;
            // Exclude the newline.
            let to = (end_offset - first_offset) as usize - 1;
            let text = std::str::from_utf8(&buffer[from..to])
                .map_err(|e| LogError::corrupt(position, e.to_string()))?;
            entries.push(LogEntry::from_json_line(text, position)?);
            cursor = *end_offset;
        }
        Ok(entries)
    }

    /// Last committed record, after any in-flight write has finished.
    pub fn last_entry(&self) -> Result<Option<LogEntry>> {
        let _writer = self
            .writer
            .lock()
            .map_err(|_| LogError::StorageUnavailable("log writer poisoned".to_string()))?;
        let count = self.committed_records();
        if count == 0 {
            return Ok(None);
        }
        Ok(self.read(count, count + 1)?.pop())
    }

    /// Most recent entry of `kind` at or below position `upto`.
    pub fn latest_of_kind(&self, kind: EntryKind, upto: u64) -> Result<Option<LogEntry>> {
        Ok(self
            .read(1, upto + 1)?
            .into_iter()
            .rev()
            .find(|e| e.kind() == kind))
    }

    /// Entries at or after `since`, up to position `upto`.
    pub fn since(&self, since: DateTime<Utc>, upto: u64) -> Result<Vec<LogEntry>> {
        Ok(self
            .read(1, upto + 1)?
            .into_iter()
            .filter(|e| e.timestamp >= since)
            .collect())
    }

    fn end_offset(&self) -> Result<u64> {
        let offsets = self
            .offsets
            .read()
            .map_err(|_| LogError::StorageUnavailable("log index poisoned".to_string()))?;
        Ok(offsets.last().copied().unwrap_or(0))
    }
}

/// Split file contents into records and the end offset of each complete one.
pub(crate) fn split_records(bytes: &[u8]) -> (Vec<RawRecord>, Vec<u64>) {
    let mut records = Vec::new();
    let mut ends = Vec::new();
    let mut start = 0usize;

    for (i, byte) in bytes.iter().enumerate() {
        if *byte == b'\n' {
            records.push(RawRecord {
                position: records.len() as u64 + 1,
                bytes: bytes[start..i].to_vec(),
                complete: true,
            });
            ends.push(i as u64 + 1);
            start = i + 1;
        }
    }

    if start < bytes.len() {
        records.push(RawRecord {
            position: records.len() as u64 + 1,
            bytes: bytes[start..].to_vec(),
            complete: false,
        });
    }

    (records, ends)
}

#[cfg(test)]
impl FileLog {
    /// Hold the writer so appends block until the guard drops.
    pub(crate) fn hold_writer(&self) -> std::sync::MutexGuard<'_, File> {
        self.writer.lock().expect("log writer poisoned")
    }
}
