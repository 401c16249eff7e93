//! Startup recovery planning.
//!
//! An append that was interrupted can leave at most a damaged suffix behind:
//! a record without its terminating newline, bytes that do not decode, or an
//! entry whose hash does not match its own fields. Recovery walks backwards
//! from the end and drops that suffix, stopping at the first self-consistent
//! entry. Damage earlier in the log is left in place for the verifier to
//! report.

use serde::Serialize;
use tracing::warn;

use crate::audit::entry::LogEntry;
use crate::error::{LogError, Result};

/// One persisted record as read back from the medium.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 1-based position in the medium; equals the sequence in an intact log.
    pub position: u64,
    pub bytes: Vec<u8>,
    /// False when the record's commit marker is missing.
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
    Valid(Box<LogEntry>),
    Incomplete,
    Undecodable(String),
    HashMismatch,
}

impl RawRecord {
    pub fn inspect(&self) -> RecordState {
        if !self.complete {
            return RecordState::Incomplete;
        }
        let text = match std::str::from_utf8(&self.bytes) {
            Ok(text) => text,
            Err(e) => return RecordState::Undecodable(e.to_string()),
        };
        match LogEntry::from_json_line(text, self.position) {
            Ok(entry) if entry.verify_hash() => RecordState::Valid(Box::new(entry)),
            Ok(_) => RecordState::HashMismatch,
            Err(e) => RecordState::Undecodable(e.to_string()),
        }
    }
}

/// What recovery found and kept.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Records kept, counted from the start of the medium.
    pub kept: usize,
    pub discarded: usize,
    #[serde(skip)]
    pub tail: Option<LogEntry>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.discarded == 0
    }
}

/// Decide how many trailing records to discard.
///
/// `records` must be the final records of the medium in ascending order, and
/// `total` the number of records the medium holds overall.
pub fn plan(records: &[RawRecord], total: usize, tolerance: usize) -> Result<RecoveryReport> {
    let mut discarded = 0;
    let mut tail = None;

    for record in records.iter().rev() {
        match record.inspect() {
            RecordState::Valid(entry) => {
                tail = Some(*entry);
                break;
            }
            state => {
                warn!("Discarding damaged record at position {}: {:?}", record.position, state);
                discarded += 1;
            }
        }
    }

    if tail.is_none() && discarded < total {
        // Every inspected record was damaged but older ones remain uninspected.
        return Err(LogError::RecoveryToleranceExceeded {
            discarded: records.len(),
            tolerance,
        });
    }

    if discarded > tolerance {
        return Err(LogError::RecoveryToleranceExceeded {
            discarded,
            tolerance,
        });
    }

    Ok(RecoveryReport {
        kept: total - discarded,
        discarded,
        tail,
    })
}
