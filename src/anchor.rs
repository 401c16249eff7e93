//! Anchor digests for external registries.
//!
//! A digest commits to a verified range of the log: its bounds, the head
//! entry and a Merkle root over every entry hash in the range. Submitting it
//! anywhere is the caller's business.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::entry::LogEntry;
use crate::audit::merkle::merkle_root;
use crate::audit::verify::{ChainVerifier, VerificationReport};
use crate::error::Result;
use crate::store::{LogRange, LogStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorDigest {
    pub agent_id: String,
    /// First sequence covered.
    pub start: u64,
    /// One past the last sequence covered.
    pub end: u64,
    pub entry_count: u64,
    pub first_hash: String,
    pub head_sequence: u64,
    pub head_hash: String,
    pub merkle_root: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AnchorDecision {
    Ready(AnchorDigest),
    /// Verification did not return `Valid`; nothing may be anchored.
    Refused(VerificationReport),
    Empty,
}

impl AnchorDecision {
    pub fn digest(&self) -> Option<&AnchorDigest> {
        match self {
            Self::Ready(digest) => Some(digest),
            _ => None,
        }
    }
}

/// Build a digest from already verified entries.
pub fn digest_entries(agent_id: &str, entries: &[LogEntry]) -> Result<Option<AnchorDigest>> {
    let (first, head) = match (entries.first(), entries.last()) {
        (Some(first), Some(head)) => (first, head),
        _ => return Ok(None),
    };

    Ok(Some(AnchorDigest {
        agent_id: agent_id.to_string(),
        start: first.sequence,
        end: head.sequence + 1,
        entry_count: entries.len() as u64,
        first_hash: first.hash.clone(),
        head_sequence: head.sequence,
        head_hash: head.hash.clone(),
        merkle_root: merkle_root(entries)?,
        created_at: Utc::now(),
    }))
}

/// Read `range` once, verify it against the entry before it, and digest
/// those same entries only when the range is fully valid.
pub async fn prepare_anchor(
    store: &LogStore,
    agent_id: &str,
    range: LogRange,
    verifier: &ChainVerifier,
) -> Result<AnchorDecision> {
    let range = range.clamp(store.len().await);
    if range.is_empty() {
        return Ok(AnchorDecision::Empty);
    }

    let (report, entries) = store.read_verified(range, verifier).await?;
    if !report.result.is_valid() {
        warn!("Refusing to anchor {:?}: {}", range, report.summary());
        return Ok(AnchorDecision::Refused(report));
    }

    match digest_entries(agent_id, &entries)? {
        Some(digest) => {
            info!(
                "Prepared anchor for #{}..#{} root {}",
                digest.start, digest.head_sequence, digest.merkle_root
            );
            Ok(AnchorDecision::Ready(digest))
        }
        None => Ok(AnchorDecision::Empty),
    }
}

/// Check that `entries` are exactly what `digest` commits to.
pub fn matches_digest(digest: &AnchorDigest, entries: &[LogEntry]) -> Result<bool> {
    let (first, head) = match (entries.first(), entries.last()) {
        (Some(first), Some(head)) => (first, head),
        _ => return Ok(false),
    };
    Ok(first.sequence == digest.start
        && first.hash == digest.first_hash
        && head.sequence == digest.head_sequence
        && head.hash == digest.head_hash
        && entries.len() as u64 == digest.entry_count
        && merkle_root(entries)? == digest.merkle_root)
}
