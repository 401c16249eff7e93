//! Chain Verification
//!
//! Recomputes hashes, links and signatures over a run of entries. Findings
//! are returned as values; nothing here touches storage.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::entry::{LogEntry, GENESIS_HASH};
use crate::crypto::SignatureManager;

/// Outcome of verifying a range of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "sequence", rename_all = "snake_case")]
pub enum VerificationResult {
    Valid,
    BrokenLink(u64),
    BadSignature(u64),
    Unsigned(u64),
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationResult::Valid)
    }

    /// Sequence of the finding, if any.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            VerificationResult::Valid => None,
            VerificationResult::BrokenLink(seq)
            | VerificationResult::BadSignature(seq)
            | VerificationResult::Unsigned(seq) => Some(*seq),
        }
    }

    fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            VerificationResult::BrokenLink(_) | VerificationResult::BadSignature(_)
        )
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationResult::Valid => write!(f, "valid"),
            VerificationResult::BrokenLink(seq) => write!(f, "broken link at entry {}", seq),
            VerificationResult::BadSignature(seq) => write!(f, "bad signature at entry {}", seq),
            VerificationResult::Unsigned(seq) => write!(f, "unsigned entry {}", seq),
        }
    }
}

/// Link the first entry of a range must extend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAnchor {
    pub sequence: u64,
    pub hash: String,
}

impl ChainAnchor {
    pub fn genesis() -> Self {
        Self {
            sequence: 0,
            hash: GENESIS_HASH.to_string(),
        }
    }

    pub fn of(entry: &LogEntry) -> Self {
        Self {
            sequence: entry.sequence,
            hash: entry.hash.clone(),
        }
    }
}

/// Verification result with detailed information
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub result: VerificationResult,
    pub entries_checked: usize,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    /// Sequences from the first integrity failure to the end of the range.
    pub untrusted: Vec<u64>,
    pub unsigned: Vec<u64>,
}

impl VerificationReport {
    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match (self.first_sequence, self.last_sequence) {
            (Some(first), Some(last)) => format!(
                "{} ({} entries, #{}..=#{})",
                self.result, self.entries_checked, first, last
            ),
            _ => format!("{} (empty range)", self.result),
        }
    }
}

pub struct ChainVerifier {
    signatures: SignatureManager,
    trusted_signers: Option<HashSet<String>>,
}

impl ChainVerifier {
    /// Accept any declared signer whose signature checks out.
    pub fn new() -> Self {
        Self {
            signatures: SignatureManager::new(),
            trusted_signers: None,
        }
    }

    /// Only accept signatures from the given hex public keys.
    pub fn with_trusted_signers<I, S>(signers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let trusted: HashSet<String> = signers
            .into_iter()
            .map(|s| s.into().to_lowercase())
            .collect();
        Self {
            signatures: SignatureManager::new(),
            trusted_signers: if trusted.is_empty() { None } else { Some(trusted) },
        }
    }

    /// Verify a run of entries. `anchor` is the entry preceding the range;
    /// without it the first entry's link is only checked when it is entry 1.
    pub fn verify(&self, entries: &[LogEntry], anchor: Option<&ChainAnchor>) -> VerificationResult {
        self.audit(entries, anchor).result
    }

    /// Verify and report every untrusted and unsigned sequence.
    pub fn audit(&self, entries: &[LogEntry], anchor: Option<&ChainAnchor>) -> VerificationReport {
        let genesis = ChainAnchor::genesis();
        let mut previous: Option<ChainAnchor> = match anchor {
            Some(anchor) => Some(anchor.clone()),
            None => match entries.first() {
                Some(first) if first.sequence == 1 => Some(genesis),
                _ => None,
            },
        };

        let mut integrity_failure: Option<VerificationResult> = None;
        let mut untrusted = Vec::new();
        let mut unsigned = Vec::new();

        for entry in entries {
            let finding = self.check_entry(entry, previous.as_ref());

            if integrity_failure.is_some() {
                untrusted.push(entry.sequence);
            } else if let Some(finding) = finding {
                if finding.is_integrity_failure() {
                    warn!("Verification failed: {}", finding);
                    integrity_failure = Some(finding);
                    untrusted.push(entry.sequence);
                }
            }

            if !entry.is_signed() {
                unsigned.push(entry.sequence);
            }

            previous = Some(ChainAnchor::of(entry));
        }

        let result = match (integrity_failure, unsigned.first()) {
            (Some(failure), _) => failure,
            (None, Some(seq)) => VerificationResult::Unsigned(*seq),
            (None, None) => VerificationResult::Valid,
        };

        if result.is_valid() {
            info!("Verified {} entries", entries.len());
        } else {
            debug!("Verification of {} entries: {}", entries.len(), result);
        }

        VerificationReport {
            result,
            entries_checked: entries.len(),
            first_sequence: entries.first().map(|e| e.sequence),
            last_sequence: entries.last().map(|e| e.sequence),
            untrusted,
            unsigned,
        }
    }

    fn check_entry(&self, entry: &LogEntry, previous: Option<&ChainAnchor>) -> Option<VerificationResult> {
        if let Some(previous) = previous {
            if entry.sequence != previous.sequence + 1 || entry.prev_hash != previous.hash {
                return Some(VerificationResult::BrokenLink(entry.sequence));
            }
        }

        if !entry.verify_hash() {
            return Some(VerificationResult::BrokenLink(entry.sequence));
        }

        match (&entry.signer, &entry.signature) {
            (None, None) => Some(VerificationResult::Unsigned(entry.sequence)),
            (Some(signer), Some(signature)) => {
                if !self.is_trusted(signer) || !self.signature_valid(entry, signer, signature) {
                    Some(VerificationResult::BadSignature(entry.sequence))
                } else {
                    None
                }
            }
            _ => Some(VerificationResult::BadSignature(entry.sequence)),
        }
    }

    fn is_trusted(&self, signer: &str) -> bool {
        match &self.trusted_signers {
            Some(trusted) => trusted.contains(&signer.to_lowercase()),
            None => true,
        }
    }

    fn signature_valid(&self, entry: &LogEntry, signer: &str, signature: &str) -> bool {
        let digest = match entry.hash_digest() {
            Ok(digest) => digest,
            Err(_) => return false,
        };
        self.signatures
            .verify_hex(&digest, signature, signer)
            .unwrap_or(false)
    }
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}
