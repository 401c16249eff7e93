//! Performance Log Entry
//!
//! Defines the structure for tamper-evident log entries with cryptographic
//! hash chains, and the canonical encoding their hashes are computed over.
//!
//! Canonical encoding (UTF-8, fields in this order, `|` separated):
//!
//! ```text
//! sequence:<u64>|timestamp:<RFC 3339, nanoseconds, Z>|kind:<kind>|payload:<canonical JSON>|prev_hash:<hash>
//! ```
//!
//! Canonical JSON sorts object keys at every depth, has no whitespace, omits
//! absent optional fields and prints numbers in shortest round-trip form.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::audit::payload::{EntryKind, EntryPayload};
use crate::error::LogError;

/// `prev_hash` of the first entry in every log.
pub const GENESIS_HASH: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

const HASH_PREFIX: &str = "sha256:";

/// One immutable record in the performance log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredEntry", into = "StoredEntry")]
pub struct LogEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EntryPayload,
    pub prev_hash: String,
    pub hash: String,
    pub signer: Option<String>,
    pub signature: Option<String>,
}

/// Wire form of an entry: the payload stays dynamic until decoded against
/// the schema named by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredEntry {
    sequence: u64,
    timestamp: DateTime<Utc>,
    kind: EntryKind,
    payload: Value,
    prev_hash: String,
    hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

impl TryFrom<StoredEntry> for LogEntry {
    type Error = LogError;

    fn try_from(stored: StoredEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            sequence: stored.sequence,
            timestamp: stored.timestamp,
            payload: EntryPayload::from_value(stored.kind, stored.payload)?,
            prev_hash: stored.prev_hash,
            hash: stored.hash,
            signer: stored.signer,
            signature: stored.signature,
        })
    }
}

impl From<LogEntry> for StoredEntry {
    fn from(entry: LogEntry) -> Self {
        Self {
            sequence: entry.sequence,
            timestamp: entry.timestamp,
            kind: entry.payload.kind(),
            payload: entry.payload.to_value(),
            prev_hash: entry.prev_hash,
            hash: entry.hash,
            signer: entry.signer,
            signature: entry.signature,
        }
    }
}

impl LogEntry {
    pub fn kind(&self) -> EntryKind {
        self.payload.kind()
    }

    /// Create canonical string representation for hashing
    pub fn canonical_string(&self) -> String {
        canonical_string(
            self.sequence,
            &self.timestamp,
            &self.payload,
            &self.prev_hash,
        )
    }

    /// Calculate SHA256 hash of this entry's canonical encoding
    pub fn calculate_hash(&self) -> String {
        hash_canonical(&self.canonical_string())
    }

    /// Verify this entry's hash
    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Raw 32 bytes of the stored hash, the message that gets signed.
    pub fn hash_digest(&self) -> Result<[u8; 32], LogError> {
        hash_digest(&self.hash)
    }

    /// Single-line JSON form, as stored and exported.
    pub fn to_json_line(&self) -> Result<String, LogError> {
        serde_json::to_string(self).map_err(|e| LogError::corrupt(self.sequence, e.to_string()))
    }

    pub fn from_json_line(line: &str, position: u64) -> Result<Self, LogError> {
        serde_json::from_str(line).map_err(|e| LogError::corrupt(position, e.to_string()))
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {} at {} ({})",
            self.sequence,
            self.kind(),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            short_hash(&self.hash)
        )
    }
}

pub fn canonical_string(
    sequence: u64,
    timestamp: &DateTime<Utc>,
    payload: &EntryPayload,
    prev_hash: &str,
) -> String {
    format!(
        "sequence:{}|timestamp:{}|kind:{}|payload:{}|prev_hash:{}",
        sequence,
        timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        payload.kind(),
        canonical_json(&payload.to_value()),
        prev_hash
    )
}

pub fn hash_canonical(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{}{}", HASH_PREFIX, hex::encode(hasher.finalize()))
}

/// Serialize JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Decode a `sha256:<hex>` hash into its raw bytes.
pub fn hash_digest(hash: &str) -> Result<[u8; 32], LogError> {
    let hex_part = hash
        .strip_prefix(HASH_PREFIX)
        .ok_or_else(|| LogError::CryptoError(format!("Hash missing sha256 prefix: {}", hash)))?;
    let bytes = hex::decode(hex_part)
        .map_err(|e| LogError::CryptoError(format!("Invalid hash hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| LogError::CryptoError(format!("Hash is not 32 bytes: {}", hash)))
}

pub fn short_hash(hash: &str) -> &str {
    let end = (HASH_PREFIX.len() + 12).min(hash.len());
    &hash[..end]
}
