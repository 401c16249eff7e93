use thiserror::Error;

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable(format!("I/O error: {}", err))
    }
}

impl From<sqlx::Error> for LogError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for LogError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageUnavailable(format!("Serialization error: {}", err))
    }
}

impl From<config::ConfigError> for LogError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("Chain mismatch: prior hash {supplied} is not the current tail {tail}")]
    ChainMismatch { supplied: String, tail: String },

    #[error("Chain conflict: entry {sequence} does not extend tail {tail_sequence} ({tail_hash})")]
    ChainConflict {
        sequence: u64,
        tail_sequence: u64,
        tail_hash: String,
    },

    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Corrupt entry at position {position}: {reason}")]
    CorruptEntry { position: u64, reason: String },

    #[error("Entry {0} hash does not match its contents")]
    HashMismatch(u64),

    #[error("Timestamp regression at entry {sequence}: {behind_ms}ms behind tail (tolerance {tolerance_ms}ms)")]
    TimestampRegression {
        sequence: u64,
        behind_ms: i64,
        tolerance_ms: u64,
    },

    #[error("Recovery would discard {discarded} entries (tolerance {tolerance})")]
    RecoveryToleranceExceeded { discarded: usize, tolerance: usize },

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LogError {
    pub fn invalid_payload(kind: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(position: u64, reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            position,
            reason: reason.into(),
        }
    }

    /// Whether the producer should refetch the tail, rebuild and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChainMismatch { .. } | Self::ChainConflict { .. } | Self::StorageUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LogError>;
