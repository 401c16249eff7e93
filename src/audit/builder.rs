//! Entry construction: validate, link, hash, sign. No I/O.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::audit::entry::{canonical_string, hash_canonical, LogEntry};
use crate::audit::payload::{EntryKind, EntryPayload};
use crate::crypto::AgentSigner;
use crate::error::{LogError, Result};
use crate::store::TailCursor;

pub struct EntryBuilder {
    signer: Option<AgentSigner>,
    allow_unsigned: bool,
}

impl EntryBuilder {
    /// Builder that signs every entry.
    pub fn signed(signer: AgentSigner) -> Self {
        Self {
            signer: Some(signer),
            allow_unsigned: false,
        }
    }

    /// Builder without a key; entries are produced unsigned.
    pub fn unsigned() -> Self {
        Self {
            signer: None,
            allow_unsigned: true,
        }
    }

    /// `allow_unsigned` only matters when `signer` is `None`.
    pub fn new(signer: Option<AgentSigner>, allow_unsigned: bool) -> Self {
        Self {
            signer,
            allow_unsigned,
        }
    }

    pub fn signer(&self) -> Option<&AgentSigner> {
        self.signer.as_ref()
    }

    /// Build from a dynamic payload, validated against the schema for `kind`.
    pub fn build(&self, kind: EntryKind, payload: Value, prior: &TailCursor) -> Result<LogEntry> {
        let payload = EntryPayload::from_value(kind, payload)?;
        self.build_at(payload, prior, Utc::now())
    }

    pub fn build_payload(&self, payload: EntryPayload, prior: &TailCursor) -> Result<LogEntry> {
        self.build_at(payload, prior, Utc::now())
    }

    /// Build with an explicit event time.
    pub fn build_at(
        &self,
        payload: EntryPayload,
        prior: &TailCursor,
        timestamp: DateTime<Utc>,
    ) -> Result<LogEntry> {
        payload.validate()?;

        if self.signer.is_none() && !self.allow_unsigned {
            return Err(LogError::SigningUnavailable(
                "no signing key configured and unsigned entries are not allowed".to_string(),
            ));
        }

        let sequence = prior.sequence + 1;
        let hash = hash_canonical(&canonical_string(
            sequence,
            &timestamp,
            &payload,
            &prior.hash,
        ));

        let mut entry = LogEntry {
            sequence,
            timestamp,
            payload,
            prev_hash: prior.hash.clone(),
            hash,
            signer: None,
            signature: None,
        };

        if let Some(signer) = &self.signer {
            let digest = entry.hash_digest()?;
            entry.signature = Some(signer.sign_hex(&digest)?);
            entry.signer = Some(signer.public_key_hex());
        }

        debug!("Built entry {}", entry.summary());
        Ok(entry)
    }
}
