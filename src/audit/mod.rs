//! Audit Log Engine
//!
//! Tamper-evident record of strategy decisions, trades and PnL snapshots
//! with cryptographic hash chains, signatures and Merkle anchoring.

pub mod builder;
pub mod entry;
pub mod merkle;
pub mod payload;
pub mod verify;

pub use builder::EntryBuilder;
pub use entry::{LogEntry, GENESIS_HASH};
pub use merkle::{generate_merkle_proof, merkle_root, verify_merkle_proof, verify_merkle_root};
pub use payload::{
    DecisionAction, DecisionPayload, EntryKind, EntryPayload, PositionSnapshot, Side,
    SnapshotPayload, TradePayload,
};
pub use verify::{ChainAnchor, ChainVerifier, VerificationReport, VerificationResult};
