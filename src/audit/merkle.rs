//! Merkle Tree for Log Ranges
//!
//! Merkle root and inclusion proofs over entry hashes, so an anchored digest
//! can later prove that a single entry belongs to the anchored range.
//! An odd node at the end of a level is paired with itself. The root
//! therefore does not fix the leaf count: `[a, b, c]` and `[a, b, c, c]`
//! share a root. Anything that commits to a root must commit to the entry
//! count next to it, as `AnchorDigest` does.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::audit::entry::{hash_digest, LogEntry};
use crate::error::{LogError, Result};

fn combine(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn to_hash_string(digest: &[u8; 32]) -> String {
    format!("sha256:{}", hex::encode(digest))
}

fn leaves(entries: &[LogEntry]) -> Result<Vec<[u8; 32]>> {
    if entries.is_empty() {
        return Err(LogError::CryptoError(
            "Cannot build Merkle tree from empty entries".to_string(),
        ));
    }
    entries.iter().map(|e| hash_digest(&e.hash)).collect()
}

fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => combine(left, right),
            [single] => combine(single, single),
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Get Merkle root hash
pub fn merkle_root(entries: &[LogEntry]) -> Result<String> {
    let mut level = leaves(entries)?;
    while level.len() > 1 {
        level = next_level(&level);
    }
    let root = to_hash_string(&level[0]);
    debug!("Merkle root over {} entries: {}", entries.len(), root);
    Ok(root)
}

/// Verify Merkle root against entries
pub fn verify_merkle_root(entries: &[LogEntry], claimed_root: &str) -> Result<bool> {
    Ok(merkle_root(entries)? == claimed_root)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingSide {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub side: SiblingSide,
    pub hash: String,
}

/// Merkle inclusion proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: String,
    pub steps: Vec<ProofStep>,
    pub root_hash: String,
}

/// Generate Merkle proof for the entry at `index` within `entries`
pub fn generate_merkle_proof(entries: &[LogEntry], index: usize) -> Result<MerkleProof> {
    if index >= entries.len() {
        return Err(LogError::CryptoError(format!(
            "Entry index {} out of range ({} entries)",
            index,
            entries.len()
        )));
    }

    let mut level = leaves(entries)?;
    let mut position = index;
    let mut steps = Vec::new();

    while level.len() > 1 {
        let step = if position % 2 == 0 {
            let sibling = level.get(position + 1).unwrap_or(&level[position]);
            ProofStep {
                side: SiblingSide::Right,
                hash: to_hash_string(sibling),
            }
        } else {
            ProofStep {
                side: SiblingSide::Left,
                hash: to_hash_string(&level[position - 1]),
            }
        };
        steps.push(step);
        level = next_level(&level);
        position /= 2;
    }

    Ok(MerkleProof {
        leaf_hash: entries[index].hash.clone(),
        steps,
        root_hash: to_hash_string(&level[0]),
    })
}

/// Check that `proof` links its leaf to its root
pub fn verify_merkle_proof(proof: &MerkleProof) -> Result<bool> {
    let mut current = hash_digest(&proof.leaf_hash)?;
    for step in &proof.steps {
        let sibling = hash_digest(&step.hash)?;
        current = match step.side {
            SiblingSide::Left => combine(&sibling, &current),
            SiblingSide::Right => combine(&current, &sibling),
        };
    }
    Ok(to_hash_string(&current) == proof.root_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::builder::EntryBuilder;
    use crate::audit::payload::{EntryKind, EntryPayload};
    use crate::store::TailCursor;
    use serde_json::json;

    fn entries(count: usize) -> Vec<LogEntry> {
        let builder = EntryBuilder::unsigned();
        let mut cursor = TailCursor::genesis();
        let mut out = Vec::new();
        for i in 0..count {
            let payload = EntryPayload::from_value(
                EntryKind::Decision,
                json!({"symbol": "BTC", "action": "hold", "edge_bps": i as f64}),
            )
            .unwrap();
            let entry = builder.build_payload(payload, &cursor).unwrap();
            cursor = TailCursor::of(&entry);
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_single_entry_root_is_leaf() {
        let entries = entries(1);
        let leaf = hash_digest(&entries[0].hash).unwrap();
        assert_eq!(merkle_root(&entries).unwrap(), to_hash_string(&leaf));
    }

    #[test]
    fn test_root_changes_with_content() {
        let a = entries(4);
        let b = entries(5);
        assert_ne!(merkle_root(&a).unwrap(), merkle_root(&b).unwrap());
        assert!(verify_merkle_root(&a, &merkle_root(&a).unwrap()).unwrap());
    }

    #[test]
    fn test_duplicated_last_leaf_shares_root() {
        let three = entries(3);
        let mut four = three.clone();
        four.push(three[2].clone());
        assert_eq!(merkle_root(&three).unwrap(), merkle_root(&four).unwrap());
    }

    #[test]
    fn test_proofs_verify_for_every_leaf() {
        let entries = entries(7);
        let root = merkle_root(&entries).unwrap();
        for index in 0..entries.len() {
            let proof = generate_merkle_proof(&entries, index).unwrap();
            assert_eq!(proof.root_hash, root);
            assert!(verify_merkle_proof(&proof).unwrap(), "leaf {}", index);
        }
    }

    #[test]
    fn test_tampered_proof_fails() {
        let entries = entries(4);
        let mut proof = generate_merkle_proof(&entries, 2).unwrap();
        proof.leaf_hash = entries[1].hash.clone();
        assert!(!verify_merkle_proof(&proof).unwrap());
    }

    #[test]
    fn test_empty_and_out_of_range() {
        assert!(merkle_root(&[]).is_err());
        assert!(generate_merkle_proof(&entries(2), 2).is_err());
    }
}
