//! Anchoring and PnL summary over a live store

mod common;

use agent_perflog::analytics::pnl_summary;
use agent_perflog::anchor::{matches_digest, prepare_anchor, AnchorDecision};
use agent_perflog::audit::{
    generate_merkle_proof, verify_merkle_proof, ChainVerifier, EntryBuilder, EntryKind,
    VerificationResult,
};
use agent_perflog::crypto::AgentSigner;
use agent_perflog::store::LogRange;
use common::*;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_anchor_valid_range() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = open_file_store(&log_path(&dir)).await;
    let builder = signed_builder();
    for i in 0..6 {
        store
            .record(&builder, EntryKind::Decision, decision_payload(i as f64))
            .await?;
    }

    let decision = prepare_anchor(&store, "agent-test", LogRange::new(2, 6), &ChainVerifier::new()).await?;
    let digest = decision.digest().cloned().ok_or("expected a digest")?;
    assert_eq!(digest.start, 2);
    assert_eq!(digest.end, 6);
    assert_eq!(digest.entry_count, 4);
    assert_eq!(digest.head_sequence, 5);

    let entries = store.read(LogRange::new(2, 6)).await?;
    assert!(matches_digest(&digest, &entries)?);

    let proof = generate_merkle_proof(&entries, 1)?;
    assert_eq!(proof.root_hash, digest.merkle_root);
    assert!(verify_merkle_proof(&proof)?);
    Ok(())
}

#[tokio::test]
async fn test_anchor_refuses_tampered_range() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = log_path(&dir);
    {
        let store = open_file_store(&path).await;
        let builder = signed_builder();
        store
            .record(&builder, EntryKind::Trade, trade_payload(71000.0, None))
            .await?;
        store
            .record(&builder, EntryKind::Trade, trade_payload(71500.0, Some(50.0)))
            .await?;
    }

    let contents = std::fs::read_to_string(&path)?;
    std::fs::write(&path, contents.replacen("\"fee\":3.55", "\"fee\":0.0", 1))?;

    let store = open_file_store(&path).await;
    let decision = prepare_anchor(&store, "agent-test", LogRange::through(2), &ChainVerifier::new()).await?;
    match decision {
        AnchorDecision::Refused(report) => {
            assert_eq!(report.result, VerificationResult::BrokenLink(1));
            assert_eq!(report.untrusted, vec![1, 2]);
        }
        other => panic!("expected refusal, got {:?}", other),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_anchor_never_covers_concurrent_append() -> Result<(), Box<dyn std::error::Error>> {
    let verifier = ChainVerifier::with_trusted_signers([test_signer().public_key_hex()]);

    for _ in 0..40 {
        let dir = TempDir::new()?;
        let store = Arc::new(open_file_store(&log_path(&dir)).await);
        let builder = signed_builder();
        for i in 0..3 {
            store
                .record(&builder, EntryKind::Decision, decision_payload(i as f64))
                .await?;
        }

        let intruder = Arc::clone(&store);
        let append = tokio::spawn(async move {
            intruder
                .record(
                    &EntryBuilder::signed(AgentSigner::generate()),
                    EntryKind::Decision,
                    decision_payload(99.0),
                )
                .await
        });
        let decision = prepare_anchor(&store, "agent-test", LogRange::new(1, u64::MAX), &verifier).await?;
        append.await??;

        match decision {
            AnchorDecision::Ready(digest) => {
                assert_eq!(digest.head_sequence, 3);
                assert_eq!(digest.entry_count, 3);
                assert!(matches_digest(&digest, &store.read(LogRange::new(1, 4)).await?)?);
            }
            AnchorDecision::Refused(report) => {
                assert_eq!(report.result, VerificationResult::BadSignature(4));
            }
            AnchorDecision::Empty => panic!("range holds committed entries"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_anchor_empty_range() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = open_file_store(&log_path(&dir)).await;
    let decision = prepare_anchor(&store, "agent-test", LogRange::through(0), &ChainVerifier::new()).await?;
    assert!(matches!(decision, AnchorDecision::Empty));
    Ok(())
}

#[tokio::test]
async fn test_pnl_summary_from_store() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let store = open_file_store(&log_path(&dir)).await;
    let builder = signed_builder();

    store
        .record(&builder, EntryKind::Trade, trade_payload(71000.0, None))
        .await?;
    store
        .record(&builder, EntryKind::Trade, trade_payload(71200.0, Some(20.0)))
        .await?;
    store
        .record(&builder, EntryKind::Trade, trade_payload(70900.0, Some(-30.0)))
        .await?;
    store
        .record(&builder, EntryKind::Snapshot, snapshot_payload(-10.0))
        .await?;

    let summary = pnl_summary(&store, 24.0).await?;
    assert_eq!(summary.closed_trades, 2);
    assert_eq!(summary.cumulative_pnl, -10.0);
    assert_eq!(summary.realized_pnl_window, -10.0);
    assert_eq!(summary.max_drawdown, 30.0);
    assert_eq!(
        summary.latest_snapshot.map(|s| s.cumulative_pnl),
        Some(-10.0)
    );

    assert!(pnl_summary(&store, 0.0).await.is_err());

    let everything = pnl_summary(&store, 1e15).await?;
    assert_eq!(everything.realized_pnl_window, -10.0);
    Ok(())
}
