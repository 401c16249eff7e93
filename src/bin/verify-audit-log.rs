use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info, warn};

use agent_perflog::audit::{merkle_root, verify_merkle_root, ChainVerifier, LogEntry, VerificationResult};
use agent_perflog::export::parse_ndjson_recovering;

/// Damaged trailing records skipped before refusing to verify; one covers a
/// line torn by a crash mid-append.
const TORN_TAIL_TOLERANCE: usize = 1;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-audit-log")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify an agent performance log or NDJSON export")
        .arg(
            Arg::new("log-path")
                .short('l')
                .long("log-path")
                .value_name("PATH")
                .help("Path to the log file or export")
                .required(true),
        )
        .arg(
            Arg::new("merkle-root")
                .short('m')
                .long("merkle-root")
                .value_name("HASH")
                .help("Expected Merkle root hash"),
        )
        .arg(
            Arg::new("entry-count")
                .short('n')
                .long("entry-count")
                .value_name("N")
                .value_parser(clap::value_parser!(u64))
                .help("Expected number of entries covered by the Merkle root"),
        )
        .arg(
            Arg::new("trusted-signer")
                .short('t')
                .long("trusted-signer")
                .value_name("PUBKEY")
                .action(ArgAction::Append)
                .help("Hex public key accepted as signer (repeatable)"),
        )
        .arg(
            Arg::new("allow-unsigned")
                .long("allow-unsigned")
                .action(ArgAction::SetTrue)
                .help("Accept a chain whose only finding is unsigned entries"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let log_path = matches
        .get_one::<String>("log-path")
        .ok_or_else(|| anyhow!("--log-path is required"))?;
    let expected_merkle_root = matches.get_one::<String>("merkle-root");
    let expected_count = matches.get_one::<u64>("entry-count").copied();
    let trusted: Vec<String> = matches
        .get_many::<String>("trusted-signer")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let allow_unsigned = matches.get_flag("allow-unsigned");
    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = verify_log_file(
        log_path,
        expected_merkle_root,
        expected_count,
        &trusted,
        allow_unsigned,
        verbose,
    )
    .await {
        error!("Log verification failed: {}", e);
        std::process::exit(1);
    }

    if !quiet {
        println!("✓ Log verification completed successfully");
    }

    Ok(())
}

async fn verify_log_file(
    log_path: &str,
    expected_merkle_root: Option<&String>,
    expected_count: Option<u64>,
    trusted: &[String],
    allow_unsigned: bool,
    verbose: bool,
) -> Result<()> {
    info!("Verifying log: {}", log_path);

    if !Path::new(log_path).exists() {
        return Err(anyhow!("Log file not found: {}", log_path));
    }

    let bytes = tokio::fs::read(log_path).await?;
    let (entries, recovered) = parse_ndjson_recovering(&bytes, TORN_TAIL_TOLERANCE)?;
    if !recovered.is_clean() {
        warn!(
            "Skipped {} damaged trailing record(s) after entry #{}",
            recovered.discarded, recovered.kept
        );
        println!(
            "⚠ Ignoring {} incomplete or undecodable trailing record(s)",
            recovered.discarded
        );
    }

    if entries.is_empty() {
        return Err(anyhow!("Log is empty"));
    }

    if verbose {
        println!("Loaded {} log entries", entries.len());
    }

    let verifier = ChainVerifier::with_trusted_signers(trusted.iter().cloned());
    let report = verifier.audit(&entries, None);
    let accepted = report.result.is_valid()
        || (allow_unsigned && matches!(report.result, VerificationResult::Unsigned(_)));
    if !accepted {
        if !report.untrusted.is_empty() {
            println!("Untrusted entries: {:?}", report.untrusted);
        }
        return Err(anyhow!("Chain verification failed: {}", report.summary()));
    }

    if verbose {
        println!("✓ Hash chain and signatures verified");
    }

    let root = merkle_root(&entries)?;
    if verbose {
        println!("Merkle root: {}", root);
    }

    if let Some(expected) = expected_merkle_root {
        info!("Verifying Merkle root against expected value");
        if !verify_merkle_root(&entries, expected)? {
            return Err(anyhow!("Merkle root mismatch. Expected: {}, Got: {}", expected, root));
        }
        if verbose {
            println!("✓ Merkle root matches expected value");
        }
    }

    // Odd levels pair their last node with itself, so equal roots can still
    // cover different entry counts.
    if let Some(expected) = expected_count {
        if entries.len() as u64 != expected {
            return Err(anyhow!(
                "Entry count mismatch. Expected: {}, Got: {}",
                expected,
                entries.len()
            ));
        }
    }

    if verbose {
        let head = &entries[entries.len() - 1];
        println!("\nLog Summary:");
        println!("  Total entries: {}", entries.len());
        println!("  Sequences: #{}..=#{}", entries[0].sequence, head.sequence);
        println!("  First entry: {}", entries[0].timestamp);
        println!("  Last entry: {}", head.timestamp);
        println!("  Merkle root: {}", root);
        println!("  Head hash: {}", head.hash);
    }

    check_log_health(&entries, verbose);
    Ok(())
}

/// Report timestamp gaps and the kind distribution; never fails.
fn check_log_health(entries: &[LogEntry], verbose: bool) {
    if !verbose {
        return;
    }

    let regressions = entries
        .windows(2)
        .filter(|pair| pair[1].timestamp < pair[0].timestamp)
        .count();
    if regressions > 0 {
        println!("⚠ {} entries are stamped before their predecessor", regressions);
    }

    let gaps: Vec<_> = entries
        .windows(2)
        .filter_map(|pair| {
            let gap = pair[1].timestamp - pair[0].timestamp;
            (gap.num_hours() > 1).then_some((pair[1].sequence, gap.num_hours()))
        })
        .collect();
    if !gaps.is_empty() {
        println!("⚠ Found {} timestamp gaps:", gaps.len());
        for (sequence, hours) in gaps {
            println!("  Entry #{}: {} hours gap", sequence, hours);
        }
    }

    let mut kinds = BTreeMap::new();
    for entry in entries {
        *kinds.entry(entry.kind().as_str()).or_insert(0) += 1;
    }
    println!("\nEntry kind distribution:");
    for (kind, count) in kinds {
        println!("  {}: {}", kind, count);
    }
}
