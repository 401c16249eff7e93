//! Operator CLI for the agent performance log

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_perflog::analytics::pnl_summary;
use agent_perflog::anchor::{prepare_anchor, AnchorDecision};
use agent_perflog::audit::{ChainVerifier, EntryBuilder, EntryKind};
use agent_perflog::crypto::AgentSigner;
use agent_perflog::export::{export_tail, export_tail_to_file};
use agent_perflog::settings::AppConfig;
use agent_perflog::store::{LogRange, LogStore};

#[derive(Parser)]
#[command(name = "perflog")]
#[command(about = "Append-only, tamper-evident performance log for trading agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); PERFLOG__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,

    /// Generate a signing key and print its public key
    Keygen {
        /// Where to write the secret key; defaults to signing.key_path
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Append one entry
    Record {
        /// Entry kind (decision, trade, snapshot)
        #[arg(short, long)]
        kind: EntryKind,

        /// Payload as a JSON object
        #[arg(short, long)]
        payload: String,
    },

    /// Print the last entries
    Tail {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },

    /// Export the last entries as NDJSON
    Export {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Number of entries; defaults to export.tail_limit
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Verify a range of the chain
    Verify {
        /// First sequence (inclusive)
        #[arg(long, default_value_t = 1)]
        start: u64,

        /// Last sequence (exclusive); defaults to the end of the log
        #[arg(long)]
        end: Option<u64>,
    },

    /// Verify a range and print its anchor digest
    Anchor {
        #[arg(long, default_value_t = 1)]
        start: u64,

        #[arg(long)]
        end: Option<u64>,
    },

    /// PnL summary over closed trades
    Summary {
        #[arg(short, long, default_value_t = 24.0)]
        window_hours: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_perflog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
        Commands::Keygen { out } => {
            let path = out
                .or_else(|| config.signing.key_path.clone())
                .ok_or_else(|| anyhow!("No key path given and signing.key_path is not set"))?;
            let signer = AgentSigner::generate_to_file(&path)?;
            info!("Wrote signing key to {:?}", path);
            println!("{}", signer.public_key_hex());
        }
        Commands::Record { kind, payload } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            let store = LogStore::open(&config).await?;
            let builder = entry_builder(&config)?;
            let entry = store.record(&builder, kind, payload).await?;
            println!("{}", entry.to_json_line()?);
            store.close().await;
        }
        Commands::Tail { count } => {
            let store = LogStore::open(&config).await?;
            for entry in store.tail(count).await? {
                println!("{}", entry.summary());
            }
            store.close().await;
        }
        Commands::Export { out, count } => {
            let store = LogStore::open(&config).await?;
            let limit = count.unwrap_or(config.export.tail_limit);
            match out {
                Some(path) => {
                    export_tail_to_file(&store, limit, &path).await?;
                }
                None => print!("{}", export_tail(&store, limit).await?),
            }
            store.close().await;
        }
        Commands::Verify { start, end } => {
            let store = LogStore::open(&config).await?;
            let range = LogRange::new(start, end.unwrap_or(store.len().await + 1));
            let report = store.verify(range, &verifier(&config)).await?;
            store.close().await;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.result.is_valid() {
                return Err(anyhow!("Verification failed: {}", report.summary()));
            }
        }
        Commands::Anchor { start, end } => {
            let store = LogStore::open(&config).await?;
            let range = LogRange::new(start, end.unwrap_or(store.len().await + 1));
            let decision = prepare_anchor(&store, &config.agent_id, range, &verifier(&config)).await?;
            store.close().await;

            match decision {
                AnchorDecision::Ready(digest) => {
                    println!("{}", serde_json::to_string_pretty(&digest)?)
                }
                AnchorDecision::Refused(report) => {
                    return Err(anyhow!("Refusing to anchor: {}", report.summary()))
                }
                AnchorDecision::Empty => return Err(anyhow!("Nothing to anchor in range")),
            }
        }
        Commands::Summary { window_hours } => {
            let store = LogStore::open(&config).await?;
            let summary = pnl_summary(&store, window_hours).await?;
            store.close().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn entry_builder(config: &AppConfig) -> Result<EntryBuilder> {
    let signer = match &config.signing.key_path {
        Some(path) => Some(
            AgentSigner::load(path).with_context(|| format!("Failed to load key {:?}", path))?,
        ),
        None => None,
    };
    Ok(EntryBuilder::new(signer, config.store.allow_unsigned))
}

fn verifier(config: &AppConfig) -> ChainVerifier {
    ChainVerifier::with_trusted_signers(config.signing.trusted_signers.iter().cloned())
}
