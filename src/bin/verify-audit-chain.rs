use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use audit_chain::api::AuditService;
use audit_chain::audit::{ChainHash, Checkpoint, ChainVerifier, VerificationReport};
use audit_chain::config::AppConfig;
use audit_chain::database::SqliteChainStore;

/// Verify audit chain integrity
#[derive(Parser, Debug)]
#[command(name = "verify-audit-chain", version, about = "Verify audit chain integrity")]
struct Args {
    /// Database URL (defaults to the configured one)
    #[arg(short = 'd', long)]
    database_url: Option<String>,

    /// Resume after this sequence id (requires --from-hash)
    #[arg(long, requires = "from_hash")]
    from_sequence: Option<i64>,

    /// Entry hash recorded for --from-sequence by an earlier pass
    #[arg(long, requires = "from_sequence")]
    from_hash: Option<String>,

    /// Stop after this many entries and print a resume checkpoint
    #[arg(long)]
    max_entries: Option<u64>,

    /// Expected Merkle root hash
    #[arg(short = 'm', long)]
    merkle_root: Option<String>,

    /// Number of leading entries the expected root was published over
    /// (defaults to the whole chain)
    #[arg(long, requires = "merkle_root")]
    anchor_entries: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Set log level based on flags
    let level = if args.quiet {
        tracing::Level::ERROR
    } else if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match verify_chain(&args).await {
        Ok(report) if report.valid => {
            if !args.quiet {
                println!("✓ {}", report.summary());
            }
            ExitCode::SUCCESS
        }
        Ok(report) => {
            error!("{}", report.summary());
            for err in &report.errors {
                eprintln!("  {}", err);
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Audit chain verification failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn verify_chain(args: &Args) -> Result<VerificationReport> {
    let mut config = AppConfig::load()?;
    if let Some(url) = &args.database_url {
        config.database_url = url.clone();
    }

    if let Some(path) = sqlite_file(&config.database_url) {
        if !Path::new(path).exists() {
            return Err(anyhow!("Audit database not found: {}", path));
        }
    }

    info!("Verifying audit chain: {}", config.database_url);
    let store = Arc::new(SqliteChainStore::connect(&config.database_url, 1).await?);
    let verifier = ChainVerifier::with_page_size(store.clone(), config.verify_page_size);

    let from = match (args.from_sequence, &args.from_hash) {
        (Some(sequence_id), Some(hash)) => Some(Checkpoint {
            sequence_id,
            entry_hash: hash.parse::<ChainHash>()?,
            // sequence ids are dense from 1
            entries_verified: sequence_id.max(0) as u64,
        }),
        _ => None,
    };

    let report = verifier.verify_bounded(from, args.max_entries).await?;

    if args.verbose {
        println!("Verified {} audit entries", report.total_entries);
        for warning in &report.warnings {
            println!("⚠ {}", warning);
        }
    }

    if !report.complete {
        if let Some(checkpoint) = &report.checkpoint {
            println!(
                "Pass incomplete, resume with: --from-sequence {} --from-hash {}",
                checkpoint.sequence_id, checkpoint.entry_hash
            );
        }
    }

    if let Some(expected) = &args.merkle_root {
        let expected: ChainHash = expected.parse()?;
        let service = AuditService::new(store, &config);
        let anchor = match args.anchor_entries {
            Some(entries) => service.anchor_at(entries).await?,
            None => service.anchor().await?,
        };

        if args.verbose {
            println!("Anchor: {}", anchor.summary());
        }

        if anchor.merkle_root != Some(expected) {
            return Err(anyhow!(
                "Merkle root mismatch. Expected: {}, Got: {}",
                expected,
                anchor
                    .merkle_root
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "none (empty chain)".to_string())
            ));
        }

        if args.verbose {
            println!("✓ Merkle root matches expected value");
        }
    }

    Ok(report)
}

/// File path behind a `sqlite://` URL, if it names one.
fn sqlite_file(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(path)
    }
}
