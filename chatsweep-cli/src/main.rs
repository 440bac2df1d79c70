//! chatsweep: removes duplicate two-party chats from the configured store.
//!
//! For every unordered participant pair with more than one chat, the oldest
//! chat is kept and the others are deleted one at a time.
//!
//! # Exit status
//! - `0` — sweep finished (per-record delete failures are logged only)
//! - `1` — config, store construction or the initial fetch failed
//! - `2` — `--strict` and at least one delete failed

use chatsweep_core::{Resolver, SweepConfig, SweepReport};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

const EXIT_DELETE_FAILURES: i32 = 2;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "chatsweep",
    version,
    about = "Remove duplicate two-party chats, keeping the oldest per participant pair"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "CHATSWEEP_CONFIG", default_value = "chatsweep.toml")]
    config: String,

    /// Plan only: report what would be deleted without deleting
    #[arg(long)]
    dry_run: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Exit with status 2 if any deletion failed
    #[arg(long)]
    strict: bool,
}

// ============================================================================
// Output
// ============================================================================

fn render_summary(report: &SweepReport) -> String {
    let mut out = String::new();
    let verb = if report.dry_run { "would delete" } else { "deleted" };

    out.push_str(&format!(
        "Fetched {} chats from {} ({} two-party, {} skipped)\n",
        report.total_fetched, report.store, report.two_party, report.skipped
    ));
    for group in &report.groups {
        out.push_str(&format!(
            "  {}: kept {}, {} {}\n",
            group.key,
            group.kept,
            verb,
            group.marked.join(", ")
        ));
    }
    if report.dry_run {
        out.push_str(&format!(
            "Dry run: {} duplicate chats in {} groups, nothing deleted\n",
            report.marked, report.duplicate_groups
        ));
    } else {
        out.push_str(&format!(
            "Deleted {} of {} duplicate chats in {} groups\n",
            report.deleted, report.marked, report.duplicate_groups
        ));
    }
    for failure in &report.failures {
        out.push_str(&format!("  failed {}: {}\n", failure.id, failure.error));
    }
    out
}

fn exit_code(report: &SweepReport, strict: bool) -> i32 {
    if strict && report.has_failures() {
        EXIT_DELETE_FAILURES
    } else {
        0
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (store credentials during local runs)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = match SweepConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    if args.dry_run {
        config.resolver.dry_run = true;
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    tracing::info!(
        config = %args.config,
        backend = ?config.store.backend,
        "Loaded config"
    );

    let resolver = match Resolver::from_config(&config).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to open {:?} store: {}", config.store.backend, e);
            std::process::exit(1);
        }
    };

    let report = match resolver.run().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Sweep aborted: {}", e);
            std::process::exit(1);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_summary(&report));
    }

    let code = exit_code(&report, args.strict);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
