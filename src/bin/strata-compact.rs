//! Command-line entrypoint for a single compaction run.
//!
//! Prints one line per requested table and exits non-zero when any table
//! failed or the run could not start.

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use strata::{
    option::{DEFAULT_LEDGER_TABLE, DEFAULT_MIN_ROWS_TO_COMPACT, DEFAULT_ROW_GROUP_SIZE},
    ArchiveCompression, CompactionStrategy, Compactor, CompactorOptions,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Move hot SQLite rows into immutable Parquet archives"
)]
struct Args {
    /// SQLite store to compact.
    store: PathBuf,
    /// Root directory archives are written under.
    output_dir: PathBuf,
    /// Tables to compact, in processing order.
    #[arg(required = true, num_args = 1..)]
    tables: Vec<String>,
    /// Rows a table must hold before it is compacted.
    #[arg(
        long,
        alias = "min_rows_to_compact",
        env = "STRATA_MIN_ROWS_TO_COMPACT",
        default_value_t = DEFAULT_MIN_ROWS_TO_COMPACT
    )]
    min_rows_to_compact: u64,
    /// Backend performing the atomic move: rename or script.
    #[arg(long, env = "STRATA_STRATEGY", default_value = "rename")]
    strategy: CompactionStrategy,
    /// Archive compression: zstd, gzip, snappy or none.
    #[arg(long, env = "STRATA_COMPRESSION", default_value = "zstd")]
    compression: ArchiveCompression,
    /// Maximum rows per Parquet row group.
    #[arg(long, env = "STRATA_ROW_GROUP_SIZE", default_value_t = DEFAULT_ROW_GROUP_SIZE)]
    row_group_size: usize,
    /// Name of the provenance ledger table.
    #[arg(long, env = "STRATA_LEDGER_TABLE", default_value = DEFAULT_LEDGER_TABLE)]
    ledger_table: String,
    /// Log level used when RUST_LOG is unset.
    #[arg(long, env = "STRATA_LOG_LEVEL", default_value = "info")]
    log_level: LevelFilter,
    /// Print the composed script for the eligible tables without running it.
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing(level: LevelFilter) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.log_level);

    let options = CompactorOptions::new(&args.store, &args.output_dir)
        .tables(args.tables)
        .min_rows_to_compact(args.min_rows_to_compact)
        .strategy(args.strategy)
        .compression(args.compression)
        .row_group_size(args.row_group_size)
        .ledger_table(args.ledger_table);
    let compactor = Compactor::new(options);

    if args.dry_run {
        let plan = compactor
            .plan()
            .with_context(|| format!("planning compaction of {}", args.store.display()))?;
        for table in plan.eligible() {
            println!("{}: would compact {} rows", table.name, table.rows);
        }
        for (table, outcome) in plan.settled() {
            println!("{table}: {outcome}");
        }
        println!("{}", plan.script());
        let failed = plan.settled().iter().any(|(_, outcome)| outcome.is_failed());
        return Ok(if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let report = compactor
        .compact()
        .with_context(|| format!("compacting {}", args.store.display()))?;
    for (table, outcome) in report.outcomes() {
        println!("{table}: {outcome}");
    }
    match report.reclaim_error() {
        Some(error) => eprintln!("warning: {error}"),
        None => println!(
            "run {}: moved {} rows, store {} -> {} bytes",
            report.run_id(),
            report.rows_moved(),
            report.size_before(),
            report.size_after()
        ),
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
