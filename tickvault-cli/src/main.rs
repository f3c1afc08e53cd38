//! tickvault CLI: ingest, transform and scan daily market data.
//!
//! Commands:
//! - `ingest`: fetch configured tickers and write raw CSV partitions
//! - `transform`: rebuild the processed Parquet dataset from the raw store
//! - `run`: ingest, then transform
//! - `scan`: read the processed dataset with optional ticker/year pruning
//! - `config`: print the effective configuration as TOML

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use tickvault_core::data::{
    PartitionFilter, ProcessedRecord, ProcessedStore, PROCESSED_COLUMNS,
};
use tickvault_runner::config::{FailurePolicy, PipelineConfig};
use tickvault_runner::{
    build_source, init_logging, run_ingest, run_pipeline, run_transform, IngestSummary,
    TracingProgress, TransformReport,
};

#[derive(Parser)]
#[command(
    name = "tickvault",
    about = "tickvault: daily market data ingestion and partitioned storage"
)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct IngestArgs {
    /// Tickers to ingest (e.g., --tickers AAPL,MSFT). Overrides the config.
    #[arg(long, value_delimiter = ',')]
    tickers: Vec<String>,

    /// Start date (YYYY-MM-DD). Overrides the config.
    #[arg(long)]
    start: Option<String>,

    /// End date, inclusive (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<String>,

    /// Record per-ticker failures and continue instead of aborting.
    #[arg(long, default_value_t = false)]
    lenient: bool,

    /// Use the offline synthetic source instead of Yahoo Finance.
    #[arg(long, default_value_t = false)]
    synthetic: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch tickers and write raw partitions.
    Ingest(IngestArgs),
    /// Rebuild the processed dataset from all raw partitions.
    Transform,
    /// Ingest, then transform.
    Run(IngestArgs),
    /// Read the processed dataset.
    Scan {
        /// Only this ticker.
        #[arg(long)]
        ticker: Option<String>,

        /// Only this year.
        #[arg(long)]
        year: Option<i32>,

        /// Print rows instead of a per-partition summary.
        #[arg(long, default_value_t = false)]
        rows: bool,
    },
    /// Print the effective configuration as TOML.
    Config(IngestArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("WARNING: logging not initialized: {e}");
    }
    tracing::debug!(
        raw = %config.storage.raw_dir.display(),
        processed = %config.storage.processed_dir.display(),
        "configuration loaded"
    );

    match cli.command {
        Commands::Ingest(args) => {
            apply_overrides(&mut config, &args)?;
            run_ingest_cmd(&config, args.synthetic)
        }
        Commands::Transform => run_transform_cmd(&config),
        Commands::Run(args) => {
            apply_overrides(&mut config, &args)?;
            run_pipeline_cmd(&config, args.synthetic)
        }
        Commands::Scan { ticker, year, rows } => run_scan(&config, ticker, year, rows),
        Commands::Config(args) => {
            apply_overrides(&mut config, &args)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

/// CLI flags win over file values.
fn apply_overrides(config: &mut PipelineConfig, args: &IngestArgs) -> Result<()> {
    if !args.tickers.is_empty() {
        config.ingest.tickers = args
            .tickers
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }
    if let Some(start) = &args.start {
        config.ingest.start_date = parse_date(start)?;
    }
    if let Some(end) = &args.end {
        config.ingest.end_date = Some(parse_date(end)?);
    }
    if args.lenient {
        config.ingest.failure_policy = FailurePolicy::Lenient;
    }
    config.validate()?;
    Ok(())
}

fn run_ingest_cmd(config: &PipelineConfig, synthetic: bool) -> Result<()> {
    let source = build_source(config, synthetic)?;
    let summary = run_ingest(config, source.as_ref(), &TracingProgress, None)?;

    println!(
        "Ingested {}/{} tickers ({} rows) into {}",
        summary.written.len(),
        summary.attempted.len(),
        summary.rows_written,
        config.storage.raw_dir.display()
    );
    exit_on_failures(&summary);
    Ok(())
}

fn run_transform_cmd(config: &PipelineConfig) -> Result<()> {
    let report = run_transform(config)?;
    print_transform_report(config, &report);
    Ok(())
}

fn run_pipeline_cmd(config: &PipelineConfig, synthetic: bool) -> Result<()> {
    let source = build_source(config, synthetic)?;
    let report = run_pipeline(config, source.as_ref(), &TracingProgress, None)?;

    println!(
        "Ingested {}/{} tickers ({} rows)",
        report.ingest.written.len(),
        report.ingest.attempted.len(),
        report.ingest.rows_written
    );
    print_transform_report(config, &report.transform);
    exit_on_failures(&report.ingest);
    Ok(())
}

fn print_transform_report(config: &PipelineConfig, report: &TransformReport) {
    let stats = &report.stats;
    println!(
        "Transformed {} partitions: {} rows read, {} invalid, {} duplicates, {} written",
        stats.partitions, stats.rows_read, stats.rows_invalid, stats.rows_duplicate, stats.rows_out
    );
    println!(
        "Processed dataset: {} partitions at {} (hash {})",
        report.manifest.partitions.len(),
        config.storage.processed_dir.display(),
        &report.manifest.content_hash[..16.min(report.manifest.content_hash.len())]
    );
}

/// Lenient runs finish their work, then report per-ticker failures with a non-zero exit.
fn exit_on_failures(summary: &IngestSummary) {
    if summary.all_succeeded() {
        return;
    }
    for failure in &summary.failures {
        eprintln!("Error for {}: {}", failure.ticker, failure.error);
    }
    std::process::exit(1);
}

fn run_scan(
    config: &PipelineConfig,
    ticker: Option<String>,
    year: Option<i32>,
    rows: bool,
) -> Result<()> {
    let store = ProcessedStore::new(&config.storage.processed_dir);
    let filter = PartitionFilter { ticker, year };

    if store.manifest()?.is_none() {
        bail!(
            "no processed dataset at {}; run `tickvault transform` first",
            config.storage.processed_dir.display()
        );
    }

    let records = store.scan(&filter)?;

    if rows {
        write_rows(io::stdout().lock(), &records)?;
        return Ok(());
    }

    println!("{:<12} {:>6} {:>8} {:>12} {:>12}", "TICKER", "YEAR", "ROWS", "FIRST", "LAST");
    let mut start = 0;
    while start < records.len() {
        let key = records[start].partition_key();
        let len = records[start..]
            .iter()
            .take_while(|r| r.ticker == key.ticker && r.year == key.year)
            .count();
        let group = &records[start..start + len];
        println!(
            "{:<12} {:>6} {:>8} {:>12} {:>12}",
            key.ticker,
            key.year,
            len,
            group[0].date,
            group[len - 1].date
        );
        start += len;
    }
    println!("{} rows", records.len());
    Ok(())
}

/// Records as CSV with the processed column order and a header row.
fn write_rows<W: io::Write>(out: W, records: &[ProcessedRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(PROCESSED_COLUMNS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
