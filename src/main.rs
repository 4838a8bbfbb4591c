//! Shapelog CLI
//!
//! Command-line interface for shapelog stores:
//! - Append records from JSON
//! - Build and list day indexes
//! - Run windowed queries
//! - Dump day logs

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use serde::Serialize;
use shapelog::config::{generate_default_config, Config, LoadReport, LoggingConfig};
use shapelog::storage::calendar;
use shapelog::{IndexEntry, ProductKind, ReadMode, ShapeRecord, ShapeStore};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "shapelog")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Indexed per-day store for meteorological shape records")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/shapelog/config.toml or ./shapelog.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log directory, overriding the config file
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log series suffix, overriding the config file
    #[arg(short, long, global = true)]
    pub suffix: Option<String>,

    /// Output format (table, json, csv)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Append records read as JSON, one per line
    Append {
        /// Input file (default: stdin)
        input: Option<PathBuf>,
    },

    /// Bring a day's index up to date and list its entries
    Index {
        /// Day as YYYYMMDD
        day: String,
    },

    /// Find records around a time
    Query {
        /// Read mode: closest, closest_before, closest_after, all
        #[arg(short, long, default_value = "closest")]
        mode: String,
        /// Target time. Supports Unix seconds, RFC 3339, "YYYY-MM-DD HH:MM:SS"
        time: String,
        /// Window half-width in seconds
        #[arg(short, long)]
        window: Option<i64>,
        /// Wanted lead time in seconds (0 selects each record's first object)
        #[arg(short, long, default_value = "0")]
        lead: i64,
        /// Lead time tolerance in seconds
        #[arg(short, long)]
        tolerance: Option<i64>,
        /// Only records of this product type
        #[arg(short, long)]
        kind: Option<String>,
        /// Print execution statistics
        #[arg(long)]
        stats: bool,
    },

    /// Print every record of a day's log
    Dump {
        /// Day as YYYYMMDD
        day: String,
    },

    /// Show store statistics
    Stats,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, report) = match &cli.config {
        Some(path) => (Config::load(path)?, LoadReport::from_file(path)),
        None => Config::load_default(),
    };
    init_logging(&config.logging);
    report.log();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Config written to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut store_config = config.store_config();
    if let Some(dir) = &cli.data_dir {
        store_config.data_dir = dir.clone();
    }
    if let Some(suffix) = &cli.suffix {
        store_config.suffix = suffix.clone();
    }
    let store = ShapeStore::open(store_config).context("opening store")?;

    match cli.command {
        Commands::Append { input } => {
            let reader: Box<dyn BufRead> = match &input {
                Some(path) => Box::new(BufReader::new(
                    std::fs::File::open(path)
                        .with_context(|| format!("opening {}", path.display()))?,
                )),
                None => Box::new(BufReader::new(std::io::stdin())),
            };

            let mut appended = 0usize;
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: ShapeRecord = serde_json::from_str(&line)
                    .with_context(|| format!("line {}: not a shape record", line_no + 1))?;
                let offset = store
                    .append(&record)
                    .with_context(|| format!("line {}: append failed", line_no + 1))?;
                tracing::debug!(data_time = record.data_time, offset, "appended");
                appended += 1;
            }

            println!("Appended {} records", appended);
        }

        Commands::Index { day } => {
            let day = parse_day(&day)?;
            let index = store.ensure_index(day)?;

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(index.as_ref())?),
                "csv" => write_csv(&index.entries)?,
                _ => print_index_table(&index.entries, index.observed_log_length),
            }
        }

        Commands::Query {
            mode,
            time,
            window,
            lead,
            tolerance,
            kind,
            stats,
        } => {
            let mode: ReadMode = mode.parse()?;
            let target = parse_time(&time)?;

            let mut request = store
                .request(mode, target)
                .window(window.unwrap_or(config.query.default_window_secs))
                .lead(
                    lead,
                    tolerance.unwrap_or(config.query.default_lead_tolerance_secs),
                );
            if let Some(kind) = kind {
                request = request.kind(ProductKind::parse(&kind));
            }

            let outcome = store.query_detailed(&request)?;

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&outcome.records)?),
                "csv" => {
                    let rows: Vec<RecordRow> = outcome.records.iter().map(RecordRow::from).collect();
                    write_csv(&rows)?;
                }
                _ => print_record_table(&outcome.records),
            }

            if stats {
                eprintln!(
                    "{} records in {} ms ({} days, {} entries considered, {} read, {} corrupt{})",
                    outcome.len(),
                    outcome.execution_time_ms,
                    outcome.days_searched,
                    outcome.entries_considered,
                    outcome.records_read,
                    outcome.corrupt_skipped,
                    if outcome.used_midnight_fallback {
                        ", previous day searched"
                    } else {
                        ""
                    }
                );
            }
        }

        Commands::Dump { day } => {
            let day = parse_day(&day)?;
            let mut scanner = store.scan_day(day)?;
            let mut records = Vec::new();

            for item in scanner.by_ref() {
                match item {
                    Ok((record, _)) => records.push(record),
                    Err(e) if e.is_format() => eprintln!("skipped: {}", e),
                    Err(e) => return Err(e.into()),
                }
            }

            match cli.format.as_str() {
                "json" => {
                    let stdout = std::io::stdout();
                    let mut out = stdout.lock();
                    for record in &records {
                        serde_json::to_writer(&mut out, record)?;
                        writeln!(out)?;
                    }
                }
                "csv" => {
                    let rows: Vec<RecordRow> = records.iter().map(RecordRow::from).collect();
                    write_csv(&rows)?;
                }
                _ => print_record_table(&records),
            }

            if let Some(offset) = scanner.truncated_at() {
                eprintln!("incomplete record at byte {}", offset);
            }
        }

        Commands::Stats => {
            let stats = store.stats()?;
            match cli.format.as_str() {
                "json" => println!(
                    "{}",
                    serde_json::json!({
                        "data_dir": store.data_dir(),
                        "suffix": store.config().suffix,
                        "day_count": stats.day_count,
                        "log_bytes": stats.log_bytes,
                        "cached_indexes": stats.cached_indexes,
                        "maintenance": stats.maintenance,
                    })
                ),
                _ => {
                    println!("Store: {} (*.{})", store.data_dir().display(), store.config().suffix);
                    println!("{}", stats);
                }
            }
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shapelog={}", config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn parse_day(stamp: &str) -> Result<chrono::NaiveDate> {
    match calendar::parse_day_stamp(stamp) {
        Some(day) => Ok(day),
        None => bail!("Invalid day '{}'. Use YYYYMMDD", stamp),
    }
}

fn parse_time(s: &str) -> Result<i64> {
    if let Ok(ts) = s.parse::<i64>() {
        return Ok(ts);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y%m%d%H%M%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, pattern) {
            return Ok(naive.and_utc().timestamp());
        }
    }
    bail!("Invalid time '{}'. Use Unix seconds, RFC 3339 or 'YYYY-MM-DD HH:MM:SS'", s)
}

/// Flat summary of a record for csv output
#[derive(Serialize)]
struct RecordRow {
    data_time: i64,
    kind: String,
    sub_kind: String,
    group_id: i64,
    sequence_number: i64,
    objects: usize,
    first_label: String,
    first_lead: i64,
    points: usize,
}

impl From<&ShapeRecord> for RecordRow {
    fn from(record: &ShapeRecord) -> Self {
        let first = record.objects.first();
        Self {
            data_time: record.data_time,
            kind: record.kind.to_string(),
            sub_kind: record.sub_kind.to_string(),
            group_id: record.group_id,
            sequence_number: record.sequence_number,
            objects: record.objects.len(),
            first_label: first.map(|o| o.label.clone()).unwrap_or_default(),
            first_lead: record.first_lead(),
            points: first.map(|o| o.len()).unwrap_or(0),
        }
    }
}

fn write_csv<T: Serialize>(rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn print_index_table(entries: &[IndexEntry], log_length: u64) {
    println!("Log length: {} bytes, {} entries", log_length, entries.len());
    if entries.is_empty() {
        return;
    }

    println!(
        "{:<22} | {:>8} | {:>12} | {}",
        "Data time", "Lead", "Offset", "Type"
    );
    println!("{}", "-".repeat(64));
    for entry in entries {
        println!(
            "{:<22} | {:>8} | {:>12} | {}",
            calendar::display(entry.data_time),
            entry.lead_seconds,
            entry.byte_offset,
            entry.kind
        );
    }
}

fn print_record_table(records: &[ShapeRecord]) {
    if records.is_empty() {
        println!("No records");
        return;
    }

    println!(
        "{:<22} | {:<16} | {:<12} | {:>7} | {:<12} | {:>6}",
        "Data time", "Type", "Sub-type", "Objects", "Label", "Lead"
    );
    println!("{}", "-".repeat(90));
    for record in records {
        let row = RecordRow::from(record);
        println!(
            "{:<22} | {:<16} | {:<12} | {:>7} | {:<12} | {:>6}",
            calendar::display(row.data_time),
            row.kind,
            row.sub_kind,
            row.objects,
            row.first_label,
            row.first_lead
        );
    }
}
