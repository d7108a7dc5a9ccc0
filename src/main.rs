//! Loglens CLI
//!
//! Administrative command-line interface for the log store:
//! - Sweep old records or wipe the store
//! - Show counters and the overview
//! - Ingest JSON-lines files or seed sample data
//! - Search and inspect requests
//! - Print the configuration

use anyhow::Context;
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use loglens::config::generate_default_config;
use loglens::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Records per ingest batch
const INGEST_BATCH: usize = 500;

#[derive(Parser)]
#[command(name = "loglens")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Request-grouped structured log store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete records older than N days (0 deletes everything)
    Clean {
        /// Retention in days (default: retention.days)
        #[arg(short, long)]
        days: Option<u32>,
        /// Keep sweeping every retention.sweep_interval_secs until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Show running counters and the recent-window overview
    Stats,

    /// Ingest records from a JSON-lines file
    Ingest {
        /// Path to the file, one record object per line
        path: PathBuf,
    },

    /// Insert generated sample requests
    Seed {
        /// Number of requests
        #[arg(short, long, default_value = "10")]
        requests: usize,
        /// Records per request
        #[arg(short = 'n', long, default_value = "5")]
        per_request: usize,
    },

    /// Search request groups
    Search {
        /// Request id substring
        #[arg(long)]
        request_id: Option<String>,
        /// Exact level
        #[arg(short, long)]
        level: Option<LogLevel>,
        /// Source ip substring
        #[arg(long)]
        ip: Option<String>,
        /// Module substring
        #[arg(short, long)]
        module: Option<String>,
        /// Earliest timestamp
        #[arg(long, value_parser = parse_time)]
        start: Option<NaiveDateTime>,
        /// Latest timestamp
        #[arg(long, value_parser = parse_time)]
        end: Option<NaiveDateTime>,
        /// Message keyword (case-insensitive)
        #[arg(short, long)]
        keyword: Option<String>,
        #[arg(short, long, default_value = "1")]
        page: usize,
        #[arg(long, default_value = "20")]
        page_size: usize,
    },

    /// Show every record of one request
    Detail {
        request_id: String,
    },

    /// Print the effective configuration, or a commented template
    Config {
        /// Print the default template instead
        #[arg(long)]
        default: bool,
    },
}

fn parse_time(s: &str) -> Result<NaiveDateTime, String> {
    keys::parse_timestamp(s).ok_or_else(|| format!("unparseable timestamp '{}'", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    init_tracing(&config.logging)?;

    if let Commands::Config { default } = cli.command {
        if default {
            print!("{}", generate_default_config());
        } else {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        return Ok(());
    }

    let service = LogService::open(&config)?;
    if !service.ping().await {
        anyhow::bail!("Store at {} is not reachable", config.store.path);
    }

    match cli.command {
        Commands::Clean { days, watch } => {
            let days = days.unwrap_or(config.retention.days);

            if watch {
                let every = config
                    .retention
                    .sweep_interval()
                    .context("retention.sweep_interval_secs must be set for --watch")?;
                if days == 0 {
                    anyhow::bail!("refusing to wipe the store on every tick; use a retention above 0 days");
                }

                let sweeper = Arc::clone(service.retention());
                let handle = sweeper.start_background_sweep(days, every);
                tracing::info!(days, interval_secs = every.as_secs(), "Sweeping until interrupted");

                tokio::signal::ctrl_c().await?;
                sweeper.shutdown().await;
                handle.await?;
            } else {
                let removed = service.clean(days).await;
                if days == 0 {
                    println!("Wiped store ({} records)", removed);
                } else {
                    println!("Removed {} records older than {} days", removed, days);
                }
            }
        }

        Commands::Stats => {
            let counters = service.counters().await;
            let overview = service.overview().await;

            if cli.format == "json" {
                let out = serde_json::json!({ "counters": counters, "overview": overview });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_stats(&counters, &overview);
            }
        }

        Commands::Ingest { path } => {
            let (ingested, rejected) = ingest_file(&service, &path).await?;
            println!("Ingested {} records ({} rejected)", ingested, rejected);
        }

        Commands::Seed {
            requests,
            per_request,
        } => {
            let records = seed_records(requests, per_request);
            service.insert_batch(&records).await;
            println!("Seeded {} requests ({} records)", requests, records.len());
        }

        Commands::Search {
            request_id,
            level,
            ip,
            module,
            start,
            end,
            keyword,
            page,
            page_size,
        } => {
            let params = SearchParams {
                request_id,
                level,
                ip,
                module,
                start_time: start,
                end_time: end,
                keyword,
                page,
                page_size,
            };
            params.validate()?;

            let result = service.search(&params).await;
            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_page(&result);
            }
        }

        Commands::Detail { request_id } => match service.detail(&request_id).await {
            Some(group) if cli.format == "json" => {
                println!("{}", serde_json::to_string_pretty(&group)?);
            }
            Some(group) => print_group(&group),
            None => {
                eprintln!("No records for request {}", request_id);
                std::process::exit(1);
            }
        },

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("loglens={}", config.level)));

    let (writer, ansi) = match &config.file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_ansi(ansi).with_writer(writer))
            .init();
    }

    Ok(())
}

/// Returns (ingested, rejected)
async fn ingest_file(service: &LogService, path: &Path) -> anyhow::Result<(usize, usize)> {
    let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    let reader = BufReader::new(file);

    let mut batch = Vec::with_capacity(INGEST_BATCH);
    let mut ingested = 0;
    let mut rejected = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed = serde_json::from_str::<RawLogRecord>(&line)
            .map_err(|e| LogError::validation(e.to_string()))
            .and_then(LogRecord::try_from);

        match parsed {
            Ok(record) => batch.push(record),
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping record");
                rejected += 1;
                continue;
            }
        }

        if batch.len() >= INGEST_BATCH {
            service.insert_batch(&batch).await;
            ingested += batch.len();
            batch.clear();
        }
    }

    if !batch.is_empty() {
        service.insert_batch(&batch).await;
        ingested += batch.len();
    }

    Ok((ingested, rejected))
}

fn seed_records(requests: usize, per_request: usize) -> Vec<LogRecord> {
    const MODULES: [&str; 4] = ["app.api", "app.auth", "app.db", "app.billing"];
    const LEVELS: [LogLevel; 6] = [
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Success,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
    ];

    let now = Utc::now().naive_utc();
    let mut records = Vec::with_capacity(requests * per_request);

    for r in 0..requests {
        let request_id = uuid::Uuid::new_v4().to_string();
        let ip = format!("10.0.{}.{}", r / 250, r % 250 + 1);
        let start = now - ChronoDuration::minutes((requests - r) as i64);

        for i in 0..per_request {
            let level = LEVELS[(r + i) % LEVELS.len()];
            let module = MODULES[i % MODULES.len()];
            records.push(
                LogRecord::new(
                    request_id.as_str(),
                    start + ChronoDuration::milliseconds(i as i64 * 15),
                    level,
                    format!("{} step {} of {}", module, i + 1, per_request),
                )
                .ip(ip.as_str())
                .location(module, "handle", (i + 1) as u32),
            );
        }
    }

    records
}

fn print_stats(counters: &GlobalCounters, overview: &GlobalStats) {
    println!("Loglens v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Counters:");
    println!("  Records inserted: {}", counters.total);
    println!("  Live records:     {}", counters.timeline_len);
    println!("  Requests:         {}", counters.unique_requests);
    println!("  Source ips:       {}", counters.unique_ips);
    for (level, count) in counters.levels.iter() {
        println!("  {:<17} {}", format!("{}:", level), count);
    }

    println!();
    println!("Recent window ({} records):", overview.total);
    println!(
        "  errors {}  warnings {}  info {}  success {}  debug {}",
        overview.error_count,
        overview.warning_count,
        overview.info_count,
        overview.success_count,
        overview.debug_count
    );
    println!("  requests {}  ips {}", overview.request_count, overview.ip_count);

    if !overview.ip_stats.is_empty() {
        println!();
        println!("{:<40} {}", "Top ips", "Records");
        println!("{}", "-".repeat(50));
        for stat in &overview.ip_stats {
            println!("{:<40} {}", stat.ip, stat.count);
        }
    }
}

fn print_page(page: &SearchPage) {
    println!(
        "Page {} ({} per page), {} matching requests",
        page.page, page.page_size, page.total
    );
    println!();
    println!(
        "{:<38} {:<24} {:>6} {:>10} {:<6}",
        "Request", "Start", "Count", "Duration", "Error"
    );
    println!("{}", "-".repeat(88));
    for group in &page.groups {
        println!(
            "{:<38} {:<24} {:>6} {:>8.0}ms {:<6}",
            group.request_id,
            keys::format_timestamp(&group.start_time),
            group.count,
            group.duration_ms,
            if group.has_error { "yes" } else { "" }
        );
    }
}

fn print_group(group: &RequestGroup) {
    println!("Request {}", group.request_id);
    println!("  ip:       {}", group.ip);
    println!(
        "  span:     {} .. {} ({:.0}ms)",
        keys::format_timestamp(&group.start_time),
        keys::format_timestamp(&group.end_time),
        group.duration_ms
    );
    println!("  records:  {}", group.count);
    println!();
    for record in &group.logs {
        println!(
            "{} {:<8} {}:{}:{} {}",
            record.timestamp_str(),
            record.level.as_str(),
            record.module,
            record.function,
            record.line,
            record.message
        );
    }
}
