//! # Loglens
//!
//! Request-grouped structured log store. Records are written once across a
//! set of parallel indexes and read back grouped by request id.
//!
//! ## Features
//!
//! - **Fan-out ingestion**: one batch per insert covering the record, the
//!   timeline, per-request and per-dimension indexes, summaries and counters
//! - **Grouped search**: group-then-filter-then-paginate over request ids
//! - **Overview**: level, ip and hourly statistics over recent records
//! - **Retention**: age-based sweeps and a full wipe
//! - **Pluggable store**: in-memory or SQLite behind one async trait
//!
//! ## Modules
//!
//! - [`store`]: key-value store abstraction and backends
//! - [`model`]: records, summaries, groups and statistics
//! - [`keys`]: key naming and record-key encoding
//! - [`ingest`]: ingestion pipeline
//! - [`query`]: search, detail and overview
//! - [`retention`]: retention sweep
//! - [`service`]: the facade outer layers hold
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loglens::*;
//! use chrono::Utc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = LogService::open(&Config::default())?;
//!
//!     let record = LogRecord::new("req-1", Utc::now().naive_utc(), LogLevel::Error, "Database timeout")
//!         .ip("10.0.0.7")
//!         .location("app.db", "query", 42);
//!     service.insert(&record).await;
//!
//!     if let Some(group) = service.detail("req-1").await {
//!         println!("{} records, error: {}", group.count, group.has_error);
//!     }
//!
//!     let page = service.search(&SearchParams::page(1, 20)).await;
//!     println!("{} requests", page.total);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod model;
pub mod query;
pub mod retention;
pub mod service;
pub mod store;

// Re-export top-level types for convenience
pub use config::{Config, ConfigError, LoggingConfig, StoreBackend, SummaryUpdate};

pub use error::{LogError, LogResult};

pub use ingest::Ingestor;

pub use keys::RecordKey;

pub use model::{
    GlobalCounters, GlobalStats, LevelCounts, LogLevel, LogRecord, RawLogRecord, RequestGroup,
    RequestSummary, SearchPage, SearchParams,
};

pub use query::QueryEngine;

pub use retention::RetentionSweeper;

pub use service::{LogBackend, LogService};

pub use store::{KvStore, MemoryStore, SqliteStore, StoreError, StoreResult, TimedStore};
