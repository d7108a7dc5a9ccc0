//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `LOGLENS_*` environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process maps, lost on exit
    Memory,
    /// Single SQLite file
    #[default]
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(ConfigError::Invalid {
                field: "store.backend",
                reason: format!("unknown backend '{}'", other),
            }),
        }
    }
}

/// Store connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite file path (ignored by the memory backend)
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Upper bound on any single store call
    #[serde(default = "default_op_timeout")]
    pub op_timeout_ms: u64,

    /// How long a writer waits on a locked database file
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_store_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("loglens").join("loglens.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./loglens_data/loglens.db".to_string())
}

fn default_op_timeout() -> u64 {
    5000 // 5 seconds
}

fn default_busy_timeout() -> u64 {
    5000
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            op_timeout_ms: default_op_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// How the per-request summary hash is maintained on insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryUpdate {
    /// Initialize-if-absent and increment commands inside the write batch
    #[default]
    Atomic,
    /// Read the summary, then initialize or increment
    ReadThenWrite,
}

impl FromStr for SummaryUpdate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "atomic" => Ok(SummaryUpdate::Atomic),
            "read_then_write" => Ok(SummaryUpdate::ReadThenWrite),
            other => Err(ConfigError::Invalid {
                field: "ingest.summary_update",
                reason: format!("unknown mode '{}'", other),
            }),
        }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Expiry of detail, per-request and summary keys
    #[serde(default = "default_record_ttl_days")]
    pub record_ttl_days: u64,

    #[serde(default)]
    pub summary_update: SummaryUpdate,
}

/// Upper bound on `ingest.record_ttl_days`, one hundred years
pub const MAX_RECORD_TTL_DAYS: u64 = 36_500;

fn default_record_ttl_days() -> u64 {
    30
}

impl IngestConfig {
    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_days.saturating_mul(24 * 60 * 60))
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            record_ttl_days: default_record_ttl_days(),
            summary_update: SummaryUpdate::default(),
        }
    }
}

/// Query engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Most recent timeline entries read by the overview
    #[serde(default = "default_overview_window")]
    pub overview_window: usize,

    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    #[serde(default = "default_top_ips")]
    pub top_ips: usize,

    /// Cap on records fetched for one request group
    #[serde(default = "default_max_group_records")]
    pub max_group_records: usize,
}

fn default_overview_window() -> usize {
    10_000
}

fn default_recent_limit() -> usize {
    20
}

fn default_top_ips() -> usize {
    10
}

fn default_max_group_records() -> usize {
    10_000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            overview_window: default_overview_window(),
            recent_limit: default_recent_limit(),
            top_ips: default_top_ips(),
            max_group_records: default_max_group_records(),
        }
    }
}

/// Retention sweep configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Records older than this many days are swept
    #[serde(default = "default_retention_days")]
    pub days: u32,

    /// Interval of the background sweep, 0 disables it
    #[serde(default)]
    pub sweep_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    30
}

impl RetentionConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            sweep_interval_secs: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("loglens").join("config.toml")),
            Some(PathBuf::from("/etc/loglens/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("ingest.record_ttl_days", self.ingest.record_ttl_days as usize),
            ("query.overview_window", self.query.overview_window),
            ("query.recent_limit", self.query.recent_limit),
            ("query.max_group_records", self.query.max_group_records),
            ("store.op_timeout_ms", self.store.op_timeout_ms as usize),
        ];

        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.ingest.record_ttl_days > MAX_RECORD_TTL_DAYS {
            return Err(ConfigError::Invalid {
                field: "ingest.record_ttl_days",
                reason: format!("must be at most {}", MAX_RECORD_TTL_DAYS),
            });
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid {
                field: "logging.format",
                reason: format!("expected 'pretty' or 'json', got '{}'", self.logging.format),
            });
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply `LOGLENS_*` overrides read through `lookup`
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: FromStr>(name: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(variable = name, value = %raw, "Ignoring unparseable override");
                    None
                }
            }
        }

        // Store overrides
        if let Some(backend) = parsed("LOGLENS_STORE_BACKEND", lookup("LOGLENS_STORE_BACKEND")) {
            self.store.backend = backend;
        }
        if let Some(path) = lookup("LOGLENS_STORE_PATH") {
            self.store.path = path;
        }
        if let Some(ms) = parsed("LOGLENS_OP_TIMEOUT_MS", lookup("LOGLENS_OP_TIMEOUT_MS")) {
            self.store.op_timeout_ms = ms;
        }

        // Ingest overrides
        if let Some(days) = parsed::<u64>("LOGLENS_RECORD_TTL_DAYS", lookup("LOGLENS_RECORD_TTL_DAYS")) {
            if days > MAX_RECORD_TTL_DAYS {
                tracing::warn!(days, max = MAX_RECORD_TTL_DAYS, "Ignoring out-of-range record TTL override");
            } else {
                self.ingest.record_ttl_days = days;
            }
        }
        if let Some(mode) = parsed("LOGLENS_SUMMARY_UPDATE", lookup("LOGLENS_SUMMARY_UPDATE")) {
            self.ingest.summary_update = mode;
        }

        // Retention overrides
        if let Some(days) = parsed("LOGLENS_RETENTION_DAYS", lookup("LOGLENS_RETENTION_DAYS")) {
            self.retention.days = days;
        }
        if let Some(secs) = parsed(
            "LOGLENS_SWEEP_INTERVAL_SECS",
            lookup("LOGLENS_SWEEP_INTERVAL_SECS"),
        ) {
            self.retention.sweep_interval_secs = secs;
        }

        // Logging overrides
        if let Some(level) = lookup("LOGLENS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOGLENS_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(file) = lookup("LOGLENS_LOG_FILE") {
            self.logging.file = Some(file);
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Loglens Configuration
#
# Environment variables override these settings:
# - LOGLENS_STORE_BACKEND
# - LOGLENS_STORE_PATH
# - LOGLENS_OP_TIMEOUT_MS
# - LOGLENS_RECORD_TTL_DAYS
# - LOGLENS_SUMMARY_UPDATE
# - LOGLENS_RETENTION_DAYS
# - LOGLENS_SWEEP_INTERVAL_SECS
# - LOGLENS_LOG_LEVEL
# - LOGLENS_LOG_FORMAT
# - LOGLENS_LOG_FILE

[store]
# Backend: sqlite (persistent) or memory (lost on exit)
backend = "sqlite"

# SQLite database file
path = "~/.local/share/loglens/loglens.db"

# Upper bound on a single store call (ms)
op_timeout_ms = 5000

# How long a writer waits for a locked database (ms)
busy_timeout_ms = 5000

[ingest]
# Expiry of record details, per-request keys and summaries (days)
record_ttl_days = 30

# Summary maintenance: atomic or read_then_write
summary_update = "atomic"

[query]
# Recent timeline entries sampled by the overview
overview_window = 10000

# Records listed under "recent" in the overview
recent_limit = 20

# Entries in the top source-ip table
top_ips = 10

# Maximum records fetched for one request
max_group_records = 10000

[retention]
# Records older than this many days are swept
days = 30

# Background sweep interval in seconds (0 disables)
sweep_interval_secs = 0

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/loglens/loglens.log"
"#
    .to_string()
}
