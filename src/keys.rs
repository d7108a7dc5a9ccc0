//! Store key layout
//!
//! Every key the engine reads or writes is built here. The layout is shared
//! with existing data, so names must not change:
//!
//! ```text
//! logs:detail:{record_key}                hash    record fields, expires
//! logs:timeline                           zset    record_key -> score
//! logs:request:{request_id}               list    record keys, newest first, expires
//! logs:request_timeline:{request_id}      zset    record_key -> score, expires
//! logs:by_level:{LEVEL}                   zset    record_key -> score
//! logs:by_ip:{ip}                         zset    record_key -> score
//! logs:by_module:{module}                 zset    record_key -> score
//! logs:requests:index                     zset    request_id -> latest record score
//! logs:request:summary:{request_id}       hash    count, start_time, end_time, has_error, level:{L}, ip
//! logs:stats:global                       hash    total, level:{L}
//! logs:stats:unique_requests              set     request ids
//! logs:stats:unique_ips                   set     ips
//! ```
//!
//! A record key is `{timestamp}:::{request_id}:::{line}` with the timestamp
//! rendered as `YYYY-MM-DD HH:MM:SS.mmm`. The separator cannot occur inside
//! a timestamp, so the first segment always splits cleanly.
//!
//! Scores are seconds since the Unix epoch with millisecond fraction. Naive
//! timestamps are read as UTC.

use crate::error::{LogError, LogResult};
use crate::model::LogLevel;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use std::fmt;

/// Separator between the parts of a record key
pub const SEPARATOR: &str = ":::";

/// Timestamp rendering used in record keys and stored hashes
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub const TIMELINE: &str = "logs:timeline";
pub const REQUEST_DIRECTORY: &str = "logs:requests:index";
pub const GLOBAL_STATS: &str = "logs:stats:global";
pub const UNIQUE_REQUESTS: &str = "logs:stats:unique_requests";
pub const UNIQUE_IPS: &str = "logs:stats:unique_ips";

pub fn detail(record_key: &str) -> String {
    format!("logs:detail:{}", record_key)
}

pub fn request_list(request_id: &str) -> String {
    format!("logs:request:{}", request_id)
}

pub fn request_timeline(request_id: &str) -> String {
    format!("logs:request_timeline:{}", request_id)
}

pub fn by_level(level: LogLevel) -> String {
    format!("logs:by_level:{}", level.as_str())
}

pub fn by_ip(ip: &str) -> String {
    format!("logs:by_ip:{}", ip)
}

pub fn by_module(module: &str) -> String {
    format!("logs:by_module:{}", module)
}

pub fn summary(request_id: &str) -> String {
    format!("logs:request:summary:{}", request_id)
}

/// Render a timestamp with exactly three fractional digits
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse `YYYY-MM-DD HH:MM:SS[.fff...]`, the `T`-separated variant, or RFC 3339
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

/// Drop precision below one millisecond
pub fn truncate_to_millis(ts: NaiveDateTime) -> NaiveDateTime {
    let nanos = ts.nanosecond() / 1_000_000 * 1_000_000;
    ts.with_nanosecond(nanos).unwrap_or(ts)
}

/// Sorted-set score of a timestamp
pub fn score(ts: &NaiveDateTime) -> f64 {
    ts.and_utc().timestamp_millis() as f64 / 1000.0
}

/// Timestamp of a score, rounded to the millisecond
pub fn from_score(score: f64) -> Option<NaiveDateTime> {
    if !score.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis((score * 1000.0).round() as i64).map(|dt| dt.naive_utc())
}

/// Identity of one stored record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Timestamp segment as stored
    pub timestamp: String,
    pub request_id: String,
    pub line: String,
}

impl RecordKey {
    pub fn new(timestamp: &NaiveDateTime, request_id: impl Into<String>, line: u32) -> Self {
        Self {
            timestamp: format_timestamp(timestamp),
            request_id: request_id.into(),
            line: line.to_string(),
        }
    }

    /// Split a stored key into its three parts
    ///
    /// Neither the timestamp nor the line contains the separator, so the
    /// request id is whatever lies between the first and the last one.
    pub fn parse(key: &str) -> LogResult<Self> {
        let malformed = || LogError::MalformedKey(key.to_string());
        let (timestamp, rest) = key.split_once(SEPARATOR).ok_or_else(malformed)?;
        let (request_id, line) = rest.rsplit_once(SEPARATOR).ok_or_else(malformed)?;

        Ok(Self {
            timestamp: timestamp.to_string(),
            request_id: request_id.to_string(),
            line: line.to_string(),
        })
    }

    /// Request id of a stored key, logging and skipping keys that do not parse
    pub fn request_id_of(key: &str) -> Option<String> {
        match Self::parse(key) {
            Ok(parsed) => Some(parsed.request_id),
            Err(e) => {
                tracing::warn!(key, error = %e, "Skipping unparseable record key");
                None
            }
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.timestamp,
            self.request_id,
            self.line,
            sep = SEPARATOR
        )
    }
}
