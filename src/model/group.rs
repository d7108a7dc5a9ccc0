//! Request groups
//!
//! A group is derived at query time from the records of one request and is
//! never stored.

use crate::model::record::{timestamp_format, LogRecord};
use crate::model::LevelCounts;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// All (or all matching) records of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestGroup {
    pub request_id: String,
    pub count: usize,
    #[serde(with = "timestamp_format")]
    pub start_time: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub end_time: NaiveDateTime,
    pub duration_ms: f64,
    pub levels: LevelCounts,
    /// ip of the earliest record
    pub ip: String,
    pub has_error: bool,
    /// Ascending by timestamp
    pub logs: Vec<LogRecord>,
}

impl RequestGroup {
    /// Build a group, or `None` when there are no records
    pub fn from_records(request_id: impl Into<String>, mut records: Vec<LogRecord>) -> Option<Self> {
        records.sort_by_key(|r| r.timestamp);

        let first = records.first()?;
        let last = records.last()?;
        let start_time = first.timestamp;
        let end_time = last.timestamp;
        let ip = first.ip.clone();

        let duration_ms = (end_time - start_time)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or_else(|| (end_time - start_time).num_milliseconds() as f64);

        Some(Self {
            request_id: request_id.into(),
            count: records.len(),
            start_time,
            end_time,
            duration_ms,
            levels: records.iter().map(|r| r.level).collect(),
            ip,
            has_error: records.iter().any(|r| r.level.is_error()),
            logs: records,
        })
    }
}
