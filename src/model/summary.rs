//! Per-request rolling summary
//!
//! The summary hash is advisory: request groups shown to callers are always
//! rebuilt from the stored records.

use crate::keys;
use crate::model::record::option_timestamp_format;
use crate::model::LevelCounts;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const FIELD_COUNT: &str = "count";
pub const FIELD_START_TIME: &str = "start_time";
pub const FIELD_END_TIME: &str = "end_time";
pub const FIELD_HAS_ERROR: &str = "has_error";
pub const FIELD_IP: &str = "ip";

/// Incrementally maintained summary of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request_id: String,
    pub count: u64,
    /// Earliest timestamp seen
    #[serde(with = "option_timestamp_format")]
    pub start_time: Option<NaiveDateTime>,
    /// Timestamp of the last record written (not necessarily the latest)
    #[serde(with = "option_timestamp_format")]
    pub end_time: Option<NaiveDateTime>,
    /// Once set, never cleared
    pub has_error: bool,
    pub levels: LevelCounts,
    /// First writer's ip
    pub ip: String,
}

impl RequestSummary {
    /// Decode a summary hash; `None` when the hash is empty
    pub fn from_hash(request_id: &str, hash: &HashMap<String, String>) -> Option<Self> {
        if hash.is_empty() {
            return None;
        }

        let time = |field: &str| hash.get(field).and_then(|raw| keys::parse_timestamp(raw));

        Some(Self {
            request_id: request_id.to_string(),
            count: hash
                .get(FIELD_COUNT)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0),
            start_time: time(FIELD_START_TIME),
            end_time: time(FIELD_END_TIME),
            has_error: hash.get(FIELD_HAS_ERROR).map(|v| v == "1").unwrap_or(false),
            levels: LevelCounts::from_hash_fields(hash),
            ip: hash.get(FIELD_IP).cloned().unwrap_or_default(),
        })
    }

    /// Full hash rendering, used when a summary is created
    pub fn to_hash_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            (FIELD_COUNT.to_string(), self.count.to_string()),
            (
                FIELD_HAS_ERROR.to_string(),
                if self.has_error { "1" } else { "0" }.to_string(),
            ),
            (FIELD_IP.to_string(), self.ip.clone()),
        ];
        if let Some(start) = &self.start_time {
            fields.push((FIELD_START_TIME.to_string(), keys::format_timestamp(start)));
        }
        if let Some(end) = &self.end_time {
            fields.push((FIELD_END_TIME.to_string(), keys::format_timestamp(end)));
        }
        fields.extend(self.levels.to_hash_fields());
        fields
    }
}
