//! Per-record filters
//!
//! All filters are conjunctive. String filters are substring matches; the
//! keyword filter ignores case.

use crate::model::{LogLevel, LogRecord, SearchParams};
use chrono::NaiveDateTime;

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    level: Option<LogLevel>,
    ip: Option<String>,
    module: Option<String>,
    start_time: Option<NaiveDateTime>,
    end_time: Option<NaiveDateTime>,
    /// Lowercased
    keyword: Option<String>,
}

impl RecordFilter {
    pub fn from_params(params: &SearchParams) -> Self {
        Self {
            level: params.level,
            ip: params.ip.clone(),
            module: params.module.clone(),
            start_time: params.start_time,
            end_time: params.end_time,
            keyword: params.keyword.as_ref().map(|k| k.to_lowercase()),
        }
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        if let Some(level) = self.level {
            if record.level != level {
                return false;
            }
        }
        if let Some(ip) = &self.ip {
            if !record.ip.contains(ip.as_str()) {
                return false;
            }
        }
        if let Some(module) = &self.module {
            if !record.module.contains(module.as_str()) {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if record.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if record.timestamp > end {
                return false;
            }
        }
        if let Some(keyword) = &self.keyword {
            if !record.message.to_lowercase().contains(keyword.as_str()) {
                return false;
            }
        }
        true
    }
}
