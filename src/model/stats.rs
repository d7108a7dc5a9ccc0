//! Aggregate statistics

use crate::model::{LevelCounts, LogLevel, LogRecord};
use serde::{Deserialize, Serialize};

/// Record count for one hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineBucket {
    /// `YYYY-MM-DD HH:00:00`
    pub time: String,
    pub total: u64,
    /// Serialized inline next to `time` and `total`
    #[serde(flatten)]
    pub levels: LevelCounts,
}

/// Record count for one source ip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpStat {
    pub ip: String,
    pub count: u64,
}

/// Overview computed over a window of recent records
///
/// `total` is the window size, not the lifetime insert count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total: u64,
    pub error_count: u64,
    pub warning_count: u64,
    pub info_count: u64,
    pub success_count: u64,
    pub debug_count: u64,
    pub request_count: u64,
    pub ip_count: u64,
    pub level_distribution: LevelCounts,
    pub timeline_data: Vec<TimelineBucket>,
    pub ip_stats: Vec<IpStat>,
    pub recent_logs: Vec<LogRecord>,
}

impl GlobalStats {
    /// Fill the per-level scalar fields from a distribution
    pub fn with_levels(mut self, levels: LevelCounts) -> Self {
        self.error_count = levels.get(LogLevel::Error) + levels.get(LogLevel::Critical);
        self.warning_count = levels.get(LogLevel::Warning);
        self.info_count = levels.get(LogLevel::Info);
        self.success_count = levels.get(LogLevel::Success);
        self.debug_count = levels.get(LogLevel::Debug);
        self.level_distribution = levels;
        self
    }
}

/// Running counters maintained on every insert
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCounters {
    pub total: u64,
    pub levels: LevelCounts,
    pub unique_requests: u64,
    pub unique_ips: u64,
    /// Live entries in the timeline
    pub timeline_len: u64,
}
