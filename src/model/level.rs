//! Log levels and per-level counters

use crate::error::LogError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Hash-field prefix for per-level counters
pub const LEVEL_FIELD_PREFIX: &str = "level:";

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// All levels, least severe first
    pub fn all() -> &'static [LogLevel] {
        &[
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Success,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// ERROR and CRITICAL mark a request as failed
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }

    /// Parse a level, downgrading anything unrecognized to INFO
    pub fn parse_lenient(s: &str) -> LogLevel {
        s.parse().unwrap_or_else(|_| {
            tracing::warn!(level = s, "Unknown log level, storing as INFO");
            LogLevel::Info
        })
    }

    /// Summary/stats hash field holding this level's counter
    pub fn field(&self) -> String {
        format!("{}{}", LEVEL_FIELD_PREFIX, self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "SUCCESS" => Ok(LogLevel::Success),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            _ => Err(LogError::validation(format!("invalid log level '{}'", s))),
        }
    }
}

/// Count of records per level
///
/// Serializes as a `{"LEVEL": n}` object. Levels with no records are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelCounts(BTreeMap<LogLevel, u64>);

impl LevelCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, level: LogLevel) {
        self.add(level, 1);
    }

    pub fn add(&mut self, level: LogLevel, n: u64) {
        if n > 0 {
            *self.0.entry(level).or_insert(0) += n;
        }
    }

    pub fn get(&self, level: LogLevel) -> u64 {
        self.0.get(&level).copied().unwrap_or(0)
    }

    /// Sum over all levels
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LogLevel, u64)> + '_ {
        self.0.iter().map(|(level, n)| (*level, *n))
    }

    /// Read `level:{LEVEL}` fields from a summary or stats hash
    ///
    /// Fields naming unknown levels or holding non-integers are skipped.
    pub fn from_hash_fields(hash: &HashMap<String, String>) -> Self {
        let mut counts = Self::new();
        for (field, value) in hash {
            let Some(name) = field.strip_prefix(LEVEL_FIELD_PREFIX) else {
                continue;
            };
            match (name.parse::<LogLevel>(), value.parse::<u64>()) {
                (Ok(level), Ok(n)) => counts.add(level, n),
                _ => tracing::debug!(field = %field, value = %value, "Skipping level counter"),
            }
        }
        counts
    }

    /// Render as `level:{LEVEL}` hash fields
    pub fn to_hash_fields(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(level, n)| (level.field(), n.to_string()))
            .collect()
    }
}

impl FromIterator<LogLevel> for LevelCounts {
    fn from_iter<I: IntoIterator<Item = LogLevel>>(iter: I) -> Self {
        let mut counts = Self::new();
        for level in iter {
            counts.increment(level);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!(" WARNING ".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("TRACE".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::parse_lenient("TRACE"), LogLevel::Info);
        assert_eq!(LogLevel::parse_lenient("SUCCESS"), LogLevel::Success);
    }

    #[test]
    fn test_error_levels() {
        let errors: Vec<LogLevel> = LogLevel::all()
            .iter()
            .copied()
            .filter(LogLevel::is_error)
            .collect();
        assert_eq!(errors, vec![LogLevel::Error, LogLevel::Critical]);
    }

    #[test]
    fn test_counts_hash_roundtrip() {
        let counts: LevelCounts = [LogLevel::Info, LogLevel::Error, LogLevel::Info]
            .into_iter()
            .collect();
        assert_eq!(counts.get(LogLevel::Info), 2);
        assert_eq!(counts.total(), 3);

        let mut hash: HashMap<String, String> = counts.to_hash_fields().into_iter().collect();
        hash.insert("count".to_string(), "3".to_string());
        hash.insert("level:VERBOSE".to_string(), "9".to_string());

        assert_eq!(LevelCounts::from_hash_fields(&hash), counts);
    }

    #[test]
    fn test_counts_serialize_as_object() {
        let counts: LevelCounts = [LogLevel::Info, LogLevel::Info, LogLevel::Error]
            .into_iter()
            .collect();
        let json = serde_json::to_value(&counts).unwrap();
        assert_eq!(json, serde_json::json!({"INFO": 2, "ERROR": 1}));
    }
}
