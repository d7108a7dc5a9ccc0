//! Log records
//!
//! [`LogRecord`] is the validated, immutable form the engine stores.
//! [`RawLogRecord`] is what producers hand in: every field a string, checked
//! on conversion.

use crate::error::{LogError, LogResult};
use crate::keys::{self, RecordKey};
use crate::model::LogLevel;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Serde adapter rendering timestamps as `YYYY-MM-DD HH:MM:SS.mmm`
pub mod timestamp_format {
    use crate::keys;
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&keys::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        keys::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }
}

/// Serde adapter for optional timestamps in the stored format
pub mod option_timestamp_format {
    use crate::keys;
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_some(&keys::format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => keys::parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw))),
            None => Ok(None),
        }
    }
}

/// One structured log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub ip: String,
    /// Millisecond precision, read as UTC
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub request_id: String,
    pub level: LogLevel,
    pub module: String,
    pub function: String,
    /// Source line, display only
    pub line: u32,
    pub message: String,
    /// Verbatim producer text
    pub raw_line: String,
}

impl LogRecord {
    /// Create a record; the timestamp is truncated to milliseconds
    pub fn new(
        request_id: impl Into<String>,
        timestamp: NaiveDateTime,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            ip: String::new(),
            timestamp: keys::truncate_to_millis(timestamp),
            request_id: request_id.into(),
            level,
            module: String::new(),
            function: String::new(),
            line: 0,
            raw_line: message.clone(),
            message,
        }
    }

    /// Builder method: set source ip
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Builder method: set source location
    pub fn location(mut self, module: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        self.module = module.into();
        self.function = function.into();
        self.line = line;
        self
    }

    /// Builder method: set the verbatim line
    pub fn raw_line(mut self, raw_line: impl Into<String>) -> Self {
        self.raw_line = raw_line.into();
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.timestamp, self.request_id.clone(), self.line)
    }

    pub fn score(&self) -> f64 {
        keys::score(&self.timestamp)
    }

    pub fn timestamp_str(&self) -> String {
        keys::format_timestamp(&self.timestamp)
    }

    /// Fields of the detail hash
    pub fn to_hash_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ip", self.ip.clone()),
            ("timestamp", self.timestamp_str()),
            ("request_id", self.request_id.clone()),
            ("level", self.level.as_str().to_string()),
            ("module", self.module.clone()),
            ("function", self.function.clone()),
            ("line", self.line.to_string()),
            ("message", self.message.clone()),
            ("raw_line", self.raw_line.clone()),
        ]
    }

    /// Rebuild a record from its detail hash
    ///
    /// Returns `Ok(None)` for an empty hash (expired or swept record).
    pub fn from_hash(key: &str, hash: &HashMap<String, String>) -> LogResult<Option<Self>> {
        if hash.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| hash.get(name).cloned().unwrap_or_default();

        let timestamp = hash
            .get("timestamp")
            .and_then(|raw| keys::parse_timestamp(raw))
            .ok_or_else(|| LogError::Corrupt {
                key: key.to_string(),
                reason: "missing or unparseable timestamp".to_string(),
            })?;

        Ok(Some(Self {
            ip: field("ip"),
            timestamp: keys::truncate_to_millis(timestamp),
            request_id: field("request_id"),
            level: LogLevel::parse_lenient(&field("level")),
            module: field("module"),
            function: field("function"),
            line: field("line").parse().unwrap_or(0),
            message: field("message"),
            raw_line: field("raw_line"),
        }))
    }
}

/// Producer-facing record with unvalidated fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLogRecord {
    #[serde(default)]
    pub ip: String,
    pub timestamp: String,
    pub request_id: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub raw_line: String,
}

impl TryFrom<RawLogRecord> for LogRecord {
    type Error = LogError;

    /// Rejects unparseable timestamps; unknown levels become INFO
    fn try_from(raw: RawLogRecord) -> Result<Self, Self::Error> {
        let timestamp = keys::parse_timestamp(&raw.timestamp).ok_or_else(|| {
            LogError::validation(format!("unparseable timestamp '{}'", raw.timestamp))
        })?;

        if raw.request_id.is_empty() {
            return Err(LogError::validation("request_id must not be empty"));
        }

        let mut record = LogRecord::new(
            raw.request_id,
            timestamp,
            LogLevel::parse_lenient(&raw.level),
            raw.message,
        )
        .ip(raw.ip)
        .location(raw.module, raw.function, raw.line);

        if !raw.raw_line.is_empty() {
            record = record.raw_line(raw.raw_line);
        }

        Ok(record)
    }
}
