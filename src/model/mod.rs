//! Log engine data model
//!
//! - **level**: `LogLevel` and `LevelCounts`
//! - **record**: `LogRecord` (stored) and `RawLogRecord` (producer input)
//! - **summary**: per-request rolling summary
//! - **group**: query-time request groups
//! - **stats**: overview statistics and running counters
//! - **search**: search parameters and result pages
//!
//! Timestamps serialize in the stored form `YYYY-MM-DD HH:MM:SS.mmm`.

pub mod group;
pub mod level;
pub mod record;
pub mod search;
pub mod stats;
pub mod summary;

pub use group::RequestGroup;
pub use level::{LevelCounts, LogLevel};
pub use record::{LogRecord, RawLogRecord};
pub use search::{SearchPage, SearchParams};
pub use stats::{GlobalCounters, GlobalStats, IpStat, TimelineBucket};
pub use summary::RequestSummary;
