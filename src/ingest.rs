//! Ingestion Pipeline
//!
//! Writes each record across every structure in one batch:
//!
//! ```text
//! LogRecord ─┬─ logs:detail:{key}              HSet + Expire
//!            ├─ logs:timeline                   ZAdd
//!            ├─ logs:request:{id}               LPush + Expire
//!            ├─ logs:request_timeline:{id}      ZAdd + Expire
//!            ├─ logs:by_level / by_ip / by_module   ZAdd
//!            ├─ logs:requests:index             ZAdd (latest record wins)
//!            ├─ logs:request:summary:{id}       see below
//!            └─ logs:stats:*                    HIncrBy + SAdd
//! ```
//!
//! # Summary maintenance
//!
//! In [`SummaryUpdate::Atomic`] mode the summary is written with
//! initialize-if-absent and increment commands inside the same batch, so
//! concurrent writers for a new request cannot lose updates. `start_time`
//! is kept as a true minimum.
//!
//! In [`SummaryUpdate::ReadThenWrite`] mode the summary is read first and
//! either created or incremented. Two concurrent first records for the same
//! request can race; summaries are advisory so the race is tolerated.

use crate::config::{IngestConfig, SummaryUpdate};
use crate::error::LogResult;
use crate::keys;
use crate::model::summary::{FIELD_COUNT, FIELD_END_TIME, FIELD_HAS_ERROR, FIELD_IP, FIELD_START_TIME};
use crate::model::{LevelCounts, LogRecord, RequestSummary};
use crate::store::{Batch, TimedStore};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::time::Duration;

/// Summary contribution of one request within a batch
struct SummaryDelta {
    request_id: String,
    count: u64,
    earliest: NaiveDateTime,
    /// Timestamp of the last record in input order
    last: NaiveDateTime,
    has_error: bool,
    levels: LevelCounts,
    /// ip of the first record in input order
    ip: String,
}

impl SummaryDelta {
    fn new(record: &LogRecord) -> Self {
        Self {
            request_id: record.request_id.clone(),
            count: 1,
            earliest: record.timestamp,
            last: record.timestamp,
            has_error: record.level.is_error(),
            levels: std::iter::once(record.level).collect(),
            ip: record.ip.clone(),
        }
    }

    fn absorb(&mut self, record: &LogRecord) {
        self.count += 1;
        self.earliest = self.earliest.min(record.timestamp);
        self.last = record.timestamp;
        self.has_error |= record.level.is_error();
        self.levels.increment(record.level);
    }
}

/// Group records by request id, keeping first-seen order
fn fold_by_request(records: &[LogRecord]) -> Vec<SummaryDelta> {
    let mut deltas: Vec<SummaryDelta> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for record in records {
        match positions.get(record.request_id.as_str()) {
            Some(&i) => deltas[i].absorb(record),
            None => {
                positions.insert(record.request_id.as_str(), deltas.len());
                deltas.push(SummaryDelta::new(record));
            }
        }
    }

    deltas
}

/// Writes records and keeps their indexes, summaries and counters current
#[derive(Debug, Clone)]
pub struct Ingestor {
    store: TimedStore,
    record_ttl: Duration,
    summary_update: SummaryUpdate,
}

impl Ingestor {
    pub fn new(store: TimedStore, config: &IngestConfig) -> Self {
        Self {
            store,
            record_ttl: config.record_ttl(),
            summary_update: config.summary_update,
        }
    }

    /// Write one record
    pub async fn insert(&self, record: &LogRecord) -> LogResult<()> {
        self.insert_batch(std::slice::from_ref(record)).await?;
        Ok(())
    }

    /// Write many records in one batch, returning how many were submitted
    pub async fn insert_batch(&self, records: &[LogRecord]) -> LogResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut batch = Batch::with_capacity(records.len() * 16);
        for record in records {
            self.push_record(&mut batch, record);
        }

        let deltas = fold_by_request(records);
        match self.summary_update {
            SummaryUpdate::Atomic => {
                for delta in &deltas {
                    self.push_atomic_summary(&mut batch, delta);
                }
            }
            SummaryUpdate::ReadThenWrite => {
                for delta in &deltas {
                    self.push_read_then_write_summary(&mut batch, delta).await?;
                }
            }
        }

        tracing::debug!(
            records = records.len(),
            requests = deltas.len(),
            commands = batch.len(),
            "Submitting ingest batch"
        );

        self.store.execute(batch).await?;
        Ok(records.len())
    }

    /// Detail, timeline, request, dimension, directory and global-counter writes
    fn push_record(&self, batch: &mut Batch, record: &LogRecord) {
        let key = record.key().encode();
        let score = record.score();
        let detail_key = keys::detail(&key);
        let list_key = keys::request_list(&record.request_id);
        let request_timeline_key = keys::request_timeline(&record.request_id);

        batch
            .hset(detail_key.as_str(), record.to_hash_fields())
            .expire(detail_key, self.record_ttl)
            .zadd(keys::TIMELINE, key.as_str(), score)
            .lpush(list_key.as_str(), key.as_str())
            .expire(list_key, self.record_ttl)
            .zadd(request_timeline_key.as_str(), key.as_str(), score)
            .expire(request_timeline_key, self.record_ttl)
            .zadd(keys::by_level(record.level), key.as_str(), score)
            .zadd(keys::by_ip(&record.ip), key.as_str(), score)
            .zadd(keys::by_module(&record.module), key.as_str(), score)
            .zadd(keys::REQUEST_DIRECTORY, record.request_id.as_str(), score)
            .hincr_by(keys::GLOBAL_STATS, "total", 1)
            .hincr_by(keys::GLOBAL_STATS, record.level.field(), 1)
            .sadd(keys::UNIQUE_REQUESTS, record.request_id.as_str())
            .sadd(keys::UNIQUE_IPS, record.ip.as_str());
    }

    fn push_atomic_summary(&self, batch: &mut Batch, delta: &SummaryDelta) {
        let key = keys::summary(&delta.request_id);

        batch
            .hset_nx(key.as_str(), FIELD_IP, delta.ip.as_str())
            .hset_nx(key.as_str(), FIELD_HAS_ERROR, "0")
            .hset_min(key.as_str(), FIELD_START_TIME, keys::format_timestamp(&delta.earliest))
            .hset(key.as_str(), [(FIELD_END_TIME, keys::format_timestamp(&delta.last))])
            .hincr_by(key.as_str(), FIELD_COUNT, delta.count as i64);

        for (level, n) in delta.levels.iter() {
            batch.hincr_by(key.as_str(), level.field(), n as i64);
        }
        if delta.has_error {
            batch.hset(key.as_str(), [(FIELD_HAS_ERROR, "1")]);
        }

        batch.expire(key, self.record_ttl);
    }

    async fn push_read_then_write_summary(&self, batch: &mut Batch, delta: &SummaryDelta) -> LogResult<()> {
        let key = keys::summary(&delta.request_id);
        let existing = self.store.hgetall(&key).await?;

        if RequestSummary::from_hash(&delta.request_id, &existing).is_none() {
            let created = RequestSummary {
                request_id: delta.request_id.clone(),
                count: delta.count,
                start_time: Some(delta.earliest),
                end_time: Some(delta.last),
                has_error: delta.has_error,
                levels: delta.levels.clone(),
                ip: delta.ip.clone(),
            };
            batch.hset(key.as_str(), created.to_hash_fields());
        } else {
            batch
                .hincr_by(key.as_str(), FIELD_COUNT, delta.count as i64)
                .hset(key.as_str(), [(FIELD_END_TIME, keys::format_timestamp(&delta.last))]);
            if delta.has_error {
                batch.hset(key.as_str(), [(FIELD_HAS_ERROR, "1")]);
            }
            for (level, n) in delta.levels.iter() {
                batch.hincr_by(key.as_str(), level.field(), n as i64);
            }
        }

        batch.expire(key, self.record_ttl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogLevel;
    use crate::store::{MemoryStore, Order, ScoreBound, SqliteStore};
    use std::sync::Arc;

    fn create_ingestor(mode: SummaryUpdate) -> (Ingestor, TimedStore) {
        let store = TimedStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(5));
        let config = IngestConfig {
            summary_update: mode,
            ..IngestConfig::default()
        };
        (Ingestor::new(store.clone(), &config), store)
    }

    fn record(request_id: &str, ts: &str, level: LogLevel, ip: &str, line: u32) -> LogRecord {
        LogRecord::new(request_id, keys::parse_timestamp(ts).unwrap(), level, "msg")
            .ip(ip)
            .location("app.api", "handler", line)
    }

    #[tokio::test]
    async fn test_insert_writes_every_structure() {
        let (ingestor, store) = create_ingestor(SummaryUpdate::Atomic);
        let r = record("r1", "2025-12-19 12:00:00.123", LogLevel::Warning, "1.2.3.4", 7);
        ingestor.insert(&r).await.unwrap();

        let key = "2025-12-19 12:00:00.123:::r1:::7";
        let detail = store.hgetall(&keys::detail(key)).await.unwrap();
        assert_eq!(detail.get("level").map(String::as_str), Some("WARNING"));
        assert_eq!(detail.get("line").map(String::as_str), Some("7"));

        assert_eq!(store.zcard(keys::TIMELINE).await.unwrap(), 1);
        assert_eq!(store.lrange(&keys::request_list("r1"), 0, None).await.unwrap(), vec![key]);
        assert_eq!(store.zcard(&keys::request_timeline("r1")).await.unwrap(), 1);
        assert_eq!(store.zcard(&keys::by_level(LogLevel::Warning)).await.unwrap(), 1);
        assert_eq!(store.zcard(&keys::by_ip("1.2.3.4")).await.unwrap(), 1);
        assert_eq!(store.zcard(&keys::by_module("app.api")).await.unwrap(), 1);

        let directory = store
            .zrange_by_score(keys::REQUEST_DIRECTORY, ScoreBound::Min, ScoreBound::Max, Order::Ascending, None)
            .await
            .unwrap();
        assert_eq!(directory.len(), 1);
        assert_eq!(directory[0].member, "r1");
        assert_eq!(directory[0].score, r.score());

        let stats = store.hgetall(keys::GLOBAL_STATS).await.unwrap();
        assert_eq!(stats.get("total").map(String::as_str), Some("1"));
        assert_eq!(stats.get("level:WARNING").map(String::as_str), Some("1"));
        assert_eq!(store.scard(keys::UNIQUE_REQUESTS).await.unwrap(), 1);
        assert_eq!(store.scard(keys::UNIQUE_IPS).await.unwrap(), 1);
    }

    async fn summary_after(mode: SummaryUpdate, batched: bool) -> RequestSummary {
        let (ingestor, store) = create_ingestor(mode);
        let records = vec![
            record("r1", "2025-12-19 12:00:00.050", LogLevel::Info, "1.2.3.4", 1),
            record("r1", "2025-12-19 12:00:00.000", LogLevel::Error, "5.6.7.8", 2),
            record("r1", "2025-12-19 12:00:00.020", LogLevel::Info, "1.2.3.4", 3),
        ];

        if batched {
            ingestor.insert_batch(&records).await.unwrap();
        } else {
            for r in &records {
                ingestor.insert(r).await.unwrap();
            }
        }

        let hash = store.hgetall(&keys::summary("r1")).await.unwrap();
        RequestSummary::from_hash("r1", &hash).unwrap()
    }

    #[tokio::test]
    async fn test_atomic_summary_keeps_true_start() {
        for batched in [false, true] {
            let summary = summary_after(SummaryUpdate::Atomic, batched).await;
            assert_eq!(summary.count, 3);
            assert!(summary.has_error);
            assert_eq!(summary.ip, "1.2.3.4");
            assert_eq!(summary.levels.get(LogLevel::Info), 2);
            assert_eq!(summary.levels.get(LogLevel::Error), 1);
            assert_eq!(summary.start_time, keys::parse_timestamp("2025-12-19 12:00:00.000"));
            // last write wins
            assert_eq!(summary.end_time, keys::parse_timestamp("2025-12-19 12:00:00.020"));
        }
    }

    #[tokio::test]
    async fn test_read_then_write_summary() {
        let summary = summary_after(SummaryUpdate::ReadThenWrite, false).await;
        assert_eq!(summary.count, 3);
        assert!(summary.has_error);
        assert_eq!(summary.levels.total(), 3);
        // start_time is fixed by the first record written
        assert_eq!(summary.start_time, keys::parse_timestamp("2025-12-19 12:00:00.050"));
        assert_eq!(summary.end_time, keys::parse_timestamp("2025-12-19 12:00:00.020"));

        let summary = summary_after(SummaryUpdate::ReadThenWrite, true).await;
        assert_eq!(summary.count, 3);
        assert_eq!(summary.start_time, keys::parse_timestamp("2025-12-19 12:00:00.000"));
    }

    async fn concurrent_first_inserts(store: TimedStore) {
        const WRITERS: u32 = 32;
        let ingestor = Ingestor::new(store.clone(), &IngestConfig::default());
        let base = keys::parse_timestamp("2025-12-19 12:00:00.000").unwrap();

        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let ingestor = ingestor.clone();
                // Later spawns carry earlier timestamps
                let ts = base + chrono::Duration::milliseconds(i64::from(WRITERS - i) * 10);
                let level = if i == WRITERS / 2 { LogLevel::Error } else { LogLevel::Info };
                let r = LogRecord::new("fresh", ts, level, "msg")
                    .ip("1.2.3.4")
                    .location("app.api", "handler", i);
                tokio::spawn(async move { ingestor.insert(&r).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let hash = store.hgetall(&keys::summary("fresh")).await.unwrap();
        let summary = RequestSummary::from_hash("fresh", &hash).unwrap();
        assert_eq!(summary.count, u64::from(WRITERS));
        assert_eq!(summary.levels.total(), u64::from(WRITERS));
        assert_eq!(summary.levels.get(LogLevel::Error), 1);
        assert!(summary.has_error);
        assert_eq!(summary.start_time, Some(base + chrono::Duration::milliseconds(10)));
        assert_eq!(store.zcard(keys::TIMELINE).await.unwrap(), u64::from(WRITERS));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_inserts_memory() {
        let store = TimedStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(5));
        concurrent_first_inserts(store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_inserts_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteStore::open(dir.path().join("logs.db"), Duration::from_secs(5)).unwrap();
        concurrent_first_inserts(TimedStore::new(Arc::new(backend), Duration::from_secs(5))).await;
    }

    #[tokio::test]
    async fn test_has_error_never_clears() {
        let (ingestor, store) = create_ingestor(SummaryUpdate::Atomic);
        ingestor
            .insert(&record("r1", "2025-12-19 12:00:00.000", LogLevel::Critical, "ip", 1))
            .await
            .unwrap();
        ingestor
            .insert(&record("r1", "2025-12-19 12:00:01.000", LogLevel::Debug, "ip", 2))
            .await
            .unwrap();

        let hash = store.hgetall(&keys::summary("r1")).await.unwrap();
        assert_eq!(hash.get("has_error").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_batch_spanning_requests() {
        let (ingestor, store) = create_ingestor(SummaryUpdate::Atomic);
        let records: Vec<LogRecord> = (0..30)
            .map(|i| {
                record(
                    &format!("r{}", i % 3),
                    &format!("2025-12-19 12:00:{:02}.000", i),
                    LogLevel::Info,
                    &format!("10.0.0.{}", i % 5),
                    i,
                )
            })
            .collect();

        assert_eq!(ingestor.insert_batch(&records).await.unwrap(), 30);
        assert_eq!(store.zcard(keys::TIMELINE).await.unwrap(), 30);
        assert_eq!(store.zcard(keys::REQUEST_DIRECTORY).await.unwrap(), 3);
        assert_eq!(store.scard(keys::UNIQUE_IPS).await.unwrap(), 5);

        for id in ["r0", "r1", "r2"] {
            let hash = store.hgetall(&keys::summary(id)).await.unwrap();
            assert_eq!(hash.get("count").map(String::as_str), Some("10"));
            assert_eq!(store.lrange(&keys::request_list(id), 0, None).await.unwrap().len(), 10);
        }
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let (ingestor, store) = create_ingestor(SummaryUpdate::Atomic);
        assert_eq!(ingestor.insert_batch(&[]).await.unwrap(), 0);
        assert!(!store.exists(keys::TIMELINE).await.unwrap());
    }
}
