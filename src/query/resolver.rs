//! Candidate resolution and record fetch
//!
//! Request ids come from the Request Directory when it exists and from a
//! Timeline scan otherwise (or when the directory read fails). Records for
//! one request come from the first non-empty of:
//!
//! ```text
//! logs:request_timeline:{id}  →  logs:request:{id}  →  logs:timeline scan
//! ```
//!
//! Keys whose detail hash has expired or been swept are skipped.

use crate::error::{LogError, LogResult};
use crate::keys::{self, RecordKey};
use crate::model::LogRecord;
use crate::query::QueryEngine;
use crate::store::{Order, ScoreBound};
use std::collections::HashSet;

impl QueryEngine {
    /// Request ids with a latest record inside the bounds, newest first
    pub async fn candidate_ids(&self, min: ScoreBound, max: ScoreBound) -> LogResult<Vec<String>> {
        match self.directory_ids(min, max).await {
            Ok(Some(ids)) => Ok(ids),
            Ok(None) => {
                tracing::debug!("Request directory absent, scanning timeline");
                self.timeline_ids(min, max).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Request directory read failed, scanning timeline");
                self.timeline_ids(min, max).await
            }
        }
    }

    async fn directory_ids(&self, min: ScoreBound, max: ScoreBound) -> LogResult<Option<Vec<String>>> {
        if !self.store.exists(keys::REQUEST_DIRECTORY).await? {
            return Ok(None);
        }

        let members = self
            .store
            .zrange_by_score(keys::REQUEST_DIRECTORY, min, max, Order::Descending, None)
            .await?;

        Ok(Some(members.into_iter().map(|m| m.member).collect()))
    }

    /// Unique request ids parsed from timeline keys, ordered by latest record
    async fn timeline_ids(&self, min: ScoreBound, max: ScoreBound) -> LogResult<Vec<String>> {
        let members = self
            .store
            .zrange_by_score(keys::TIMELINE, min, max, Order::Descending, None)
            .await?;

        let mut seen = HashSet::new();
        let ids: Vec<String> = members
            .into_iter()
            .filter_map(|m| RecordKey::request_id_of(&m.member))
            .filter(|id| seen.insert(id.clone()))
            .collect();

        tracing::debug!(ids = ids.len(), "Derived request ids from timeline");
        Ok(ids)
    }

    /// Record keys of one request, oldest first where the source is ordered
    pub async fn record_keys(&self, request_id: &str) -> LogResult<Vec<String>> {
        let limit = Some(self.config.max_group_records);

        let ordered = self
            .store
            .zrange_by_rank(&keys::request_timeline(request_id), 0, limit, Order::Ascending)
            .await?;
        if !ordered.is_empty() {
            return Ok(ordered.into_iter().map(|m| m.member).collect());
        }

        let listed = self
            .store
            .lrange(&keys::request_list(request_id), 0, limit)
            .await?;
        if !listed.is_empty() {
            return Ok(listed);
        }

        tracing::debug!(request_id, "No per-request index, scanning timeline");
        let scanned = self
            .store
            .zrange_by_score(keys::TIMELINE, ScoreBound::Min, ScoreBound::Max, Order::Ascending, None)
            .await?;

        Ok(scanned
            .into_iter()
            .map(|m| m.member)
            .filter(|key| {
                RecordKey::parse(key)
                    .map(|parsed| parsed.request_id == request_id)
                    .unwrap_or(false)
            })
            .take(self.config.max_group_records)
            .collect())
    }

    /// Load records by key, preserving order and skipping vanished ones
    pub async fn fetch_records(&self, record_keys: &[String]) -> LogResult<Vec<LogRecord>> {
        if record_keys.is_empty() {
            return Ok(Vec::new());
        }

        let detail_keys: Vec<String> = record_keys.iter().map(|k| keys::detail(k)).collect();
        let hashes = self.store.hgetall_many(&detail_keys).await?;

        let mut records = Vec::with_capacity(hashes.len());
        for (key, hash) in record_keys.iter().zip(hashes) {
            match LogRecord::from_hash(key, &hash) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(LogError::Corrupt { key, reason }) => {
                    tracing::warn!(key = %key, reason = %reason, "Skipping unreadable record");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }

    /// All live records of one request
    pub async fn records_for(&self, request_id: &str) -> LogResult<Vec<LogRecord>> {
        let record_keys = self.record_keys(request_id).await?;
        self.fetch_records(&record_keys).await
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{IngestConfig, QueryConfig};
    use crate::ingest::Ingestor;
    use crate::keys;
    use crate::model::{LogLevel, LogRecord};
    use crate::query::QueryEngine;
    use crate::store::{Batch, MemoryStore, Order, ScoreBound, TimedStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn create_engine() -> (QueryEngine, TimedStore) {
        let store = TimedStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(5));
        (QueryEngine::new(store.clone(), QueryConfig::default()), store)
    }

    fn record(request_id: &str, ts: &str, line: u32) -> LogRecord {
        LogRecord::new(request_id, keys::parse_timestamp(ts).unwrap(), LogLevel::Info, "m")
            .location("mod", "f", line)
    }

    /// Write only the detail hash and the timeline entry, as older data did
    async fn write_legacy(store: &TimedStore, record: &LogRecord) {
        let key = record.key().encode();
        let mut batch = Batch::new();
        batch
            .hset(keys::detail(&key), record.to_hash_fields())
            .zadd(keys::TIMELINE, key, record.score());
        store.execute(batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeline_fallback_for_ids() {
        let (engine, store) = create_engine();
        write_legacy(&store, &record("a", "2025-12-19 12:00:00.000", 1)).await;
        write_legacy(&store, &record("b", "2025-12-19 12:00:01.000", 1)).await;
        write_legacy(&store, &record("a", "2025-12-19 12:00:02.000", 2)).await;

        let mut batch = Batch::new();
        batch.zadd(keys::TIMELINE, "legacy-key-without-separator", 1.0);
        store.execute(batch).await.unwrap();

        let ids = engine.candidate_ids(ScoreBound::Min, ScoreBound::Max).await.unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_timeline_fallback_keeps_ids_containing_separator() {
        let (engine, store) = create_engine();
        let ingestor = Ingestor::new(store.clone(), &IngestConfig::default());
        let odd = record("a:::b", "2025-12-19 12:00:00.000", 4);
        ingestor.insert(&odd).await.unwrap();
        ingestor
            .insert(&record("plain", "2025-12-19 12:00:01.000", 1))
            .await
            .unwrap();

        let mut batch = Batch::new();
        batch
            .del(keys::REQUEST_DIRECTORY)
            .del(keys::request_timeline("a:::b"))
            .del(keys::request_list("a:::b"));
        store.execute(batch).await.unwrap();

        let ids = engine.candidate_ids(ScoreBound::Min, ScoreBound::Max).await.unwrap();
        assert_eq!(ids, vec!["plain", "a:::b"]);

        assert_eq!(engine.record_keys("a:::b").await.unwrap(), vec![odd.key().encode()]);
        assert_eq!(engine.records_for("a:::b").await.unwrap(), vec![odd]);
    }

    #[tokio::test]
    async fn test_directory_preferred() {
        let (engine, store) = create_engine();
        write_legacy(&store, &record("timeline-only", "2025-12-19 12:00:00.000", 1)).await;

        let mut batch = Batch::new();
        batch
            .zadd(keys::REQUEST_DIRECTORY, "x", 10.0)
            .zadd(keys::REQUEST_DIRECTORY, "y", 20.0)
            .zadd(keys::REQUEST_DIRECTORY, "z", 30.0);
        store.execute(batch).await.unwrap();

        let ids = engine
            .candidate_ids(ScoreBound::Value(10.0), ScoreBound::Value(20.0))
            .await
            .unwrap();
        assert_eq!(ids, vec!["y", "x"]);
    }

    #[tokio::test]
    async fn test_record_keys_fall_back_in_order() {
        let (engine, store) = create_engine();

        // Only the list exists
        let mut batch = Batch::new();
        batch.lpush(keys::request_list("listed"), "k1").lpush(keys::request_list("listed"), "k2");
        store.execute(batch).await.unwrap();
        assert_eq!(engine.record_keys("listed").await.unwrap(), vec!["k2", "k1"]);

        // Only the timeline has it
        let r = record("scanned", "2025-12-19 12:00:00.000", 3);
        write_legacy(&store, &r).await;
        assert_eq!(engine.record_keys("scanned").await.unwrap(), vec![r.key().encode()]);

        assert!(engine.record_keys("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_skips_vanished_records() {
        let (engine, store) = create_engine();
        let r = record("a", "2025-12-19 12:00:00.000", 1);
        write_legacy(&store, &r).await;

        let wanted = vec![r.key().encode(), "gone:::a:::2".to_string()];
        let records = engine.fetch_records(&wanted).await.unwrap();
        assert_eq!(records, vec![r]);

        let stored = store
            .zrange_by_rank(keys::TIMELINE, 0, None, Order::Ascending)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }
}
