//! Log service facade
//!
//! [`LogService`] is the handle the outer layers hold. Nothing it returns
//! is an error: ingestion failures are logged and dropped, query failures
//! are logged and turned into empty results.

use crate::config::Config;
use crate::error::LogResult;
use crate::ingest::Ingestor;
use crate::model::{GlobalCounters, GlobalStats, LogRecord, RequestGroup, RequestSummary, SearchPage, SearchParams};
use crate::query::QueryEngine;
use crate::retention::RetentionSweeper;
use crate::store::{self, TimedStore};
use async_trait::async_trait;
use std::sync::Arc;

/// Operations offered to the HTTP layer and to log producers
#[async_trait]
pub trait LogBackend: Send + Sync {
    async fn overview(&self) -> GlobalStats;

    async fn search(&self, params: &SearchParams) -> SearchPage;

    async fn detail(&self, request_id: &str) -> Option<RequestGroup>;

    /// Returns the number of records deleted; `days == 0` drops everything
    async fn clean(&self, days: u32) -> u64;

    async fn insert(&self, record: &LogRecord);

    async fn insert_batch(&self, records: &[LogRecord]);
}

#[derive(Debug, Clone)]
pub struct LogService {
    store: TimedStore,
    ingestor: Ingestor,
    query: QueryEngine,
    retention: Arc<RetentionSweeper>,
}

impl LogService {
    /// Build the service over an already opened store
    pub fn new(store: TimedStore, config: &Config) -> Self {
        Self {
            ingestor: Ingestor::new(store.clone(), &config.ingest),
            query: QueryEngine::new(store.clone(), config.query.clone()),
            retention: Arc::new(RetentionSweeper::new(store.clone())),
            store,
        }
    }

    /// Open the configured backend and build the service over it
    pub fn open(config: &Config) -> LogResult<Self> {
        let backend = store::open(&config.store)?;
        let store = TimedStore::new(backend, config.store.op_timeout());

        tracing::info!(
            backend = store.backend_name(),
            op_timeout_ms = config.store.op_timeout_ms,
            "Log service ready"
        );
        Ok(Self::new(store, config))
    }

    pub fn retention(&self) -> &Arc<RetentionSweeper> {
        &self.retention
    }

    /// Whether the store answers
    pub async fn ping(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Store ping failed");
                false
            }
        }
    }

    /// Running counters, zeroed when the store fails
    pub async fn counters(&self) -> GlobalCounters {
        self.query.counters().await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Counter read failed");
            GlobalCounters::default()
        })
    }

    /// Stored summary of one request
    pub async fn summary(&self, request_id: &str) -> Option<RequestSummary> {
        self.query.summary(request_id).await.unwrap_or_else(|e| {
            tracing::error!(request_id, error = %e, "Summary read failed");
            None
        })
    }
}

#[async_trait]
impl LogBackend for LogService {
    async fn overview(&self) -> GlobalStats {
        self.query.overview().await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Overview failed");
            GlobalStats::default()
        })
    }

    async fn search(&self, params: &SearchParams) -> SearchPage {
        self.query.search(params).await.unwrap_or_else(|e| {
            tracing::error!(error = %e, page = params.page, "Search failed");
            SearchPage::empty(params)
        })
    }

    async fn detail(&self, request_id: &str) -> Option<RequestGroup> {
        self.query.detail(request_id).await.unwrap_or_else(|e| {
            tracing::error!(request_id, error = %e, "Detail lookup failed");
            None
        })
    }

    async fn clean(&self, days: u32) -> u64 {
        self.retention.clean(days).await.unwrap_or_else(|e| {
            tracing::error!(days, error = %e, "Clean failed");
            0
        })
    }

    async fn insert(&self, record: &LogRecord) {
        if let Err(e) = self.ingestor.insert(record).await {
            tracing::warn!(
                request_id = %record.request_id,
                key = %record.key(),
                error = %e,
                "Dropped log record"
            );
        }
    }

    async fn insert_batch(&self, records: &[LogRecord]) {
        if let Err(e) = self.ingestor.insert_batch(records).await {
            tracing::warn!(records = records.len(), error = %e, "Dropped log batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use crate::keys;
    use crate::model::LogLevel;
    use crate::store::testing::{DownStore, StalledStore};
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn create_service() -> LogService {
        let store = TimedStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(5));
        LogService::new(store, &Config::default())
    }

    fn at(offset_ms: i64) -> NaiveDateTime {
        keys::parse_timestamp("2025-12-19 12:00:00.000").unwrap() + ChronoDuration::milliseconds(offset_ms)
    }

    fn sqlite_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Sqlite;
        config.store.path = dir.path().join("logs.db").to_string_lossy().to_string();
        config
    }

    fn create_sqlite_service() -> (LogService, TempDir) {
        let dir = tempdir().unwrap();
        (LogService::open(&sqlite_config(&dir)).unwrap(), dir)
    }

    async fn request_detail_scenario(service: &LogService) {
        let levels = [LogLevel::Info, LogLevel::Error, LogLevel::Info];
        for (i, (offset, level)) in [0, 10, 50].into_iter().zip(levels).enumerate() {
            let record = LogRecord::new("r1", at(offset), level, "step")
                .ip("1.2.3.4")
                .location("app.views", "index", i as u32 + 1);
            service.insert(&record).await;
        }

        let group = service.detail("r1").await.unwrap();
        assert_eq!(group.count, 3);
        assert!(group.has_error);
        assert_eq!(group.start_time, at(0));
        assert_eq!(group.end_time, at(50));
        assert_eq!(group.duration_ms, 50.0);
        assert_eq!(group.ip, "1.2.3.4");
        assert_eq!(group.levels.get(LogLevel::Info), 2);
        assert_eq!(group.levels.get(LogLevel::Error), 1);
        assert_eq!(group.levels.total(), 3);

        let json = serde_json::to_value(&group.levels).unwrap();
        assert_eq!(json, serde_json::json!({"INFO": 2, "ERROR": 1}));
    }

    async fn search_pagination_scenario(service: &LogService) {
        let records: Vec<LogRecord> = (0..150)
            .map(|i| {
                let id = format!("req-{}", i % 3);
                LogRecord::new(id, at(i as i64), LogLevel::Info, "tick").location("app", "loop", i as u32)
            })
            .collect();
        service.insert_batch(&records).await;

        let first = service.search(&SearchParams::page(1, 2)).await;
        assert_eq!(first.total, 3);
        assert_eq!(first.groups.len(), 2);
        assert!(first.groups[0].start_time > first.groups[1].start_time);
        assert!(first.groups.iter().all(|g| g.count == 50));

        let second = service.search(&SearchParams::page(2, 2)).await;
        assert_eq!(second.total, 3);
        assert_eq!(second.groups.len(), 1);

        let mut seen: Vec<String> = first
            .groups
            .iter()
            .chain(second.groups.iter())
            .map(|g| g.request_id.clone())
            .collect();
        seen.sort();
        assert_eq!(seen, vec!["req-0", "req-1", "req-2"]);
    }

    async fn clean_zero_scenario(service: &LogService) {
        let now = Utc::now().naive_utc();
        let records: Vec<LogRecord> = (0..25)
            .map(|i| {
                LogRecord::new(format!("r{}", i % 4), now, LogLevel::Warning, "w").location("m", "f", i)
            })
            .collect();
        service.insert_batch(&records).await;
        assert_eq!(service.overview().await.total, 25);

        assert_eq!(service.clean(0).await, 25);
        assert_eq!(service.overview().await.total, 0);
        assert!(service.detail("r0").await.is_none());
        assert_eq!(service.search(&SearchParams::default()).await.total, 0);
    }

    #[tokio::test]
    async fn test_request_detail_scenario() {
        request_detail_scenario(&create_service()).await;
    }

    #[tokio::test]
    async fn test_request_detail_scenario_sqlite() {
        let (service, _dir) = create_sqlite_service();
        request_detail_scenario(&service).await;
    }

    #[tokio::test]
    async fn test_search_pagination_scenario() {
        search_pagination_scenario(&create_service()).await;
    }

    #[tokio::test]
    async fn test_search_pagination_scenario_sqlite() {
        let (service, _dir) = create_sqlite_service();
        search_pagination_scenario(&service).await;
    }

    #[tokio::test]
    async fn test_clean_zero_scenario() {
        clean_zero_scenario(&create_service()).await;
    }

    #[tokio::test]
    async fn test_clean_zero_scenario_sqlite() {
        let (service, dir) = create_sqlite_service();
        clean_zero_scenario(&service).await;

        // The wipe persists across a reopen
        let reopened = LogService::open(&sqlite_config(&dir)).unwrap();
        assert_eq!(reopened.counters().await, GlobalCounters::default());
    }

    #[tokio::test]
    async fn test_eviction_hides_old_records() {
        let service = create_service();
        let now = Utc::now().naive_utc();
        service
            .insert(&LogRecord::new("stale", now - ChronoDuration::days(40), LogLevel::Info, "old"))
            .await;
        service
            .insert(&LogRecord::new("live", now, LogLevel::Info, "new"))
            .await;

        assert_eq!(service.clean(30).await, 1);
        assert!(service.detail("stale").await.is_none());

        let page = service.search(&SearchParams::page(1, 10)).await;
        assert!(page.groups.iter().all(|g| g.request_id != "stale"));
        assert_eq!(page.groups.len(), 1);
    }

    #[tokio::test]
    async fn test_reads_are_idempotent() {
        let service = create_service();
        let now = Utc::now().naive_utc();
        for i in 0..5 {
            service
                .insert(&LogRecord::new("r", now - ChronoDuration::minutes(i), LogLevel::Debug, "d").location("m", "f", i as u32))
                .await;
        }

        assert_eq!(service.overview().await, service.overview().await);
        assert_eq!(service.detail("r").await, service.detail("r").await);
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let service = create_service();
        let record = LogRecord::new("rt", at(123), LogLevel::Success, "Order placed: #42")
            .ip("203.0.113.9")
            .location("shop.orders", "place_order", 88)
            .raw_line("2025-12-19 12:00:00.123 | SUCCESS | Order placed: #42");
        service.insert(&record).await;

        let group = service.detail("rt").await.unwrap();
        assert_eq!(group.logs, vec![record]);
    }

    #[tokio::test]
    async fn test_down_store_yields_empty_results() {
        let store = TimedStore::new(Arc::new(DownStore), Duration::from_secs(5));
        let service = LogService::new(store, &Config::default());

        service
            .insert(&LogRecord::new("r", at(0), LogLevel::Error, "lost"))
            .await;
        service.insert_batch(&[LogRecord::new("r", at(1), LogLevel::Error, "lost")]).await;

        assert!(!service.ping().await);
        assert_eq!(service.overview().await, GlobalStats::default());
        let page = service.search(&SearchParams::page(2, 5)).await;
        assert_eq!(page.total, 0);
        assert_eq!(page.page, 2);
        assert!(page.groups.is_empty());
        assert!(service.detail("r").await.is_none());
        assert_eq!(service.clean(7).await, 0);
        assert_eq!(service.counters().await, GlobalCounters::default());
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let store = TimedStore::new(Arc::new(StalledStore), Duration::from_millis(20));
        let service = LogService::new(store, &Config::default());

        service
            .insert(&LogRecord::new("r", at(0), LogLevel::Info, "slow"))
            .await;
        assert_eq!(service.overview().await.total, 0);
        assert!(service.search(&SearchParams::default()).await.groups.is_empty());
        assert!(service.detail("r").await.is_none());
        assert!(service.summary("r").await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_paging_gives_empty_page() {
        let service = create_service();
        let page = service.search(&SearchParams::page(1, 1000)).await;
        assert_eq!(page.total, 0);
        assert_eq!(page.page_size, 1000);
    }
}
