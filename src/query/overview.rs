//! Overview statistics
//!
//! The overview is a sample over the most recent timeline entries, not an
//! exact global aggregate. Exact running totals come from [`counters`].
//!
//! [`counters`]: QueryEngine::counters

use crate::error::LogResult;
use crate::keys;
use crate::model::{GlobalCounters, GlobalStats, IpStat, LevelCounts, LogRecord, TimelineBucket};
use crate::query::QueryEngine;
use crate::store::Order;
use chrono::{Duration, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

const HOUR_BUCKET_FORMAT: &str = "%Y-%m-%d %H:00:00";

impl QueryEngine {
    /// Statistics over the recent window, hourly buckets relative to now
    pub async fn overview(&self) -> LogResult<GlobalStats> {
        self.overview_at(Utc::now().naive_utc()).await
    }

    /// Statistics over the recent window, hourly buckets relative to `now`
    pub async fn overview_at(&self, now: NaiveDateTime) -> LogResult<GlobalStats> {
        let window = self
            .store
            .zrange_by_rank(keys::TIMELINE, 0, Some(self.config.overview_window), Order::Descending)
            .await?;

        let record_keys: Vec<String> = window.into_iter().map(|m| m.member).collect();
        let records = self.fetch_records(&record_keys).await?;

        Ok(self.summarize(records, now))
    }

    /// Aggregate newest-first records
    fn summarize(&self, records: Vec<LogRecord>, now: NaiveDateTime) -> GlobalStats {
        if records.is_empty() {
            return GlobalStats::default();
        }

        let levels: LevelCounts = records.iter().map(|r| r.level).collect();
        let request_ids: HashSet<&str> = records.iter().map(|r| r.request_id.as_str()).collect();

        let mut ip_counts: HashMap<&str, u64> = HashMap::new();
        for record in &records {
            *ip_counts.entry(record.ip.as_str()).or_insert(0) += 1;
        }
        let ip_count = ip_counts.len() as u64;

        let mut ip_stats: Vec<IpStat> = ip_counts
            .into_iter()
            .map(|(ip, count)| IpStat {
                ip: ip.to_string(),
                count,
            })
            .collect();
        ip_stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip.cmp(&b.ip)));
        ip_stats.truncate(self.config.top_ips);

        let cutoff = now - Duration::hours(24);
        let mut hourly: BTreeMap<String, LevelCounts> = BTreeMap::new();
        for record in records.iter().filter(|r| r.timestamp >= cutoff) {
            hourly
                .entry(record.timestamp.format(HOUR_BUCKET_FORMAT).to_string())
                .or_default()
                .increment(record.level);
        }
        let timeline_data = hourly
            .into_iter()
            .map(|(time, levels)| TimelineBucket {
                time,
                total: levels.total(),
                levels,
            })
            .collect();

        let total = records.len() as u64;
        let request_count = request_ids.len() as u64;
        let recent_logs = records.into_iter().take(self.config.recent_limit).collect();

        GlobalStats {
            total,
            request_count,
            ip_count,
            timeline_data,
            ip_stats,
            recent_logs,
            ..GlobalStats::default()
        }
        .with_levels(levels)
    }

    /// Running counters from the global stats keys
    pub async fn counters(&self) -> LogResult<GlobalCounters> {
        let stats = self.store.hgetall(keys::GLOBAL_STATS).await?;

        Ok(GlobalCounters {
            total: stats.get("total").and_then(|v| v.parse().ok()).unwrap_or(0),
            levels: LevelCounts::from_hash_fields(&stats),
            unique_requests: self.store.scard(keys::UNIQUE_REQUESTS).await?,
            unique_ips: self.store.scard(keys::UNIQUE_IPS).await?,
            timeline_len: self.store.zcard(keys::TIMELINE).await?,
        })
    }
}
