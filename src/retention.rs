//! Retention Sweep
//!
//! Removes records older than a cutoff from the Record Store and the
//! Timeline Index. Every other structure keeps its entries:
//!
//! - per-request lists and timelines expire on their own TTL
//! - dimension indexes, the Request Directory and summaries are left as-is
//! - global counters are never decremented
//!
//! Queries skip keys whose detail hash is gone, so the leftovers are
//! harmless. `clean(0)` is a separate destructive path that flushes the
//! entire store.

use crate::error::LogResult;
use crate::keys;
use crate::store::{Batch, Order, ScoreBound, TimedStore};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Detail deletions per batch
const SWEEP_CHUNK: usize = 1000;

#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    store: TimedStore,
    shutdown: Arc<RwLock<bool>>,
}

impl RetentionSweeper {
    pub fn new(store: TimedStore) -> Self {
        Self {
            store,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Drop records older than `days` days, or everything when `days` is 0
    ///
    /// Returns the number of records removed.
    pub async fn clean(&self, days: u32) -> LogResult<u64> {
        if days == 0 {
            return self.wipe().await;
        }

        let cutoff = ChronoDuration::try_days(i64::from(days))
            .and_then(|age| Utc::now().naive_utc().checked_sub_signed(age));
        match cutoff {
            Some(cutoff) => self.sweep_before(keys::score(&cutoff)).await,
            None => {
                tracing::debug!(days, "Cutoff predates every representable timestamp");
                Ok(0)
            }
        }
    }

    /// Drop every timeline entry with score at or below `cutoff` and its detail hash
    ///
    /// Entries written after the range read are left for the next sweep.
    pub async fn sweep_before(&self, cutoff: f64) -> LogResult<u64> {
        let expired = self
            .store
            .zrange_by_score(
                keys::TIMELINE,
                ScoreBound::Min,
                ScoreBound::Value(cutoff),
                Order::Ascending,
                None,
            )
            .await?;

        if expired.is_empty() {
            tracing::debug!(cutoff, "Nothing to sweep");
            return Ok(0);
        }

        // Each detail hash leaves together with its own timeline entry
        let removed = expired.len() as u64;
        for chunk in expired.chunks(SWEEP_CHUNK) {
            let mut batch = Batch::with_capacity(chunk.len() * 2);
            for entry in chunk {
                batch
                    .del(keys::detail(&entry.member))
                    .zrem(keys::TIMELINE, entry.member.as_str());
            }
            self.store.execute(batch).await?;
        }

        tracing::info!(removed, cutoff, "Retention sweep complete");
        Ok(removed)
    }

    /// Flush the whole store, returning the timeline size beforehand
    pub async fn wipe(&self) -> LogResult<u64> {
        let total = self.store.zcard(keys::TIMELINE).await?;
        self.store.flush_all().await?;

        tracing::warn!(removed = total, "Store wiped");
        Ok(total)
    }

    /// Start a periodic sweep
    ///
    /// Runs until [`shutdown`](Self::shutdown) is called. Failures are
    /// logged and the next tick tries again.
    pub fn start_background_sweep(self: &Arc<Self>, days: u32, every: Duration) -> JoinHandle<()> {
        let sweeper = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(every);

            loop {
                ticker.tick().await;

                if *sweeper.shutdown.read().await {
                    break;
                }

                // A zero here would wipe the store on every tick
                if days > 0 {
                    if let Err(e) = sweeper.clean(days).await {
                        tracing::error!("Background sweep failed: {}", e);
                    }
                }

                match sweeper.store.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged, "Purged expired keys"),
                    Err(e) => tracing::error!("Expired key purge failed: {}", e),
                }
            }

            tracing::info!("Background sweep stopped");
        })
    }

    pub async fn shutdown(&self) {
        *self.shutdown.write().await = true;
    }
}
