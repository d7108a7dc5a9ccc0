//! Loglens Key-Value Store
//!
//! The log engine keeps all of its state in a key-value store offering
//! hashes, sorted sets, lists and sets with per-key expiry:
//!
//! - **batch**: Write commands submitted in one round trip
//! - **memory**: In-process backend (tests, ephemeral deployments)
//! - **sqlite**: Persistent backend on a single SQLite file
//! - **timed**: Handle bounding every call by the operation timeout
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Ingestor → Batch [HSet, Expire, ZAdd, LPush, HIncrBy, ...] → KvStore::execute
//!
//! Read Path:
//!   Query → zrange / lrange → hgetall_many → records
//! ```
//!
//! There are no in-process locks above this layer: every coordination point
//! is a per-key store operation.

pub mod batch;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod timed;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{Batch, Command, Order, ScoreBound};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use timed::TimedStore;

use crate::config::{StoreBackend, StoreConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A sorted-set member with its score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// Store operations the log engine relies on
///
/// Expired keys behave as absent on every read. Sorted-set members with equal
/// scores are ordered by member.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Check that the backend is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Apply a batch of write commands in order
    ///
    /// Every command is attempted; the first failure is reported after the
    /// rest of the batch has been applied.
    async fn execute(&self, batch: Batch) -> StoreResult<()>;

    /// All fields of a hash (empty when the key is absent)
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Pipelined `hgetall` over many keys, in input order
    async fn hgetall_many(&self, keys: &[String]) -> StoreResult<Vec<HashMap<String, String>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.hgetall(key).await?);
        }
        Ok(results)
    }

    /// Sorted-set members with `min <= score <= max`
    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        order: Order,
        limit: Option<usize>,
    ) -> StoreResult<Vec<ScoredMember>>;

    /// Sorted-set members by rank, skipping `offset` and returning at most `count`
    async fn zrange_by_rank(
        &self,
        key: &str,
        offset: usize,
        count: Option<usize>,
        order: Order,
    ) -> StoreResult<Vec<ScoredMember>>;

    /// Number of members in a sorted set
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// List values from the head, skipping `start` and returning at most `count`
    async fn lrange(&self, key: &str, start: usize, count: Option<usize>) -> StoreResult<Vec<String>>;

    /// Number of members in a set
    async fn scard(&self, key: &str) -> StoreResult<u64>;

    /// Whether a live key exists
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Remove every key
    async fn flush_all(&self) -> StoreResult<()>;

    /// Physically drop expired keys, returning how many were removed
    async fn purge_expired(&self) -> StoreResult<u64> {
        Ok(0)
    }
}

/// Open the backend selected by the configuration
pub fn open(config: &StoreConfig) -> StoreResult<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            tracing::info!(path = %config.path, "Opening SQLite store");
            let store = SqliteStore::open(&config.path, config.busy_timeout())?;
            Ok(Arc::new(store))
        }
    }
}
