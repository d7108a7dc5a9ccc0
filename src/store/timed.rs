//! Bounded store calls
//!
//! [`TimedStore`] is the handle the log engine holds: a shared backend plus
//! the per-operation timeout every call is wrapped in. Cloning is cheap and
//! all clones share the same backend.

use crate::store::batch::{Batch, Order, ScoreBound};
use crate::store::error::{StoreError, StoreResult};
use crate::store::{KvStore, ScoredMember};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct TimedStore {
    inner: Arc<dyn KvStore>,
    op_timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn KvStore>, op_timeout: Duration) -> Self {
        Self { inner, op_timeout }
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    async fn bounded<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.bounded(self.inner.ping()).await
    }

    pub async fn execute(&self, batch: Batch) -> StoreResult<()> {
        self.bounded(self.inner.execute(batch)).await
    }

    pub async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.bounded(self.inner.hgetall(key)).await
    }

    pub async fn hgetall_many(&self, keys: &[String]) -> StoreResult<Vec<HashMap<String, String>>> {
        self.bounded(self.inner.hgetall_many(keys)).await
    }

    pub async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        order: Order,
        limit: Option<usize>,
    ) -> StoreResult<Vec<ScoredMember>> {
        self.bounded(self.inner.zrange_by_score(key, min, max, order, limit))
            .await
    }

    pub async fn zrange_by_rank(
        &self,
        key: &str,
        offset: usize,
        count: Option<usize>,
        order: Order,
    ) -> StoreResult<Vec<ScoredMember>> {
        self.bounded(self.inner.zrange_by_rank(key, offset, count, order))
            .await
    }

    pub async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.bounded(self.inner.zcard(key)).await
    }

    pub async fn lrange(&self, key: &str, start: usize, count: Option<usize>) -> StoreResult<Vec<String>> {
        self.bounded(self.inner.lrange(key, start, count)).await
    }

    pub async fn scard(&self, key: &str) -> StoreResult<u64> {
        self.bounded(self.inner.scard(key)).await
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.bounded(self.inner.exists(key)).await
    }

    pub async fn flush_all(&self) -> StoreResult<()> {
        self.bounded(self.inner.flush_all()).await
    }

    pub async fn purge_expired(&self) -> StoreResult<u64> {
        self.bounded(self.inner.purge_expired()).await
    }
}

impl std::fmt::Debug for TimedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedStore")
            .field("backend", &self.inner.backend_name())
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}
