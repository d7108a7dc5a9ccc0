//! Failing backends for tests

use crate::store::batch::{Batch, Order, ScoreBound};
use crate::store::error::{StoreError, StoreResult};
use crate::store::{KvStore, ScoredMember};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Backend whose every call hangs
pub struct StalledStore;

#[async_trait]
impl KvStore for StalledStore {
    fn backend_name(&self) -> &'static str {
        "stalled"
    }

    async fn ping(&self) -> StoreResult<()> {
        std::future::pending().await
    }

    async fn execute(&self, _batch: Batch) -> StoreResult<()> {
        std::future::pending().await
    }

    async fn hgetall(&self, _key: &str) -> StoreResult<HashMap<String, String>> {
        std::future::pending().await
    }

    async fn zrange_by_score(
        &self,
        _key: &str,
        _min: ScoreBound,
        _max: ScoreBound,
        _order: Order,
        _limit: Option<usize>,
    ) -> StoreResult<Vec<ScoredMember>> {
        std::future::pending().await
    }

    async fn zrange_by_rank(
        &self,
        _key: &str,
        _offset: usize,
        _count: Option<usize>,
        _order: Order,
    ) -> StoreResult<Vec<ScoredMember>> {
        std::future::pending().await
    }

    async fn zcard(&self, _key: &str) -> StoreResult<u64> {
        std::future::pending().await
    }

    async fn lrange(&self, _key: &str, _start: usize, _count: Option<usize>) -> StoreResult<Vec<String>> {
        std::future::pending().await
    }

    async fn scard(&self, _key: &str) -> StoreResult<u64> {
        std::future::pending().await
    }

    async fn exists(&self, _key: &str) -> StoreResult<bool> {
        std::future::pending().await
    }

    async fn flush_all(&self) -> StoreResult<()> {
        std::future::pending().await
    }
}

/// Backend that refuses every call
pub struct DownStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl KvStore for DownStore {
    fn backend_name(&self) -> &'static str {
        "down"
    }

    async fn ping(&self) -> StoreResult<()> {
        down()
    }

    async fn execute(&self, _batch: Batch) -> StoreResult<()> {
        down()
    }

    async fn hgetall(&self, _key: &str) -> StoreResult<HashMap<String, String>> {
        down()
    }

    async fn zrange_by_score(
        &self,
        _key: &str,
        _min: ScoreBound,
        _max: ScoreBound,
        _order: Order,
        _limit: Option<usize>,
    ) -> StoreResult<Vec<ScoredMember>> {
        down()
    }

    async fn zrange_by_rank(
        &self,
        _key: &str,
        _offset: usize,
        _count: Option<usize>,
        _order: Order,
    ) -> StoreResult<Vec<ScoredMember>> {
        down()
    }

    async fn zcard(&self, _key: &str) -> StoreResult<u64> {
        down()
    }

    async fn lrange(&self, _key: &str, _start: usize, _count: Option<usize>) -> StoreResult<Vec<String>> {
        down()
    }

    async fn scard(&self, _key: &str) -> StoreResult<u64> {
        down()
    }

    async fn exists(&self, _key: &str) -> StoreResult<bool> {
        down()
    }

    async fn flush_all(&self) -> StoreResult<()> {
        down()
    }
}

/// Backend that applies a queued batch right after the first score-range read
pub struct InterleavingStore {
    inner: Arc<dyn KvStore>,
    pending: Mutex<Option<Batch>>,
}

impl InterleavingStore {
    pub fn new(inner: Arc<dyn KvStore>, pending: Batch) -> Self {
        Self {
            inner,
            pending: Mutex::new(Some(pending)),
        }
    }
}

#[async_trait]
impl KvStore for InterleavingStore {
    fn backend_name(&self) -> &'static str {
        "interleaving"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn execute(&self, batch: Batch) -> StoreResult<()> {
        self.inner.execute(batch).await
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.inner.hgetall(key).await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        order: Order,
        limit: Option<usize>,
    ) -> StoreResult<Vec<ScoredMember>> {
        let members = self.inner.zrange_by_score(key, min, max, order, limit).await?;
        let pending = self.pending.lock().ok().and_then(|mut slot| slot.take());
        if let Some(batch) = pending {
            self.inner.execute(batch).await?;
        }
        Ok(members)
    }

    async fn zrange_by_rank(
        &self,
        key: &str,
        offset: usize,
        count: Option<usize>,
        order: Order,
    ) -> StoreResult<Vec<ScoredMember>> {
        self.inner.zrange_by_rank(key, offset, count, order).await
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.inner.zcard(key).await
    }

    async fn lrange(&self, key: &str, start: usize, count: Option<usize>) -> StoreResult<Vec<String>> {
        self.inner.lrange(key, start, count).await
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        self.inner.scard(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn flush_all(&self) -> StoreResult<()> {
        self.inner.flush_all().await
    }
}
