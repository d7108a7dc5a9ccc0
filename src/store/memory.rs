//! In-memory store backend
//!
//! Keeps every structure in process memory behind a single async RwLock.
//! Expired keys are hidden from reads and dropped lazily on the next write
//! to the same key or by [`KvStore::purge_expired`].

use crate::store::batch::{Batch, Command, Order, ScoreBound};
use crate::store::error::{StoreError, StoreResult};
use crate::store::{KvStore, ScoredMember};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Instant;
use tokio::sync::RwLock;

/// f64 with a total order, for sorted-set keys
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sorted set: member → score plus (score, member) ordering
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn add(&mut self, member: &str, score: f64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(Score(old), member.to_string()));
        }
        self.ordered.insert((Score(score), member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(Score(score), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn iter(&self, order: Order) -> Box<dyn Iterator<Item = &(Score, String)> + '_> {
        match order {
            Order::Ascending => Box::new(self.ordered.iter()),
            Order::Descending => Box::new(self.ordered.iter().rev()),
        }
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Debug)]
enum Value {
    Hash(HashMap<String, String>),
    ZSet(SortedSet),
    List(VecDeque<String>),
    Set(HashSet<String>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Hash(h) => h.is_empty(),
            Value::ZSet(z) => z.len() == 0,
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

type Keyspace = HashMap<String, Entry>;

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

/// Live entry for reads (expired entries are invisible)
fn live<'a>(keyspace: &'a Keyspace, key: &str, now: Instant) -> Option<&'a Entry> {
    keyspace.get(key).filter(|e| !e.is_expired(now))
}

/// Drop the key if it has expired, so writes start from empty
fn evict_if_expired(keyspace: &mut Keyspace, key: &str, now: Instant) {
    if keyspace.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
        keyspace.remove(key);
    }
}

fn hash_mut<'a>(
    keyspace: &'a mut Keyspace,
    key: &str,
    now: Instant,
) -> StoreResult<&'a mut HashMap<String, String>> {
    evict_if_expired(keyspace, key, now);
    let entry = keyspace
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
    match &mut entry.value {
        Value::Hash(h) => Ok(h),
        _ => Err(wrong_type(key, "hash")),
    }
}

fn zset_mut<'a>(
    keyspace: &'a mut Keyspace,
    key: &str,
    now: Instant,
) -> StoreResult<&'a mut SortedSet> {
    evict_if_expired(keyspace, key, now);
    let entry = keyspace
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::ZSet(SortedSet::default())));
    match &mut entry.value {
        Value::ZSet(z) => Ok(z),
        _ => Err(wrong_type(key, "zset")),
    }
}

fn list_mut<'a>(
    keyspace: &'a mut Keyspace,
    key: &str,
    now: Instant,
) -> StoreResult<&'a mut VecDeque<String>> {
    evict_if_expired(keyspace, key, now);
    let entry = keyspace
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
    match &mut entry.value {
        Value::List(l) => Ok(l),
        _ => Err(wrong_type(key, "list")),
    }
}

fn set_mut<'a>(
    keyspace: &'a mut Keyspace,
    key: &str,
    now: Instant,
) -> StoreResult<&'a mut HashSet<String>> {
    evict_if_expired(keyspace, key, now);
    let entry = keyspace
        .entry(key.to_string())
        .or_insert_with(|| Entry::new(Value::Set(HashSet::new())));
    match &mut entry.value {
        Value::Set(s) => Ok(s),
        _ => Err(wrong_type(key, "set")),
    }
}

fn apply(keyspace: &mut Keyspace, command: &Command, now: Instant) -> StoreResult<()> {
    match command {
        Command::HSet { key, fields } => {
            let hash = hash_mut(keyspace, key, now)?;
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
        }
        Command::HSetNx { key, field, value } => {
            hash_mut(keyspace, key, now)?
                .entry(field.clone())
                .or_insert_with(|| value.clone());
        }
        Command::HSetMin { key, field, value } => {
            let hash = hash_mut(keyspace, key, now)?;
            match hash.get_mut(field) {
                Some(current) if current.as_str() <= value.as_str() => {}
                Some(current) => *current = value.clone(),
                None => {
                    hash.insert(field.clone(), value.clone());
                }
            }
        }
        Command::HIncrBy { key, field, delta } => {
            let hash = hash_mut(keyspace, key, now)?;
            let current = match hash.get(field) {
                Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::InvalidValue {
                    key: key.clone(),
                    reason: format!("field {} is not an integer", field),
                })?,
                None => 0,
            };
            hash.insert(field.clone(), (current + delta).to_string());
        }
        Command::Expire { key, ttl } => {
            evict_if_expired(keyspace, key, now);
            if let Some(entry) = keyspace.get_mut(key) {
                // A deadline past the clock's range never expires
                entry.expires_at = now.checked_add(*ttl);
            }
        }
        Command::ZAdd { key, member, score } => {
            zset_mut(keyspace, key, now)?.add(member, *score);
        }
        Command::ZRem { key, member } => {
            if live(keyspace, key, now).is_some() {
                zset_mut(keyspace, key, now)?.remove(member);
            }
        }
        Command::LPush { key, value } => {
            list_mut(keyspace, key, now)?.push_front(value.clone());
        }
        Command::SAdd { key, member } => {
            set_mut(keyspace, key, now)?.insert(member.clone());
        }
        Command::Del { key } => {
            keyspace.remove(key);
        }
    }

    // Empty containers do not exist
    let key = command.key();
    if keyspace.get(key).map(|e| e.value.is_empty()).unwrap_or(false) {
        keyspace.remove(key);
    }

    Ok(())
}

/// Thread-safe in-memory key-value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: RwLock<Keyspace>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn key_count(&self) -> usize {
        let now = Instant::now();
        let keyspace = self.keyspace.read().await;
        keyspace.values().filter(|e| !e.is_expired(now)).count()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn execute(&self, batch: Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let mut keyspace = self.keyspace.write().await;
        let mut first_error = None;

        for command in batch.commands() {
            if let Err(e) = apply(&mut keyspace, command, now) {
                tracing::debug!(key = command.key(), error = %e, "Batch command failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let keyspace = self.keyspace.read().await;
        match live(&keyspace, key, Instant::now()).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    async fn hgetall_many(&self, keys: &[String]) -> StoreResult<Vec<HashMap<String, String>>> {
        let now = Instant::now();
        let keyspace = self.keyspace.read().await;
        keys.iter()
            .map(|key| match live(&keyspace, key, now).map(|e| &e.value) {
                None => Ok(HashMap::new()),
                Some(Value::Hash(h)) => Ok(h.clone()),
                Some(_) => Err(wrong_type(key, "hash")),
            })
            .collect()
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        order: Order,
        limit: Option<usize>,
    ) -> StoreResult<Vec<ScoredMember>> {
        let keyspace = self.keyspace.read().await;
        let zset = match live(&keyspace, key, Instant::now()).map(|e| &e.value) {
            None => return Ok(Vec::new()),
            Some(Value::ZSet(z)) => z,
            Some(_) => return Err(wrong_type(key, "zset")),
        };

        Ok(zset
            .iter(order)
            .filter(|(s, _)| min.admits_from_below(s.0) && max.admits_from_above(s.0))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(s, m)| ScoredMember::new(m.clone(), s.0))
            .collect())
    }

    async fn zrange_by_rank(
        &self,
        key: &str,
        offset: usize,
        count: Option<usize>,
        order: Order,
    ) -> StoreResult<Vec<ScoredMember>> {
        let keyspace = self.keyspace.read().await;
        let zset = match live(&keyspace, key, Instant::now()).map(|e| &e.value) {
            None => return Ok(Vec::new()),
            Some(Value::ZSet(z)) => z,
            Some(_) => return Err(wrong_type(key, "zset")),
        };

        Ok(zset
            .iter(order)
            .skip(offset)
            .take(count.unwrap_or(usize::MAX))
            .map(|(s, m)| ScoredMember::new(m.clone(), s.0))
            .collect())
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let keyspace = self.keyspace.read().await;
        match live(&keyspace, key, Instant::now()).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::ZSet(z)) => Ok(z.len() as u64),
            Some(_) => Err(wrong_type(key, "zset")),
        }
    }

    async fn lrange(&self, key: &str, start: usize, count: Option<usize>) -> StoreResult<Vec<String>> {
        let keyspace = self.keyspace.read().await;
        match live(&keyspace, key, Instant::now()).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::List(l)) => Ok(l
                .iter()
                .skip(start)
                .take(count.unwrap_or(usize::MAX))
                .cloned()
                .collect()),
            Some(_) => Err(wrong_type(key, "list")),
        }
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let keyspace = self.keyspace.read().await;
        match live(&keyspace, key, Instant::now()).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::Set(s)) => Ok(s.len() as u64),
            Some(_) => Err(wrong_type(key, "set")),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let keyspace = self.keyspace.read().await;
        Ok(live(&keyspace, key, Instant::now()).is_some())
    }

    async fn flush_all(&self) -> StoreResult<()> {
        self.keyspace.write().await.clear();
        Ok(())
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.write().await;
        let before = keyspace.len();
        keyspace.retain(|_, e| !e.is_expired(now));
        Ok((before - keyspace.len()) as u64)
    }
}
