//! SQLite store backend
//!
//! Persists every structure in one SQLite file, one table per structure plus
//! a key table carrying the structure kind and expiry:
//!
//! ```text
//! kv_keys(key, kind, expires_at)      -- kind ∈ hash | zset | list | set
//! kv_hash(key, field, value)
//! kv_zset(key, member, score)         -- indexed on (key, score, member)
//! kv_list(key, seq, value)            -- head = smallest seq
//! kv_set(key, member)
//! ```
//!
//! Each batch runs in one transaction on a blocking thread. The connection
//! lives behind a std Mutex because `rusqlite::Connection` is not `Sync`.

use crate::store::batch::{Batch, Command, Order, ScoreBound};
use crate::store::error::{StoreError, StoreResult};
use crate::store::{KvStore, ScoredMember};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const KIND_HASH: &str = "hash";
const KIND_ZSET: &str = "zset";
const KIND_LIST: &str = "list";
const KIND_SET: &str = "set";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv_keys (
        key TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        expires_at INTEGER
    );
    CREATE TABLE IF NOT EXISTS kv_hash (
        key TEXT NOT NULL,
        field TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (key, field)
    );
    CREATE TABLE IF NOT EXISTS kv_zset (
        key TEXT NOT NULL,
        member TEXT NOT NULL,
        score REAL NOT NULL,
        PRIMARY KEY (key, member)
    );
    CREATE INDEX IF NOT EXISTS idx_zset_score ON kv_zset(key, score, member);
    CREATE TABLE IF NOT EXISTS kv_list (
        key TEXT NOT NULL,
        seq INTEGER NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (key, seq)
    );
    CREATE TABLE IF NOT EXISTS kv_set (
        key TEXT NOT NULL,
        member TEXT NOT NULL,
        PRIMARY KEY (key, member)
    );
    CREATE INDEX IF NOT EXISTS idx_keys_expiry ON kv_keys(expires_at);
";

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

/// Kind of a live key (expired keys read as absent)
fn live_kind(conn: &Connection, key: &str, now: i64) -> StoreResult<Option<String>> {
    let row: Option<(String, Option<i64>)> = conn
        .prepare_cached("SELECT kind, expires_at FROM kv_keys WHERE key = ?1")?
        .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;

    Ok(row.and_then(|(kind, expires_at)| match expires_at {
        Some(t) if t <= now => None,
        _ => Some(kind),
    }))
}

/// Whether the key is live with the expected kind; absent keys yield `false`
fn check_kind(conn: &Connection, key: &str, kind: &'static str, now: i64) -> StoreResult<bool> {
    match live_kind(conn, key, now)? {
        None => Ok(false),
        Some(k) if k == kind => Ok(true),
        Some(_) => Err(wrong_type(key, kind)),
    }
}

fn delete_key(conn: &Connection, key: &str) -> StoreResult<()> {
    for table in ["kv_hash", "kv_zset", "kv_list", "kv_set", "kv_keys"] {
        conn.prepare_cached(&format!("DELETE FROM {} WHERE key = ?1", table))?
            .execute(params![key])?;
    }
    Ok(())
}

/// Make `key` ready for a write of the given kind
fn prepare_key(conn: &Connection, key: &str, kind: &'static str, now: i64) -> StoreResult<()> {
    let row: Option<(String, Option<i64>)> = conn
        .prepare_cached("SELECT kind, expires_at FROM kv_keys WHERE key = ?1")?
        .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;

    match row {
        Some((_, Some(expires_at))) if expires_at <= now => {
            delete_key(conn, key)?;
        }
        Some((existing, _)) if existing == kind => return Ok(()),
        Some(_) => return Err(wrong_type(key, kind)),
        None => {}
    }

    conn.prepare_cached("INSERT INTO kv_keys (key, kind, expires_at) VALUES (?1, ?2, NULL)")?
        .execute(params![key, kind])?;
    Ok(())
}

fn drop_if_empty(conn: &Connection, key: &str, table: &str) -> StoreResult<()> {
    let count: i64 = conn
        .prepare_cached(&format!("SELECT COUNT(*) FROM {} WHERE key = ?1", table))?
        .query_row(params![key], |row| row.get(0))?;
    if count == 0 {
        delete_key(conn, key)?;
    }
    Ok(())
}

/// SQL fragment and parameters for an inclusive score range
fn score_clause(min: ScoreBound, max: ScoreBound) -> (String, Vec<f64>) {
    let mut clause = String::new();
    let mut values = Vec::new();

    match min {
        ScoreBound::Min => {}
        ScoreBound::Max => clause.push_str(" AND 0 = 1"),
        ScoreBound::Value(v) => {
            clause.push_str(" AND score >= ?");
            values.push(v);
        }
    }
    match max {
        ScoreBound::Max => {}
        ScoreBound::Min => clause.push_str(" AND 0 = 1"),
        ScoreBound::Value(v) => {
            clause.push_str(" AND score <= ?");
            values.push(v);
        }
    }

    (clause, values)
}

fn order_sql(order: Order) -> &'static str {
    match order {
        Order::Ascending => "ORDER BY score ASC, member ASC",
        Order::Descending => "ORDER BY score DESC, member DESC",
    }
}

fn limit_value(count: Option<usize>) -> i64 {
    count.map(|c| c as i64).unwrap_or(-1)
}

fn apply(conn: &Connection, command: &Command, now: i64) -> StoreResult<()> {
    match command {
        Command::HSet { key, fields } => {
            prepare_key(conn, key, KIND_HASH, now)?;
            let mut stmt = conn.prepare_cached(
                "INSERT INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
            )?;
            for (field, value) in fields {
                stmt.execute(params![key, field, value])?;
            }
        }
        Command::HSetNx { key, field, value } => {
            prepare_key(conn, key, KIND_HASH, now)?;
            conn.prepare_cached(
                "INSERT OR IGNORE INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)",
            )?
            .execute(params![key, field, value])?;
        }
        Command::HSetMin { key, field, value } => {
            prepare_key(conn, key, KIND_HASH, now)?;
            conn.prepare_cached(
                "INSERT INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, field) DO UPDATE SET value = MIN(value, excluded.value)",
            )?
            .execute(params![key, field, value])?;
        }
        Command::HIncrBy { key, field, delta } => {
            prepare_key(conn, key, KIND_HASH, now)?;
            let current: Option<String> = conn
                .prepare_cached("SELECT value FROM kv_hash WHERE key = ?1 AND field = ?2")?
                .query_row(params![key, field], |row| row.get(0))
                .optional()?;
            let current = match current {
                Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::InvalidValue {
                    key: key.clone(),
                    reason: format!("field {} is not an integer", field),
                })?,
                None => 0,
            };
            conn.prepare_cached(
                "INSERT INTO kv_hash (key, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![key, field, (current + delta).to_string()])?;
        }
        Command::Expire { key, ttl } => {
            if live_kind(conn, key, now)?.is_some() {
                let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                let expires_at = now.saturating_add(ttl_ms);
                conn.prepare_cached("UPDATE kv_keys SET expires_at = ?1 WHERE key = ?2")?
                    .execute(params![expires_at, key])?;
            }
        }
        Command::ZAdd { key, member, score } => {
            prepare_key(conn, key, KIND_ZSET, now)?;
            conn.prepare_cached(
                "INSERT INTO kv_zset (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
            )?
            .execute(params![key, member, score])?;
        }
        Command::ZRem { key, member } => {
            if check_kind(conn, key, KIND_ZSET, now)? {
                conn.prepare_cached("DELETE FROM kv_zset WHERE key = ?1 AND member = ?2")?
                    .execute(params![key, member])?;
                drop_if_empty(conn, key, "kv_zset")?;
            }
        }
        Command::LPush { key, value } => {
            prepare_key(conn, key, KIND_LIST, now)?;
            let head: i64 = conn
                .prepare_cached("SELECT COALESCE(MIN(seq), 0) FROM kv_list WHERE key = ?1")?
                .query_row(params![key], |row| row.get(0))?;
            conn.prepare_cached("INSERT INTO kv_list (key, seq, value) VALUES (?1, ?2, ?3)")?
                .execute(params![key, head - 1, value])?;
        }
        Command::SAdd { key, member } => {
            prepare_key(conn, key, KIND_SET, now)?;
            conn.prepare_cached("INSERT OR IGNORE INTO kv_set (key, member) VALUES (?1, ?2)")?
                .execute(params![key, member])?;
        }
        Command::Del { key } => delete_key(conn, key)?,
    }
    Ok(())
}

fn read_hash(conn: &Connection, key: &str, now: i64) -> StoreResult<HashMap<String, String>> {
    if !check_kind(conn, key, KIND_HASH, now)? {
        return Ok(HashMap::new());
    }
    let mut stmt = conn.prepare_cached("SELECT field, value FROM kv_hash WHERE key = ?1")?;
    let rows = stmt.query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut hash = HashMap::new();
    for row in rows {
        let (field, value): (String, String) = row?;
        hash.insert(field, value);
    }
    Ok(hash)
}

fn read_members(
    stmt: &mut rusqlite::Statement<'_>,
    bound: Vec<rusqlite::types::Value>,
) -> StoreResult<Vec<ScoredMember>> {
    let rows = stmt.query_map(params_from_iter(bound), |row| {
        Ok(ScoredMember {
            member: row.get(0)?,
            score: row.get(1)?,
        })
    })?;
    rows.map(|r| r.map_err(StoreError::from)).collect()
}

/// Persistent key-value store on SQLite
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Create or open a store file
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::Unavailable(format!("cannot open {:?}: {}", path, e)))?;

        conn.busy_timeout(busy_timeout)?;

        // Configure for performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on a blocking thread
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Lock(format!("Failed to acquire connection lock: {}", e)))?;
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn execute(&self, batch: Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.with_conn(move |conn| {
            let now = now_millis();
            let tx = conn.transaction()?;
            let mut first_error = None;

            for command in batch.commands() {
                if let Err(e) = apply(&tx, command, now) {
                    tracing::debug!(key = command.key(), error = %e, "Batch command failed");
                    first_error.get_or_insert(e);
                }
            }

            tx.commit()?;

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let key = key.to_string();
        self.with_conn(move |conn| read_hash(conn, &key, now_millis()))
            .await
    }

    async fn hgetall_many(&self, keys: &[String]) -> StoreResult<Vec<HashMap<String, String>>> {
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            let now = now_millis();
            keys.iter().map(|key| read_hash(conn, key, now)).collect()
        })
        .await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        order: Order,
        limit: Option<usize>,
    ) -> StoreResult<Vec<ScoredMember>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            if !check_kind(conn, &key, KIND_ZSET, now_millis())? {
                return Ok(Vec::new());
            }
            let (clause, values) = score_clause(min, max);
            let sql = format!(
                "SELECT member, score FROM kv_zset WHERE key = ?{} {} LIMIT ?",
                clause,
                order_sql(order)
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut bound: Vec<rusqlite::types::Value> = vec![key.into()];
            bound.extend(values.into_iter().map(rusqlite::types::Value::from));
            bound.push(limit_value(limit).into());
            read_members(&mut stmt, bound)
        })
        .await
    }

    async fn zrange_by_rank(
        &self,
        key: &str,
        offset: usize,
        count: Option<usize>,
        order: Order,
    ) -> StoreResult<Vec<ScoredMember>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            if !check_kind(conn, &key, KIND_ZSET, now_millis())? {
                return Ok(Vec::new());
            }
            let sql = format!(
                "SELECT member, score FROM kv_zset WHERE key = ? {} LIMIT ? OFFSET ?",
                order_sql(order)
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let bound: Vec<rusqlite::types::Value> = vec![
                key.into(),
                limit_value(count).into(),
                (offset as i64).into(),
            ];
            read_members(&mut stmt, bound)
        })
        .await
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            if !check_kind(conn, &key, KIND_ZSET, now_millis())? {
                return Ok(0);
            }
            let count: i64 = conn
                .prepare_cached("SELECT COUNT(*) FROM kv_zset WHERE key = ?1")?
                .query_row(params![key], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn lrange(&self, key: &str, start: usize, count: Option<usize>) -> StoreResult<Vec<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            if !check_kind(conn, &key, KIND_LIST, now_millis())? {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare_cached(
                "SELECT value FROM kv_list WHERE key = ?1 ORDER BY seq ASC LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(
                params![key, limit_value(count), start as i64],
                |row| row.get::<_, String>(0),
            )?;
            let values = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(values)
        })
        .await
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            if !check_kind(conn, &key, KIND_SET, now_millis())? {
                return Ok(0);
            }
            let count: i64 = conn
                .prepare_cached("SELECT COUNT(*) FROM kv_set WHERE key = ?1")?
                .query_row(params![key], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| Ok(live_kind(conn, &key, now_millis())?.is_some()))
            .await
    }

    async fn flush_all(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                BEGIN;
                DELETE FROM kv_hash;
                DELETE FROM kv_zset;
                DELETE FROM kv_list;
                DELETE FROM kv_set;
                DELETE FROM kv_keys;
                COMMIT;
                ",
            )?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        self.with_conn(|conn| {
            let now = now_millis();
            let tx = conn.transaction()?;
            let expired: Vec<String> = {
                let mut stmt = tx.prepare_cached(
                    "SELECT key FROM kv_keys WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                )?;
                let rows = stmt.query_map(params![now], |row| row.get::<_, String>(0))?;
                let keys = rows.collect::<Result<Vec<_>, _>>()?;
                keys
            };
            for key in &expired {
                delete_key(&tx, key)?;
            }
            tx.commit()?;
            Ok(expired.len() as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("kv.db"), Duration::from_secs(1)).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_hash_roundtrip() {
        let (store, _dir) = create_test_store();
        let mut batch = Batch::new();
        batch
            .hset("h", [("a", "1"), ("b", "two")])
            .hset_nx("h", "a", "ignored")
            .hincr_by("h", "a", 2)
            .hset_min("h", "t", "2025-01-01 00:00:01.000")
            .hset_min("h", "t", "2025-01-01 00:00:00.500");
        store.execute(batch).await.unwrap();

        let hash = store.hgetall("h").await.unwrap();
        assert_eq!(hash.get("a").map(String::as_str), Some("3"));
        assert_eq!(hash.get("b").map(String::as_str), Some("two"));
        assert_eq!(
            hash.get("t").map(String::as_str),
            Some("2025-01-01 00:00:00.500")
        );

        let many = store
            .hgetall_many(&["h".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(many.len(), 2);
        assert!(many[1].is_empty());
    }

    #[tokio::test]
    async fn test_sorted_set_ranges() {
        let (store, _dir) = create_test_store();
        let mut batch = Batch::new();
        for i in 0..10 {
            batch.zadd("z", format!("m{}", i), i as f64 + 0.5);
        }
        store.execute(batch).await.unwrap();

        let desc = store
            .zrange_by_score(
                "z",
                ScoreBound::Value(2.0),
                ScoreBound::Value(5.0),
                Order::Descending,
                None,
            )
            .await
            .unwrap();
        let members: Vec<&str> = desc.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(members, vec!["m4", "m3", "m2"]);

        let page = store
            .zrange_by_rank("z", 2, Some(3), Order::Ascending)
            .await
            .unwrap();
        let members: Vec<&str> = page.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(members, vec!["m2", "m3", "m4"]);

        let mut batch = Batch::new();
        batch.zrem("z", "m0").zrem("z", "missing");
        store.execute(batch).await.unwrap();
        assert_eq!(store.zcard("z").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_list_and_set() {
        let (store, _dir) = create_test_store();
        let mut batch = Batch::new();
        batch
            .lpush("l", "a")
            .lpush("l", "b")
            .sadd("s", "x")
            .sadd("s", "x")
            .sadd("s", "y");
        store.execute(batch).await.unwrap();

        assert_eq!(store.lrange("l", 0, None).await.unwrap(), vec!["b", "a"]);
        assert_eq!(store.scard("s").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_wrong_type_reported() {
        let (store, _dir) = create_test_store();
        let mut batch = Batch::new();
        batch.sadd("k", "m").zadd("k", "m", 1.0);
        let result = store.execute(batch).await;
        assert!(matches!(result, Err(StoreError::WrongType { .. })));
        assert_eq!(store.scard("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expiry_and_purge() {
        let (store, _dir) = create_test_store();
        let mut batch = Batch::new();
        batch
            .hset("short", [("f", "v")])
            .expire("short", Duration::from_millis(20))
            .hset("long", [("f", "v")]);
        store.execute(batch).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!store.exists("short").await.unwrap());
        assert!(store.exists("long").await.unwrap());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_ttl_saturates() {
        let (store, _dir) = create_test_store();
        let mut batch = Batch::new();
        batch.hset("k", [("f", "v")]).expire("k", Duration::MAX);
        store.execute(batch).await.unwrap();

        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.db");

        {
            let store = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
            let mut batch = Batch::new();
            batch.zadd("z", "m", 1.0).hset("h", [("f", "v")]);
            store.execute(batch).await.unwrap();
        }

        {
            let store = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
            assert_eq!(store.zcard("z").await.unwrap(), 1);
            assert_eq!(store.hgetall("h").await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_flush_all() {
        let (store, _dir) = create_test_store();
        let mut batch = Batch::new();
        batch.zadd("z", "m", 1.0).lpush("l", "v");
        store.execute(batch).await.unwrap();

        store.flush_all().await.unwrap();
        assert!(!store.exists("z").await.unwrap());
        assert!(!store.exists("l").await.unwrap());
    }
}
