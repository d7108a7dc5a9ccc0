//! Write batches
//!
//! A [`Batch`] is an ordered list of write commands submitted to a store in
//! one round trip. Batching is for throughput: a backend may apply a batch
//! inside a single transaction, but callers must not assume all-or-nothing
//! semantics.

use std::time::Duration;

/// Inclusive score bound for sorted-set range commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    /// Negative infinity
    Min,
    /// Positive infinity
    Max,
    /// Inclusive numeric bound
    Value(f64),
}

impl ScoreBound {
    /// Bound from an optional value, falling back to `fallback` when absent
    pub fn or(value: Option<f64>, fallback: ScoreBound) -> Self {
        value.map(ScoreBound::Value).unwrap_or(fallback)
    }

    /// Whether `score` lies at or above this bound when used as a minimum
    pub fn admits_from_below(&self, score: f64) -> bool {
        match self {
            ScoreBound::Min => true,
            ScoreBound::Max => false,
            ScoreBound::Value(v) => score >= *v,
        }
    }

    /// Whether `score` lies at or below this bound when used as a maximum
    pub fn admits_from_above(&self, score: f64) -> bool {
        match self {
            ScoreBound::Min => false,
            ScoreBound::Max => true,
            ScoreBound::Value(v) => score <= *v,
        }
    }
}

/// Iteration order for sorted-set reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// A single write command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Set one or more hash fields
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Set a hash field only if it does not exist yet
    HSetNx {
        key: String,
        field: String,
        value: String,
    },
    /// Set a hash field to the lexicographic minimum of its current and the given value
    HSetMin {
        key: String,
        field: String,
        value: String,
    },
    /// Increment an integer hash field (missing fields count as 0)
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// Set a time-to-live on an existing key
    Expire { key: String, ttl: Duration },
    /// Add or update a sorted-set member
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    /// Remove a sorted-set member
    ZRem { key: String, member: String },
    /// Push a value to the head of a list
    LPush { key: String, value: String },
    /// Add a set member
    SAdd { key: String, member: String },
    /// Delete a key of any type
    Del { key: String },
}

impl Command {
    /// Key this command touches
    pub fn key(&self) -> &str {
        match self {
            Command::HSet { key, .. }
            | Command::HSetNx { key, .. }
            | Command::HSetMin { key, .. }
            | Command::HIncrBy { key, .. }
            | Command::Expire { key, .. }
            | Command::ZAdd { key, .. }
            | Command::ZRem { key, .. }
            | Command::LPush { key, .. }
            | Command::SAdd { key, .. }
            | Command::Del { key } => key,
        }
    }
}

/// Ordered collection of write commands
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    pub fn hset<K, F, V>(&mut self, key: K, fields: impl IntoIterator<Item = (F, V)>) -> &mut Self
    where
        K: Into<String>,
        F: Into<String>,
        V: Into<String>,
    {
        self.commands.push(Command::HSet {
            key: key.into(),
            fields: fields
                .into_iter()
                .map(|(f, v)| (f.into(), v.into()))
                .collect(),
        });
        self
    }

    pub fn hset_nx(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.commands.push(Command::HSetNx {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn hset_min(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.commands.push(Command::HSetMin {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn hincr_by(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        delta: i64,
    ) -> &mut Self {
        self.commands.push(Command::HIncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.commands.push(Command::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn zadd(&mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> &mut Self {
        self.commands.push(Command::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    pub fn zrem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.commands.push(Command::ZRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn lpush(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.commands.push(Command::LPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.commands.push(Command::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Del { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}
