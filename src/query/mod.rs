//! Loglens Query Engine
//!
//! Serves grouped searches, request detail and overview statistics:
//!
//! - **resolver**: candidate request ids and record fetch, with fallbacks
//! - **filter**: per-record filters
//! - **search**: group-then-filter-then-paginate search and detail
//! - **overview**: window statistics and running counters
//!
//! # Search Pipeline
//!
//! ```text
//! Directory (or Timeline scan) → id filter → total → page → fetch → record filters → groups
//! ```
//!
//! `total` counts requests that pass the time and id filters only, so a page
//! may hold fewer groups than `page_size` once record filters drop some.

mod filter;
mod overview;
mod resolver;
mod search;

pub use filter::RecordFilter;

use crate::config::QueryConfig;
use crate::store::TimedStore;

/// Read side of the log engine
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: TimedStore,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(store: TimedStore, config: QueryConfig) -> Self {
        Self { store, config }
    }
}
