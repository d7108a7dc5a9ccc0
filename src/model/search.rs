//! Search parameters and result pages

use crate::error::{LogError, LogResult};
use crate::model::record::option_timestamp_format;
use crate::model::{LogLevel, RequestGroup};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Filters and paging for a grouped search
///
/// `request_id`, `start_time` and `end_time` select requests; the remaining
/// filters apply to the records inside each selected request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Substring of the request id
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub level: Option<LogLevel>,
    /// Substring of the source ip
    #[serde(default)]
    pub ip: Option<String>,
    /// Substring of the module
    #[serde(default)]
    pub module: Option<String>,
    /// Inclusive lower bound
    #[serde(default, with = "option_timestamp_format")]
    pub start_time: Option<NaiveDateTime>,
    /// Inclusive upper bound
    #[serde(default, with = "option_timestamp_format")]
    pub end_time: Option<NaiveDateTime>,
    /// Case-insensitive substring of the message
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            request_id: None,
            level: None,
            ip: None,
            module: None,
            start_time: None,
            end_time: None,
            keyword: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl SearchParams {
    /// Unfiltered search for one page
    pub fn page(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    /// Check paging bounds
    pub fn validate(&self) -> LogResult<()> {
        if self.page < 1 {
            return Err(LogError::validation("page must be at least 1"));
        }
        if self.page_size < 1 || self.page_size > MAX_PAGE_SIZE {
            return Err(LogError::validation(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }

    /// Number of request ids skipped before this page
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

/// One page of request groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    /// Requests matching the time and id filters, before record filters
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    /// Newest request first
    pub groups: Vec<RequestGroup>,
}

impl SearchPage {
    pub fn empty(params: &SearchParams) -> Self {
        Self {
            total: 0,
            page: params.page,
            page_size: params.page_size,
            groups: Vec::new(),
        }
    }
}
