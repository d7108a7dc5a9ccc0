//! Grouped search and request detail

use crate::error::LogResult;
use crate::keys;
use crate::model::{LogRecord, RequestGroup, RequestSummary, SearchPage, SearchParams};
use crate::query::{QueryEngine, RecordFilter};
use crate::store::ScoreBound;
use futures_util::future::try_join_all;

impl QueryEngine {
    /// One page of request groups, newest start first
    pub async fn search(&self, params: &SearchParams) -> LogResult<SearchPage> {
        params.validate()?;

        let min = ScoreBound::or(params.start_time.map(|t| keys::score(&t)), ScoreBound::Min);
        let max = ScoreBound::or(params.end_time.map(|t| keys::score(&t)), ScoreBound::Max);

        let mut ids = self.candidate_ids(min, max).await?;
        if let Some(fragment) = &params.request_id {
            ids.retain(|id| id.contains(fragment.as_str()));
        }

        let total = ids.len();
        let page_ids: Vec<String> = ids
            .into_iter()
            .skip(params.offset())
            .take(params.page_size)
            .collect();

        let fetched = try_join_all(page_ids.iter().map(|id| self.records_for(id))).await?;

        let filter = RecordFilter::from_params(params);
        let mut groups: Vec<RequestGroup> = page_ids
            .into_iter()
            .zip(fetched)
            .filter_map(|(id, records)| {
                let matching: Vec<LogRecord> =
                    records.into_iter().filter(|r| filter.matches(r)).collect();
                RequestGroup::from_records(id, matching)
            })
            .collect();

        groups.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        tracing::debug!(
            total,
            page = params.page,
            groups = groups.len(),
            "Search complete"
        );

        Ok(SearchPage {
            total,
            page: params.page,
            page_size: params.page_size,
            groups,
        })
    }

    /// Every live record of one request, or `None` when there are none
    pub async fn detail(&self, request_id: &str) -> LogResult<Option<RequestGroup>> {
        let records = self.records_for(request_id).await?;
        Ok(RequestGroup::from_records(request_id, records))
    }

    /// Stored rolling summary of one request
    pub async fn summary(&self, request_id: &str) -> LogResult<Option<RequestSummary>> {
        let hash = self.store.hgetall(&keys::summary(request_id)).await?;
        Ok(RequestSummary::from_hash(request_id, &hash))
    }
}
