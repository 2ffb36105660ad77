use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ImportRun, RunStatus};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Query for the run listing. Deserializes straight from the query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunFilter {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub source_url: Option<String>,
    pub status: Option<RunStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub run_id: Option<Uuid>,
    pub q: Option<String>,
}

/// A filter with page and limit resolved and clamped.
#[derive(Debug, Clone)]
pub struct ResolvedRunFilter {
    pub page: i64,
    pub limit: i64,
    pub source_url: Option<String>,
    pub status: Option<RunStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub run_id: Option<Uuid>,
    pub q: Option<String>,
}

impl RunFilter {
    /// The newest `limit` runs, optionally for one source or one run.
    pub fn recent(limit: i64, source_url: Option<String>, run_id: Option<Uuid>) -> Self {
        Self {
            limit: Some(limit),
            source_url,
            run_id,
            ..Default::default()
        }
    }

    pub fn normalized(self) -> ResolvedRunFilter {
        let blank_to_none = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        ResolvedRunFilter {
            page: self.page.unwrap_or(1).max(1),
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            source_url: blank_to_none(self.source_url),
            status: self.status,
            from: self.from,
            to: self.to,
            run_id: self.run_id,
            q: blank_to_none(self.q),
        }
    }
}

impl ResolvedRunFilter {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    /// In-process equivalent of the SQL WHERE clause.
    pub fn matches(&self, run: &ImportRun) -> bool {
        if self.source_url.as_deref().is_some_and(|url| url != run.source_url) {
            return false;
        }
        if self.status.is_some_and(|status| status != run.status) {
            return false;
        }
        if self.from.is_some_and(|from| run.started_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| run.started_at > to) {
            return false;
        }
        if self.run_id.is_some_and(|id| id != run.id) {
            return false;
        }
        match &self.q {
            Some(q) => {
                let needle = q.to_lowercase();
                [
                    run.source_url.to_lowercase(),
                    run.source_name.to_lowercase(),
                    run.id.to_string(),
                    run.status.as_str().to_string(),
                ]
                .iter()
                .any(|field| field.contains(&needle))
            }
            None => true,
        }
    }
}

/// One page of runs plus the total matching the filter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPage {
    pub items: Vec<ImportRun>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl RunPage {
    pub fn new(items: Vec<ImportRun>, total: i64, filter: &ResolvedRunFilter) -> Self {
        Self {
            items,
            total,
            page: filter.page,
            limit: filter.limit,
            total_pages: (total + filter.limit - 1) / filter.limit,
        }
    }
}
