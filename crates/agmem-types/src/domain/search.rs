use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::branch::MAIN_BRANCH;

/// Retrieval mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Keyword,
    Vector,
    Hybrid,
}

/// Which entity family a search runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    Facts,
    Observations,
    Messages,
}

/// Half-open time window applied before ranking
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

/// Search input. An empty query is valid and falls back to recency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub branch: String,
    pub mode: SearchMode,
    pub scope: SearchScope,
    pub category: Option<String>,
    pub time_range: Option<TimeRange>,
    pub limit: usize,
}

impl SearchRequest {
    pub const DEFAULT_LIMIT: usize = 10;
    pub const MAX_LIMIT: usize = 100;

    pub fn hybrid(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            branch: MAIN_BRANCH.to_string(),
            mode: SearchMode::Hybrid,
            scope: SearchScope::Facts,
            category: None,
            time_range: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One ranked result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub category: Option<String>,
    /// Final fused score; recency listings report 0.
    pub score: f64,
    pub bm25: Option<f64>,
    pub cosine: Option<f64>,
    pub created_at: DateTime<Utc>,
}
