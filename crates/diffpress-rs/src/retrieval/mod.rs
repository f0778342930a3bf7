//! Semantic context retrieval: augment the prompt with external snippets.
//!
//! The semantic search itself happens in an external service over a
//! pre-built code index; this module owns only the *integration* policy:
//! issue a bounded number of queries (one per candidate repository, in
//! parallel, each with an explicit timeout), rank the returned snippets by
//! relevance, and greedily insert them in descending score order until the
//! remaining budget is exhausted. Committed diff content is never
//! displaced. Any failure degrades gracefully: the review proceeds
//! unaugmented with the omission flagged for the caller.

pub mod http;
pub mod retry;

pub use http::HttpSnippetIndex;
pub use retry::RetryPolicy;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::fit::SECTION_SEPARATOR;
use crate::tokens::{TokenEstimator, estimate_or_max};

/// Errors from the retrieval boundary. Never fatal for an assembly pass.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("search timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed search response: {0}")]
    Decode(String),
}

/// Request sent to the semantic-search service.
#[derive(Debug, Clone, Serialize)]
pub struct SnippetQuery {
    pub text: String,
    /// Repository scope for this query.
    pub repo: String,
    pub max_results: usize,
}

/// Externally retrieved code fragment. Read-only once retrieved.
#[derive(Debug, Clone, Deserialize)]
pub struct ContextSnippet {
    pub repo: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Relevance score from the index, higher is better.
    pub score: f64,
    pub content: String,
}

impl ContextSnippet {
    /// Render as a prompt block.
    pub fn render(&self) -> String {
        format!(
            "## context: '{}:{}' (lines {}-{}, relevance {:.2})\n{}",
            self.repo, self.path, self.start_line, self.end_line, self.score, self.content,
        )
    }
}

/// Boxed future returned by [`SnippetIndex::search`].
pub type SearchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<ContextSnippet>, RetrievalError>> + Send + 'a>>;

/// External semantic-search collaborator.
pub trait SnippetIndex: Send + Sync {
    fn search(&self, query: SnippetQuery) -> SearchFuture<'_>;
}

/// Result of one retrieval round.
#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    /// Snippets that fit the remaining budget, descending relevance.
    pub snippets: Vec<ContextSnippet>,
    /// Estimated tokens consumed by the accepted snippets.
    pub used_tokens: usize,
    /// Set when any query failed or timed out; coverage is partial.
    pub omitted: bool,
}

/// Integration policy around a [`SnippetIndex`].
pub struct ContextRetriever {
    index: Arc<dyn SnippetIndex>,
    /// Candidate repositories to query, one query each.
    repos: Vec<String>,
    policy: RetryPolicy,
    timeout: Duration,
    /// Cap on queries per assembly; excess repositories are ignored.
    max_queries: usize,
    /// Result count requested per query.
    results_per_query: usize,
}

impl ContextRetriever {
    pub fn new(index: Arc<dyn SnippetIndex>, repos: Vec<String>) -> Self {
        Self {
            index,
            repos,
            policy: RetryPolicy::default(),
            timeout: Duration::from_secs(5),
            max_queries: 3,
            results_per_query: 5,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply engine-level retrieval settings (timeout and query cap).
    pub fn with_engine_config(mut self, config: &crate::config::EngineConfig) -> Self {
        self.timeout = config.retrieval_timeout;
        self.max_queries = config.max_retrieval_queries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_queries(mut self, n: usize) -> Self {
        self.max_queries = n;
        self
    }

    pub fn with_results_per_query(mut self, n: usize) -> Self {
        self.results_per_query = n;
        self
    }

    /// Query each candidate repository in parallel and greedily keep the
    /// best snippets that fit `remaining_budget`.
    pub async fn retrieve(
        &self,
        query_text: &str,
        remaining_budget: usize,
        estimator: &dyn TokenEstimator,
    ) -> RetrievalOutcome {
        if remaining_budget == 0 || self.repos.is_empty() || query_text.is_empty() {
            return RetrievalOutcome::default();
        }

        let queries = self.repos.iter().take(self.max_queries).map(|repo| {
            self.search_with_retry(SnippetQuery {
                text: query_text.to_string(),
                repo: repo.clone(),
                max_results: self.results_per_query,
            })
        });
        let results = futures::future::join_all(queries).await;

        let mut omitted = false;
        let mut candidates: Vec<ContextSnippet> = Vec::new();
        for (repo, result) in self.repos.iter().zip(results) {
            match result {
                Ok(snippets) => candidates.extend(snippets),
                Err(e) => {
                    warn!("retrieval for repo '{repo}' failed, proceeding without it: {e}");
                    omitted = true;
                }
            }
        }

        // Stable sort by descending relevance: ties keep query order.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut outcome = RetrievalOutcome {
            omitted,
            ..Default::default()
        };
        let mut remaining = remaining_budget;
        for snippet in candidates {
            // Snippets are appended after existing content, so each one
            // costs its leading separator as well as its rendering.
            let separated = format!("{SECTION_SEPARATOR}{}", snippet.render());
            let cost = estimate_or_max(estimator, &separated, usize::MAX);
            if cost <= remaining {
                remaining -= cost;
                outcome.used_tokens += cost;
                outcome.snippets.push(snippet);
            }
        }

        debug!(
            "retrieval: {} snippet(s) kept, {} tokens used, omitted={}",
            outcome.snippets.len(),
            outcome.used_tokens,
            outcome.omitted,
        );
        outcome
    }

    async fn search_with_retry(
        &self,
        query: SnippetQuery,
    ) -> Result<Vec<ContextSnippet>, RetrievalError> {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.timeout, self.index.search(query.clone()))
                .await
            {
                Ok(r) => r,
                Err(_) => Err(RetrievalError::Timeout(self.timeout)),
            };
            match result {
                Ok(snippets) => return Ok(snippets),
                Err(e) if self.policy.should_retry(&e, attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!("retrieval attempt {attempt} failed ({e}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
