//! HTTP client for a semantic-search service.
//!
//! Implements [`SnippetIndex`] over a simple JSON POST contract:
//! request `{ text, repo, max_results }`, response
//! `{ snippets: [{ repo, path, start_line, end_line, score, content }] }`.

use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{ContextSnippet, RetrievalError, SearchFuture, SnippetIndex, SnippetQuery};

/// Wire shape of a search response.
#[derive(Deserialize, Debug)]
struct RawSearchResponse {
    #[serde(default)]
    snippets: Vec<ContextSnippet>,
}

/// Async HTTP client for a snippet-search endpoint.
pub struct HttpSnippetIndex {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSnippetIndex {
    /// Create a client for the given search endpoint.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("diffpress/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
        })
    }

    /// Attach a bearer token sent with every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    async fn search_inner(&self, query: SnippetQuery) -> Result<Vec<ContextSnippet>, RetrievalError> {
        debug!(
            "search request: repo={}, max_results={}, query {} chars",
            query.repo,
            query.max_results,
            query.text.len(),
        );
        let start = Instant::now();

        let mut req = self.client.post(&self.endpoint).json(&query);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RetrievalError::Request(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RetrievalError::Request(format!("failed to read response: {e}")))?;

        debug!(
            "search response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len(),
        );

        if !status.is_success() {
            return Err(RetrievalError::Request(format!("search HTTP {status}: {text}")));
        }

        let parsed: RawSearchResponse = serde_json::from_str(&text)
            .map_err(|e| RetrievalError::Decode(e.to_string()))?;
        Ok(parsed.snippets)
    }
}

impl SnippetIndex for HttpSnippetIndex {
    fn search(&self, query: SnippetQuery) -> SearchFuture<'_> {
        Box::pin(self.search_inner(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_decode_tolerates_missing_snippets() {
        let parsed: RawSearchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.snippets.is_empty());
    }

    #[test]
    fn response_decode_reads_snippets() {
        let parsed: RawSearchResponse = serde_json::from_str(
            r#"{"snippets":[{"repo":"core","path":"src/a.rs","start_line":5,"end_line":9,"score":0.83,"content":"fn a() {}"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.snippets.len(), 1);
        assert_eq!(parsed.snippets[0].path, "src/a.rs");
        assert!((parsed.snippets[0].score - 0.83).abs() < f64::EPSILON);
    }

    #[test]
    fn query_serializes_wire_fields() {
        let query = SnippetQuery {
            text: "allocator".into(),
            repo: "core".into(),
            max_results: 5,
        };
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["text"], "allocator");
        assert_eq!(json["repo"], "core");
        assert_eq!(json["max_results"], 5);
    }
}
