//! Engine configuration with sensible defaults.
//!
//! [`EngineConfig`] is an explicit immutable value threaded through each
//! component's entry point — nothing in this crate reads ambient global
//! state. Scoring weights and the token-estimation ratio are deliberately
//! tunable rather than hardcoded.

use std::time::Duration;

use crate::tokens::DEFAULT_CHARS_PER_TOKEN;

/// Tunable weights for file importance scoring.
///
/// Base score is `density * density_weight + keyword_bonus(if any)`, then
/// multiplied by the role multiplier for test/generated/lock files. All
/// values can be overridden; the defaults keep scores roughly in `[0, 2]`
/// so the forced score for hard-included paths dominates cleanly.
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    /// Weight of change density (changed lines / total hunk lines).
    pub density_weight: f64,
    /// Bonus when the file name appears in the PR title/description/ticket.
    pub keyword_bonus: f64,
    /// Multiplier for test files.
    pub role_test: f64,
    /// Multiplier for generated files.
    pub role_generated: f64,
    /// Multiplier for lock files.
    pub role_lockfile: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            density_weight: 1.0,
            keyword_bonus: 0.5,
            role_test: 0.4,
            role_generated: 0.2,
            role_lockfile: 0.1,
        }
    }
}

/// Configuration for one prompt-assembly engine instance.
///
/// # Example
///
/// ```
/// use diffpress::config::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_reserved_overhead(1024)
///     .with_context_lines(2)
///     .with_publish_threshold(6.0);
/// assert_eq!(config.context_lines, 2);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tokens reserved for prompt templates and metadata before any diff
    /// content is allocated. Default: `512`.
    pub reserved_overhead: usize,
    /// Unchanged context lines kept around each change at the
    /// context-trimmed compression level. Default: `3`.
    pub context_lines: usize,
    /// Minimum numeric score for a suggestion to be published. Suggestions
    /// with a missing or non-numeric score count as below threshold.
    /// Default: `7.0` (model scores are on a 0-10 scale).
    pub publish_threshold: f64,
    /// Maximum number of retrieval queries per assembly (one per candidate
    /// repository). Default: `3`.
    pub max_retrieval_queries: usize,
    /// Timeout for each retrieval call. Default: `5s`.
    pub retrieval_timeout: Duration,
    /// Characters per token for the default estimator. Default: `3.5`.
    pub chars_per_token: f64,
    /// Scoring weights.
    pub weights: ScoreWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reserved_overhead: 512,
            context_lines: 3,
            publish_threshold: 7.0,
            max_retrieval_queries: 3,
            retrieval_timeout: Duration::from_secs(5),
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            weights: ScoreWeights::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the reserved template/metadata overhead.
    pub fn with_reserved_overhead(mut self, tokens: usize) -> Self {
        self.reserved_overhead = tokens;
        self
    }

    /// Override the trimmed-context window size.
    pub fn with_context_lines(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    /// Override the suggestion publication threshold.
    pub fn with_publish_threshold(mut self, threshold: f64) -> Self {
        self.publish_threshold = threshold;
        self
    }

    /// Override the per-call retrieval timeout.
    pub fn with_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval_timeout = timeout;
        self
    }

    /// Override the retrieval query cap.
    pub fn with_max_retrieval_queries(mut self, n: usize) -> Self {
        self.max_retrieval_queries = n;
        self
    }

    /// Override the chars-per-token ratio for the default estimator.
    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        self.chars_per_token = cpt;
        self
    }

    /// Override the scoring weights.
    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_review_tuned() {
        let config = EngineConfig::default();
        assert_eq!(config.reserved_overhead, 512);
        assert_eq!(config.context_lines, 3);
        assert!((config.publish_threshold - 7.0).abs() < f64::EPSILON);
        assert_eq!(config.max_retrieval_queries, 3);
    }

    #[test]
    fn builders_override_fields() {
        let config = EngineConfig::new()
            .with_reserved_overhead(0)
            .with_context_lines(1)
            .with_max_retrieval_queries(1)
            .with_retrieval_timeout(Duration::from_millis(250));
        assert_eq!(config.reserved_overhead, 0);
        assert_eq!(config.context_lines, 1);
        assert_eq!(config.retrieval_timeout, Duration::from_millis(250));
    }
}
