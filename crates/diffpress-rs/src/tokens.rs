//! Token estimation and budget tracking.
//!
//! Every downstream decision — allocation, compression level, snippet
//! insertion — is made against *estimated* token counts. The real model
//! tokenizer lives outside this crate and is injected as a
//! [`TokenEstimator`]; the default [`CharEstimator`] uses a monotonic
//! chars-per-token ratio, which is cheap and good enough for budgeting.
//!
//! Estimation is allowed to fail (a remote tokenizer can time out). Callers
//! use [`estimate_or_max`] so a failing estimator degrades into a fail-safe
//! *over*estimate rather than a crash: the unit is treated as maximal
//! length and budgeting stays conservative.

use thiserror::Error;
use tracing::warn;

/// Default characters per token (conservative estimate for source code).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Error produced by a [`TokenEstimator`].
#[derive(Debug, Error)]
#[error("token estimation failed: {0}")]
pub struct EstimateError(pub String);

/// Pluggable token-count estimator.
///
/// Implementations must be monotonic in input length: a longer text never
/// estimates fewer tokens. The fitter relies on this to guarantee that
/// trimming content never increases an estimate.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> Result<usize, EstimateError>;
}

/// Default estimator: character count divided by a chars-per-token ratio,
/// rounded up.
#[derive(Debug, Clone)]
pub struct CharEstimator {
    chars_per_token: f64,
}

impl CharEstimator {
    /// Create an estimator with a custom chars-per-token ratio.
    /// Ratios at or below zero fall back to [`DEFAULT_CHARS_PER_TOKEN`].
    pub fn new(chars_per_token: f64) -> Self {
        let cpt = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self {
            chars_per_token: cpt,
        }
    }
}

impl Default for CharEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> Result<usize, EstimateError> {
        Ok((text.len() as f64 / self.chars_per_token).ceil() as usize)
    }
}

/// Adapter that turns a plain closure into a [`TokenEstimator`].
///
/// The orchestration layer typically owns the real tokenizer and hands this
/// crate a callable:
///
/// ```
/// use diffpress::tokens::{FnEstimator, TokenEstimator};
///
/// let est = FnEstimator::new(|text: &str| Ok(text.split_whitespace().count()));
/// assert_eq!(est.estimate("three short words").unwrap(), 3);
/// ```
pub struct FnEstimator<F>(F);

impl<F> FnEstimator<F>
where
    F: Fn(&str) -> Result<usize, EstimateError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> TokenEstimator for FnEstimator<F>
where
    F: Fn(&str) -> Result<usize, EstimateError> + Send + Sync,
{
    fn estimate(&self, text: &str) -> Result<usize, EstimateError> {
        (self.0)(text)
    }
}

/// Estimate `text`, falling back to `fail_safe` tokens when the estimator
/// errors. The failure is logged, never propagated.
pub fn estimate_or_max(
    estimator: &dyn TokenEstimator,
    text: &str,
    fail_safe: usize,
) -> usize {
    match estimator.estimate(text) {
        Ok(n) => n,
        Err(e) => {
            warn!("estimator failed, treating unit as maximal length: {e}");
            fail_safe
        }
    }
}

/// Token budget for one assembly pass.
///
/// A budget reserves a fixed overhead for prompt templates and metadata up
/// front; everything else is the *effective* budget that diff content and
/// retrieved snippets compete for. Mutated only by the allocator and the
/// assembler during a single pass.
#[derive(Debug, Clone)]
pub struct TokenBudget {
    max_tokens: usize,
    reserved: usize,
    committed: usize,
}

impl TokenBudget {
    /// Create a budget with `max_tokens` total and `reserved` tokens held
    /// back for templates/metadata.
    pub fn new(max_tokens: usize, reserved: usize) -> Self {
        Self {
            max_tokens,
            reserved,
            committed: 0,
        }
    }

    /// Total budget including the reserve.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Tokens held back for overhead.
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Budget available to content: max minus reserve.
    pub fn effective(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved)
    }

    /// Effective budget not yet committed.
    pub fn remaining(&self) -> usize {
        self.effective().saturating_sub(self.committed)
    }

    /// Tokens committed so far.
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Commit `tokens` if they fit in the remaining budget. Returns whether
    /// the commit succeeded; on failure the budget is unchanged.
    pub fn try_commit(&mut self, tokens: usize) -> bool {
        if tokens <= self.remaining() {
            self.committed += tokens;
            true
        } else {
            false
        }
    }
}
