//! Review suggestions: typed records, stable identities, validation.
//!
//! Model output is dynamic JSON — a score may be missing, a string, or an
//! int; a body may be absent. [`RawSuggestion`] captures that shape
//! tolerantly and [`validate`] converts it into a typed [`Suggestion`]
//! with an explicit optional numeric score, so a malformed field becomes a
//! "below threshold" outcome instead of a runtime error.
//!
//! Identity is derived from the file path plus the *content* the
//! suggestion anchors to, never from absolute line numbers, so small
//! unrelated edits elsewhere in the file leave the identity untouched.

pub mod ledger;

pub use ledger::{
    FileLedgerStore, LedgerEntry, LedgerError, LedgerStore, MemoryLedgerStore, ReconcileOutcome,
    SuggestionLedger, SuggestionTracker, reconcile,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;

/// Lifecycle state of a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionState {
    /// Validated but not yet published.
    Proposed,
    /// Published to the review thread.
    Shown,
    /// Replaced by a newer suggestion at the same location.
    Superseded,
    /// The anchored code no longer appears in the current diff.
    Stale,
}

/// Stable, collision-resistant suggestion identity (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuggestionId(String);

impl SuggestionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild an id from its stored hex form.
    pub(crate) fn from_hex(hex: String) -> Self {
        Self(hex)
    }
}

impl fmt::Display for SuggestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize anchor text: per-line trim, blank lines dropped, internal
/// whitespace runs collapsed. Whitespace-only edits don't change identity.
pub fn normalize_anchor(text: &str) -> String {
    normalize_anchor_lines(text.lines())
}

/// Same normalization over an iterator of lines.
pub fn normalize_anchor_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    lines
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Derive the identity for a suggestion. Deterministic: the same logical
/// suggestion always re-derives the same id across runs.
pub fn suggestion_id(path: &str, anchor: &str, body: &str) -> SuggestionId {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_anchor(anchor).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_anchor(body).as_bytes());
    SuggestionId(format!("{:x}", hasher.finalize()))
}

/// A validated review suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: SuggestionId,
    pub path: String,
    /// Line range in the new file, kept for presentation only — identity
    /// never depends on it.
    pub start_line: u32,
    pub end_line: u32,
    /// Normalized content the suggestion anchors to.
    pub anchor: String,
    /// Numeric score if the model provided a usable one.
    pub score: Option<f64>,
    pub body: String,
    pub state: SuggestionState,
}

/// Suggestion as emitted by the model: every field optional, score of any
/// JSON type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSuggestion {
    pub file: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    /// The code the suggestion refers to.
    pub existing_code: Option<String>,
    /// The suggestion text itself.
    pub suggestion: Option<String>,
    pub score: Option<serde_json::Value>,
}

/// Coerce a dynamic score value to a number. Strings that parse as numbers
/// are accepted; anything else is `None` (treated as below threshold).
pub fn coerce_score(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Validate a raw suggestion into a typed one. Returns `None` (with a log,
/// never a panic) when the file, anchor, or body is missing or empty.
pub fn validate(raw: RawSuggestion) -> Option<Suggestion> {
    let path = match raw.file {
        Some(ref p) if !p.trim().is_empty() => p.trim().to_string(),
        _ => {
            warn!("dropping suggestion without a file path");
            return None;
        }
    };
    let anchor_src = match raw.existing_code {
        Some(ref a) if !a.trim().is_empty() => a.clone(),
        _ => {
            warn!("dropping suggestion for '{path}' without anchor code");
            return None;
        }
    };
    let body = match raw.suggestion {
        Some(ref b) if !b.trim().is_empty() => b.trim().to_string(),
        _ => {
            warn!("dropping suggestion for '{path}' without a body");
            return None;
        }
    };

    let score = coerce_score(raw.score.as_ref());
    let anchor = normalize_anchor(&anchor_src);
    let id = suggestion_id(&path, &anchor_src, &body);
    let start_line = raw.start_line.unwrap_or(0);

    Some(Suggestion {
        id,
        path,
        start_line,
        end_line: raw.end_line.unwrap_or(start_line),
        anchor,
        score,
        body,
        state: SuggestionState::Proposed,
    })
}
