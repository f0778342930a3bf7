//! Convenience re-exports for common `diffpress-rs` types.
//!
//! Meant to be glob-imported when assembling prompts:
//!
//! ```ignore
//! use diffpress::prelude::*;
//! ```
//!
//! This pulls in the types needed for the vast majority of callers: the
//! [`PromptAssembler`] + config, metadata and scoring inputs, the coverage
//! report, the estimator trait, and the retrieval and suggestion entry
//! points. Specialized types (parser internals, retry policy, ledger
//! entries) are intentionally excluded — import those from their modules
//! directly when needed.

// ── Assembly ────────────────────────────────────────────────────────
pub use crate::assemble::{AssembleError, AssembledPrompt, PromptAssembler};
pub use crate::config::{EngineConfig, ScoreWeights};

// ── Diff and scoring ────────────────────────────────────────────────
pub use crate::patch::{FilePatch, MalformedDiffError, PatchSet, parse};
pub use crate::score::{PrMetadata, score_patch_set};

// ── Budgeting ───────────────────────────────────────────────────────
pub use crate::fit::{CompressionLevel, CoverageReport, FitOutcome};
pub use crate::tokens::{CharEstimator, TokenBudget, TokenEstimator};

// ── Retrieval ───────────────────────────────────────────────────────
pub use crate::retrieval::{
    ContextRetriever, ContextSnippet, HttpSnippetIndex, SnippetIndex, SnippetQuery,
};

// ── Suggestions ─────────────────────────────────────────────────────
pub use crate::suggest::{
    FileLedgerStore, LedgerStore, MemoryLedgerStore, RawSuggestion, Suggestion, SuggestionId,
    SuggestionLedger, SuggestionState, SuggestionTracker, reconcile, suggestion_id,
};
