//! Token-bounded diff compression and context assembly for LLM code review.
//!
//! `diffpress-rs` turns a raw unified diff plus pull-request metadata into a
//! review prompt that is guaranteed to fit a model's context window. The core
//! abstraction is the [`PromptAssembler`](assemble::PromptAssembler) — a
//! reusable pipeline that parses the diff, scores each file by importance,
//! allocates the token budget proportionally, and degrades low-value files
//! through a fixed compression ladder until everything fits.
//!
//! Lossless output is always preferred: if the whole diff fits, every file is
//! emitted verbatim and no lossy step runs. When compression is unavoidable,
//! the [`CoverageReport`](fit::CoverageReport) tells the caller exactly which
//! files were trimmed, pruned, reduced to a header, or dropped entirely.
//!
//! # Getting started
//!
//! ```ignore
//! use diffpress::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), diffpress::AssembleError> {
//!     let assembler = PromptAssembler::new(EngineConfig::default());
//!
//!     let meta = PrMetadata::new(
//!         "Fix allocator race",
//!         "Serializes quota updates behind the budget lock.",
//!     );
//!
//!     let raw_diff = std::fs::read_to_string("change.diff").unwrap();
//!     let prompt = assembler.assemble(&raw_diff, &meta, 8_000).await?;
//!
//!     println!("{}", prompt.body);
//!     println!("{}", prompt.coverage.to_log_string());
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Parse a diff on its own:** see [`patch::parse`], which accepts both
//!   `diff --git` output and plain `---`/`+++` patches and rejects malformed
//!   input all-or-nothing with a [`MalformedDiffError`](patch::MalformedDiffError).
//!
//! - **Control file importance:** see [`PrMetadata`](score::PrMetadata) for
//!   include/exclude path rules and [`ScoreWeights`](config::ScoreWeights) for
//!   the density, keyword, and role multipliers used by
//!   [`score_patch_set`](score::score_patch_set).
//!
//! - **Plug in a real tokenizer:** implement
//!   [`TokenEstimator`](tokens::TokenEstimator) and pass it via
//!   [`PromptAssembler::with_estimator`](assemble::PromptAssembler::with_estimator).
//!   The default [`CharEstimator`](tokens::CharEstimator) divides character
//!   count by a configurable ratio.
//!
//! - **Pull in related code from other repositories:** implement
//!   [`SnippetIndex`](retrieval::SnippetIndex) (or use
//!   [`HttpSnippetIndex`](retrieval::HttpSnippetIndex)) and attach a
//!   [`ContextRetriever`](retrieval::ContextRetriever). Retrieval only spends
//!   budget left over after the diff and degrades gracefully on timeout.
//!
//! - **Deduplicate suggestions across review rounds:** see
//!   [`SuggestionTracker`](suggest::SuggestionTracker) and
//!   [`reconcile`](suggest::reconcile), which identify suggestions by a
//!   content hash that survives line-number drift.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`patch`] | Unified-diff parsing, hunk rendering, [`PatchSet`](patch::PatchSet) |
//! | [`score`] | File importance scoring from metadata and change density |
//! | [`allocate`] | Proportional budget allocation with per-file floors |
//! | [`fit`] | Compression ladder, [`CoverageReport`](fit::CoverageReport) |
//! | [`tokens`] | [`TokenEstimator`](tokens::TokenEstimator) trait, [`TokenBudget`](tokens::TokenBudget) |
//! | [`retrieval`] | Parallel cross-repo snippet retrieval with retry and timeout |
//! | [`suggest`] | Suggestion identity, ledger, per-thread reconciliation |
//! | [`assemble`] | [`PromptAssembler`](assemble::PromptAssembler) end-to-end pipeline |
//! | [`config`] | [`EngineConfig`](config::EngineConfig) tunables |
//!
//! # Design principles
//!
//! 1. **The budget is never exceeded.** Every emitted prompt fits the
//!    effective budget by the configured estimator. When an estimate fails,
//!    the unit is treated as over budget rather than free.
//!
//! 2. **Lossless first.** No lossy step runs while a verbatim rendering
//!    still fits.
//!
//! 3. **Degrade in order.** Files step down the compression ladder one level
//!    at a time. A file is never skipped past a level that would have fit.
//!
//! 4. **Report what happened.** Every assembly returns a coverage report so
//!    the caller (and the logs) can see exactly what the model did not get.

pub mod allocate;
pub mod assemble;
pub mod config;
pub mod fit;
pub mod patch;
pub mod prelude;
pub mod retrieval;
pub mod score;
pub mod suggest;
pub mod tokens;

pub use assemble::{AssembleError, AssembledPrompt, PromptAssembler};
pub use config::EngineConfig;
pub use fit::{CompressionLevel, CoverageReport};
pub use score::PrMetadata;
