//! Prompt assembly: the single entry point for one review invocation.
//!
//! Wires the full pipeline: parse → score → allocate → fit → retrieve.
//! The output is the prompt body plus a coverage report telling the caller
//! exactly which files survived at which fidelity and whether context
//! retrieval was omitted. The external model invocation and comment
//! publishing happen outside this crate.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::allocate::{BudgetExhaustedError, allocate};
use crate::config::EngineConfig;
use crate::fit::{CoverageReport, SECTION_SEPARATOR, fit};
use crate::patch::{MalformedDiffError, parse};
use crate::retrieval::ContextRetriever;
use crate::score::{PrMetadata, score_patch_set};
use crate::suggest::{LedgerStore, SuggestionTracker};
use crate::tokens::{CharEstimator, TokenBudget, TokenEstimator};

/// Errors that abort an assembly pass.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error(transparent)]
    MalformedDiff(#[from] MalformedDiffError),

    #[error(transparent)]
    BudgetExhausted(#[from] BudgetExhaustedError),
}

/// Finished prompt for one review invocation.
#[derive(Debug)]
pub struct AssembledPrompt {
    /// Prompt body: compressed diff content, then any retrieved snippets.
    pub body: String,
    pub coverage: CoverageReport,
    /// Estimated tokens used by `body`, always within the effective budget.
    pub used_tokens: usize,
    /// Normalized anchors of every hunk in the diff, for suggestion
    /// reconciliation against this invocation.
    pub anchors: HashSet<String>,
}

/// Assembles token-bounded review prompts from raw diffs.
///
/// # Example
///
/// ```no_run
/// use diffpress::prelude::*;
///
/// # async fn run(raw_diff: &str) -> Result<(), diffpress::AssembleError> {
/// let assembler = PromptAssembler::new(EngineConfig::default());
/// let meta = PrMetadata::new("Fix allocator race", "See ticket CORE-812");
/// let prompt = assembler.assemble(raw_diff, &meta, 8_000).await?;
/// println!("{}", prompt.coverage.to_log_string());
/// # Ok(())
/// # }
/// ```
pub struct PromptAssembler {
    config: EngineConfig,
    estimator: Arc<dyn TokenEstimator>,
    retriever: Option<ContextRetriever>,
}

impl PromptAssembler {
    /// Create an assembler with the default character-based estimator.
    pub fn new(config: EngineConfig) -> Self {
        let estimator = Arc::new(CharEstimator::new(config.chars_per_token));
        Self {
            config,
            estimator,
            retriever: None,
        }
    }

    /// Inject the real model tokenizer (or any estimator).
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Enable semantic context retrieval.
    pub fn with_retriever(mut self, retriever: ContextRetriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Build a prompt for `raw_diff` within `max_tokens`.
    pub async fn assemble(
        &self,
        raw_diff: &str,
        meta: &PrMetadata,
        max_tokens: usize,
    ) -> Result<AssembledPrompt, AssembleError> {
        let mut set = parse(raw_diff)?;
        score_patch_set(&mut set, meta, &self.config.weights);
        let anchors = set.anchors();

        let mut budget = TokenBudget::new(max_tokens, self.config.reserved_overhead);
        let alloc = allocate(&set, &budget, self.estimator.as_ref())?;
        let outcome = fit(&set, &alloc, self.estimator.as_ref(), &self.config);

        let mut body = outcome.body;
        let mut coverage = outcome.coverage;
        // Commit the diff content; snippets only get what is left over and
        // never displace it.
        budget.try_commit(outcome.used_tokens);
        let mut used_tokens = outcome.used_tokens;

        if let Some(ref retriever) = self.retriever {
            let query = retrieval_query(meta, &set);
            let retrieved = retriever
                .retrieve(&query, budget.remaining(), self.estimator.as_ref())
                .await;
            coverage.retrieval_omitted = retrieved.omitted;
            coverage.snippets_included = retrieved.snippets.len();
            for snippet in &retrieved.snippets {
                body.push_str(SECTION_SEPARATOR);
                body.push_str(&snippet.render());
            }
            budget.try_commit(retrieved.used_tokens);
            used_tokens += retrieved.used_tokens;
        }

        info!("assembled prompt: {used_tokens} tokens, {}", coverage.to_log_string());
        Ok(AssembledPrompt {
            body,
            coverage,
            used_tokens,
            anchors,
        })
    }

    /// Build a suggestion tracker over `store` using this engine's publish
    /// threshold.
    pub fn suggestion_tracker(&self, store: Arc<dyn LedgerStore>) -> SuggestionTracker {
        SuggestionTracker::new(store, self.config.publish_threshold)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Query text for the semantic index: PR title and description plus the
/// highest-scored changed paths.
fn retrieval_query(meta: &PrMetadata, set: &crate::patch::PatchSet) -> String {
    let mut parts = Vec::new();
    if !meta.title.is_empty() {
        parts.push(meta.title.clone());
    }
    if !meta.description.is_empty() {
        parts.push(meta.description.clone());
    }
    let top_paths: Vec<String> = set
        .by_score_desc()
        .into_iter()
        .filter(|&i| !set.files[i].excluded)
        .take(5)
        .map(|i| set.files[i].path.clone())
        .collect();
    if !top_paths.is_empty() {
        parts.push(top_paths.join(" "));
    }
    let query = parts.join("\n");
    debug!("retrieval query: {} chars", query.len());
    query
}
