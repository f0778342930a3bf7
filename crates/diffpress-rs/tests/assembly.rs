//! End-to-end tests for the assembly pipeline.
//!
//! These exercise the full parse → score → allocate → fit → retrieve flow
//! through the public API, plus suggestion reconciliation across review
//! rounds backed by the in-memory ledger store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use diffpress::prelude::*;
use diffpress::retrieval::{RetrievalError, RetryPolicy, SearchFuture};
use diffpress::suggest::{RawSuggestion, validate};

/// Three files of distinctly different value: real engine code, a test
/// file, and a lockfile.
const MIXED_DIFF: &str = "\
diff --git a/src/engine.rs b/src/engine.rs
index 1111111..2222222 100644
--- a/src/engine.rs
+++ b/src/engine.rs
@@ -10,5 +10,7 @@ impl Engine {
     fn start(&mut self) {
         self.ready = true;
+        self.warm_cache();
+        self.spawn_workers();
         self.tick = 0;
     }
 }
diff --git a/tests/engine_test.rs b/tests/engine_test.rs
index 3333333..4444444 100644
--- a/tests/engine_test.rs
+++ b/tests/engine_test.rs
@@ -1,4 +1,5 @@
 use engine::Engine;
+use engine::Workers;

 fn setup() -> Engine {
     Engine::default()
@@ -20,3 +21,6 @@ fn starts_clean() {
     let e = setup();
     assert!(e.ready);
 }
+fn spawns_workers() {
+    assert!(setup().workers > 0);
+}
diff --git a/Cargo.lock b/Cargo.lock
index 5555555..6666666 100644
--- a/Cargo.lock
+++ b/Cargo.lock
@@ -100,4 +100,5 @@ name = \"engine\"
 version = \"0.3.0\"
 dependencies = [
  \"serde\",
+ \"rayon\",
 ]
";

fn wide_open() -> EngineConfig {
    EngineConfig::default().with_reserved_overhead(0)
}

#[tokio::test]
async fn small_diff_passes_through_verbatim() {
    let assembler = PromptAssembler::new(wide_open());
    let prompt = assembler
        .assemble(MIXED_DIFF, &PrMetadata::default(), 100_000)
        .await
        .unwrap();

    // Every changed line survives, including the low-value files.
    assert!(prompt.body.contains("self.warm_cache();"));
    assert!(prompt.body.contains("fn spawns_workers()"));
    assert!(prompt.body.contains("\"rayon\","));
    for file in &prompt.coverage.files {
        assert_eq!(file.level, CompressionLevel::Full);
    }
}

#[tokio::test]
async fn used_tokens_never_exceed_effective_budget() {
    let estimator = CharEstimator::new(3.5);
    for max_tokens in [60, 120, 250, 500, 2_000] {
        let assembler = PromptAssembler::new(wide_open());
        let prompt = assembler
            .assemble(MIXED_DIFF, &PrMetadata::default(), max_tokens)
            .await
            .unwrap();
        assert!(
            prompt.used_tokens <= max_tokens,
            "{} tokens used against a budget of {max_tokens}",
            prompt.used_tokens
        );
        let measured = estimator.estimate(&prompt.body).unwrap();
        assert!(measured <= max_tokens, "body measures {measured} > {max_tokens}");
    }
}

#[tokio::test]
async fn exact_fit_budgets_account_for_section_separators() {
    // One token per character makes every budget an exact byte count, so
    // the blank lines joining file sections must be paid for too.
    let estimator = Arc::new(diffpress::tokens::FnEstimator::new(|t: &str| Ok(t.len())));
    let full_len = {
        let assembler = PromptAssembler::new(wide_open()).with_estimator(estimator.clone());
        let prompt = assembler
            .assemble(MIXED_DIFF, &PrMetadata::default(), 1_000_000)
            .await
            .unwrap();
        prompt.body.len()
    };

    // Sweep budgets straddling the pass-through boundary.
    for max_tokens in full_len.saturating_sub(6)..=full_len + 6 {
        let assembler = PromptAssembler::new(wide_open()).with_estimator(estimator.clone());
        let prompt = assembler
            .assemble(MIXED_DIFF, &PrMetadata::default(), max_tokens)
            .await
            .unwrap();
        assert!(
            prompt.body.len() <= max_tokens,
            "body measures {} against a budget of {max_tokens}",
            prompt.body.len()
        );
        assert!(prompt.used_tokens <= max_tokens);
    }
}

#[tokio::test]
async fn lockfile_degrades_before_engine_code() {
    let assembler = PromptAssembler::new(wide_open());
    // Tight enough that something must give, loose enough that the engine
    // file fits whole.
    let prompt = assembler
        .assemble(MIXED_DIFF, &PrMetadata::default(), 150)
        .await
        .unwrap();

    let level_of = |path: &str| prompt.coverage.level_for(path).unwrap();
    assert!(level_of("Cargo.lock") >= level_of("src/engine.rs"));
    assert_eq!(level_of("src/engine.rs"), CompressionLevel::Full);
}

#[tokio::test]
async fn excluded_paths_never_reach_the_prompt() {
    let meta = PrMetadata::default().exclude_path("Cargo.lock");
    let assembler = PromptAssembler::new(wide_open());
    let prompt = assembler.assemble(MIXED_DIFF, &meta, 100_000).await.unwrap();

    assert!(!prompt.body.contains("Cargo.lock"));
    assert_eq!(
        prompt.coverage.level_for("Cargo.lock"),
        Some(CompressionLevel::Excluded)
    );
}

#[tokio::test]
async fn coverage_log_line_is_stable() {
    let assembler = PromptAssembler::new(wide_open());
    let prompt = assembler
        .assemble(MIXED_DIFF, &PrMetadata::default(), 100_000)
        .await
        .unwrap();
    assert_eq!(prompt.coverage.to_log_string(), "coverage: 3 full");
}

// ── Retrieval ───────────────────────────────────────────────────────

struct CannedIndex;

impl SnippetIndex for CannedIndex {
    fn search(&self, query: SnippetQuery) -> SearchFuture<'_> {
        Box::pin(async move {
            Ok(vec![ContextSnippet {
                repo: query.repo,
                path: "src/workers.rs".into(),
                start_line: 8,
                end_line: 20,
                score: 0.88,
                content: "pub fn spawn_workers(n: usize) {}".into(),
            }])
        })
    }
}

struct DeadIndex;

impl SnippetIndex for DeadIndex {
    fn search(&self, _query: SnippetQuery) -> SearchFuture<'_> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(RetrievalError::Request("dead".into()))
        })
    }
}

#[tokio::test]
async fn retrieved_snippets_ride_the_leftover_budget() {
    let retriever = ContextRetriever::new(Arc::new(CannedIndex), vec!["platform".into()]);
    let assembler = PromptAssembler::new(wide_open()).with_retriever(retriever);
    let meta = PrMetadata::new("Spawn workers on start", "");

    let prompt = assembler.assemble(MIXED_DIFF, &meta, 100_000).await.unwrap();
    assert_eq!(prompt.coverage.snippets_included, 1);
    assert!(prompt.body.contains("## context: 'platform:src/workers.rs'"));
    // The diff always comes first.
    assert!(prompt.body.find("## file:").unwrap() < prompt.body.find("## context:").unwrap());
}

#[tokio::test(start_paused = true)]
async fn unreachable_index_degrades_to_diff_only() {
    let retriever = ContextRetriever::new(Arc::new(DeadIndex), vec!["platform".into()])
        .with_timeout(Duration::from_millis(100))
        .with_retry_policy(RetryPolicy::with_retries(0));
    let assembler = PromptAssembler::new(wide_open()).with_retriever(retriever);

    let prompt = assembler
        .assemble(MIXED_DIFF, &PrMetadata::default(), 100_000)
        .await
        .unwrap();
    assert!(prompt.coverage.retrieval_omitted);
    assert_eq!(prompt.coverage.snippets_included, 0);
    assert!(prompt.body.contains("self.warm_cache();"));
}

// ── Suggestions across rounds ───────────────────────────────────────

fn raw(file: &str, code: &str, body: &str, score: i64) -> RawSuggestion {
    RawSuggestion {
        file: Some(file.into()),
        start_line: Some(12),
        end_line: Some(14),
        existing_code: Some(code.into()),
        suggestion: Some(body.into()),
        score: Some(serde_json::json!(score)),
    }
}

#[tokio::test]
async fn identity_survives_line_drift_and_repeats_are_suppressed() {
    let tracker = SuggestionTracker::new(Arc::new(MemoryLedgerStore::new()), 7.0);
    let anchors: HashSet<String> = [diffpress::suggest::normalize_anchor(
        "self.warm_cache();",
    )]
    .into();

    let first = validate(raw(
        "src/engine.rs",
        "self.warm_cache();",
        "Guard the cache warm-up behind the ready flag.",
        9,
    ))
    .unwrap();

    let outcome = tracker
        .reconcile_thread("pr-41", vec![first.clone()], &anchors)
        .await
        .unwrap();
    assert_eq!(outcome.to_publish.len(), 1);

    // Same suggestion again, but the file shifted four lines.
    let mut drifted = validate(raw(
        "src/engine.rs",
        "  self.warm_cache();  ",
        "Guard the cache warm-up behind the ready flag.",
        9,
    ))
    .unwrap();
    drifted.start_line = 16;
    drifted.end_line = 18;
    assert_eq!(drifted.id, first.id);

    let outcome = tracker
        .reconcile_thread("pr-41", vec![drifted], &anchors)
        .await
        .unwrap();
    assert!(outcome.to_publish.is_empty());
    assert_eq!(outcome.suppressed, 1);
}

#[tokio::test]
async fn vanished_anchor_marks_suggestion_stale() {
    let tracker = SuggestionTracker::new(Arc::new(MemoryLedgerStore::new()), 7.0);
    let s = validate(raw("src/engine.rs", "self.tick = 0;", "Reset after stop too.", 8)).unwrap();
    let id = s.id.clone();

    let anchors: HashSet<String> =
        [diffpress::suggest::normalize_anchor("self.tick = 0;")].into();
    tracker
        .reconcile_thread("pr-42", vec![s], &anchors)
        .await
        .unwrap();

    // Next push removed the line entirely.
    let outcome = tracker
        .reconcile_thread("pr-42", Vec::new(), &HashSet::new())
        .await
        .unwrap();
    assert_eq!(outcome.stale, vec![id]);
}

#[tokio::test]
async fn below_threshold_suggestions_never_enter_the_ledger() {
    let assembler = PromptAssembler::new(EngineConfig::default());
    let tracker = assembler.suggestion_tracker(Arc::new(MemoryLedgerStore::new()));
    let weak = validate(raw("src/engine.rs", "self.ready = true;", "Nit: rename.", 3)).unwrap();

    let outcome = tracker
        .reconcile_thread("pr-43", vec![weak], &HashSet::new())
        .await
        .unwrap();
    assert!(outcome.to_publish.is_empty());
    assert_eq!(outcome.below_threshold, 1);
}
