//! Suggestion ledger: deduplication and staleness across invocations.
//!
//! The ledger records every suggestion published to a review thread, keyed
//! by stable identity. Reconciling a new batch against it makes re-review
//! idempotent: an unchanged diff region never produces a duplicate
//! comment, and previously shown suggestions whose anchored code has
//! disappeared from the diff are flagged stale.
//!
//! Persistence goes through the [`LedgerStore`] trait — an external
//! key-value store keyed by review-thread id; entry expiry is the caller's
//! concern. Reconciliation for one thread is serialized by a per-thread
//! async lock; distinct threads proceed fully in parallel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use super::{Suggestion, SuggestionId, SuggestionState};

/// Errors from ledger persistence.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger store error: {0}")]
    Store(String),

    #[error("ledger serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Last-seen record for one suggestion identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub state: SuggestionState,
    pub score: Option<f64>,
    /// Normalized anchor content, used for staleness detection.
    pub anchor: String,
    pub last_seen: DateTime<Utc>,
}

/// Per-thread record of published suggestions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestionLedger {
    pub entries: HashMap<String, LedgerEntry>,
}

impl SuggestionLedger {
    pub fn state_of(&self, id: &SuggestionId) -> Option<SuggestionState> {
        self.entries.get(id.as_str()).map(|e| e.state)
    }
}

/// Result of reconciling a batch of new suggestions.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Suggestions that should be published now.
    pub to_publish: Vec<Suggestion>,
    /// Identities newly marked stale this round.
    pub stale: Vec<SuggestionId>,
    /// Count suppressed as already shown.
    pub suppressed: usize,
    /// Count filtered out by the score threshold (including missing or
    /// malformed scores).
    pub below_threshold: usize,
}

/// Reconcile new suggestions against the ledger, in place.
///
/// `current_anchors` is the set of normalized hunk anchors present in the
/// current diff (see `PatchSet::anchors`); a previously shown suggestion
/// whose anchor no longer appears in any of them goes stale.
pub fn reconcile(
    new: Vec<Suggestion>,
    ledger: &mut SuggestionLedger,
    current_anchors: &HashSet<String>,
    threshold: f64,
) -> ReconcileOutcome {
    let now = Utc::now();
    let mut outcome = ReconcileOutcome::default();

    for mut suggestion in new {
        // Defensive threshold filter: no score means below threshold.
        let publishable = suggestion.score.is_some_and(|s| s >= threshold);
        if !publishable {
            debug!(
                "suggestion {} for '{}' below threshold (score {:?})",
                suggestion.id, suggestion.path, suggestion.score,
            );
            outcome.below_threshold += 1;
            continue;
        }

        match ledger.entries.entry(suggestion.id.as_str().to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.state == SuggestionState::Shown {
                    // Idempotence: identical suggestion on an unchanged region.
                    entry.last_seen = now;
                    outcome.suppressed += 1;
                } else {
                    // Previously stale or superseded and now relevant again
                    // (e.g. the change was reverted): publish afresh.
                    entry.state = SuggestionState::Shown;
                    entry.score = suggestion.score;
                    entry.last_seen = now;
                    suggestion.state = SuggestionState::Shown;
                    outcome.to_publish.push(suggestion);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LedgerEntry {
                    state: SuggestionState::Shown,
                    score: suggestion.score,
                    anchor: suggestion.anchor.clone(),
                    last_seen: now,
                });
                suggestion.state = SuggestionState::Shown;
                outcome.to_publish.push(suggestion);
            }
        }
    }

    // Staleness: shown entries whose anchor no longer appears in the diff.
    for (id, entry) in ledger.entries.iter_mut() {
        if entry.state == SuggestionState::Shown
            && !entry.anchor.is_empty()
            && !current_anchors.iter().any(|a| a.contains(&entry.anchor))
        {
            entry.state = SuggestionState::Stale;
            outcome.stale.push(SuggestionId::from_hex(id.clone()));
        }
    }

    debug!(
        "reconcile: {} to publish, {} suppressed, {} below threshold, {} stale",
        outcome.to_publish.len(),
        outcome.suppressed,
        outcome.below_threshold,
        outcome.stale.len(),
    );
    outcome
}

/// Boxed future returned by [`LedgerStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// External key-value persistence for ledgers, keyed by review-thread id.
pub trait LedgerStore: Send + Sync {
    fn load(&self, thread_id: &str) -> StoreFuture<'_, Option<SuggestionLedger>>;
    fn save(&self, thread_id: &str, ledger: &SuggestionLedger) -> StoreFuture<'_, ()>;
}

/// In-memory store: serialized JSON per thread, like a real KV store
/// would hold. Suitable for tests and single-process embedding.
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self, thread_id: &str) -> StoreFuture<'_, Option<SuggestionLedger>> {
        let raw = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(thread_id)
            .cloned();
        Box::pin(async move {
            match raw {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
    }

    fn save(&self, thread_id: &str, ledger: &SuggestionLedger) -> StoreFuture<'_, ()> {
        let thread_id = thread_id.to_string();
        let serialized = serde_json::to_string(ledger);
        Box::pin(async move {
            let json = serialized?;
            self.inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(thread_id, json);
            Ok(())
        })
    }
}

/// File-backed store: one JSON file per thread under a root directory.
/// Writes go through a temp file and rename, so a crash mid-save never
/// leaves a truncated ledger behind.
pub struct FileLedgerStore {
    root: PathBuf,
}

impl FileLedgerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        // Thread ids can contain path separators (e.g. "owner/repo#41").
        let safe: String = thread_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{safe}.json"))
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self, thread_id: &str) -> StoreFuture<'_, Option<SuggestionLedger>> {
        let path = self.path_for(thread_id);
        Box::pin(async move {
            if !path.exists() {
                return Ok(None);
            }
            let json = std::fs::read_to_string(&path)
                .map_err(|e| LedgerError::Store(format!("read {}: {e}", path.display())))?;
            Ok(Some(serde_json::from_str(&json)?))
        })
    }

    fn save(&self, thread_id: &str, ledger: &SuggestionLedger) -> StoreFuture<'_, ()> {
        let path = self.path_for(thread_id);
        let root = self.root.clone();
        let serialized = serde_json::to_string_pretty(ledger);
        Box::pin(async move {
            let json = serialized?;
            std::fs::create_dir_all(&root)
                .map_err(|e| LedgerError::Store(format!("create {}: {e}", root.display())))?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)
                .map_err(|e| LedgerError::Store(format!("write {}: {e}", tmp.display())))?;
            std::fs::rename(&tmp, &path)
                .map_err(|e| LedgerError::Store(format!("rename to {}: {e}", path.display())))?;
            Ok(())
        })
    }
}

/// Serializes reconciliation per review thread over a [`LedgerStore`].
pub struct SuggestionTracker {
    store: Arc<dyn LedgerStore>,
    threshold: f64,
    /// One async mutex per live thread id. Guards load-reconcile-save.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SuggestionTracker {
    pub fn new(store: Arc<dyn LedgerStore>, threshold: f64) -> Self {
        Self {
            store,
            threshold,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the registry entry once `lock` is its last outstanding handle.
    /// Exactly two strong references (the map's and ours) mean no other
    /// reconcile for this thread is in flight; `lock_for` also takes the
    /// registry mutex, so no new handle can appear during the check.
    fn unlock_for(&self, thread_id: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let idle = locks
            .get(thread_id)
            .is_some_and(|existing| Arc::ptr_eq(existing, lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(thread_id);
        }
    }

    /// Load the thread's ledger, reconcile, and persist the update.
    /// No two reconciles for the same thread run concurrently.
    pub async fn reconcile_thread(
        &self,
        thread_id: &str,
        new: Vec<Suggestion>,
        current_anchors: &HashSet<String>,
    ) -> Result<ReconcileOutcome, LedgerError> {
        let lock = self.lock_for(thread_id);
        let result = async {
            let _guard = lock.lock().await;
            let mut ledger = match self.store.load(thread_id).await {
                Ok(l) => l.unwrap_or_default(),
                Err(e) => {
                    warn!("ledger load failed for thread '{thread_id}': {e}");
                    return Err(e);
                }
            };
            let outcome = reconcile(new, &mut ledger, current_anchors, self.threshold);
            self.store.save(thread_id, &ledger).await?;
            Ok(outcome)
        }
        .await;
        self.unlock_for(thread_id, &lock);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggest::suggestion_id;
    use serde_json::json;

    fn suggestion(path: &str, anchor: &str, body: &str, score: f64) -> Suggestion {
        let raw = crate::suggest::RawSuggestion {
            file: Some(path.into()),
            start_line: Some(1),
            end_line: Some(2),
            existing_code: Some(anchor.into()),
            suggestion: Some(body.into()),
            score: Some(json!(score)),
        };
        crate::suggest::validate(raw).unwrap()
    }

    fn anchors(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| super::super::normalize_anchor(s)).collect()
    }

    #[test]
    fn new_suggestion_is_published_and_recorded() {
        let mut ledger = SuggestionLedger::default();
        let s = suggestion("src/a.rs", "let x = 1;", "name it", 9.0);
        let id = s.id.clone();

        let outcome = reconcile(vec![s], &mut ledger, &anchors(&["let x = 1;"]), 7.0);
        assert_eq!(outcome.to_publish.len(), 1);
        assert_eq!(outcome.to_publish[0].state, SuggestionState::Shown);
        assert_eq!(ledger.state_of(&id), Some(SuggestionState::Shown));
    }

    #[test]
    fn shown_suggestion_is_suppressed() {
        let mut ledger = SuggestionLedger::default();
        let current = anchors(&["let x = 1;"]);
        let first = suggestion("src/a.rs", "let x = 1;", "name it", 9.0);
        reconcile(vec![first], &mut ledger, &current, 7.0);

        let again = suggestion("src/a.rs", "let x = 1;", "name it", 9.0);
        let outcome = reconcile(vec![again], &mut ledger, &current, 7.0);
        assert!(outcome.to_publish.is_empty());
        assert_eq!(outcome.suppressed, 1);
    }

    #[test]
    fn vanished_anchor_goes_stale() {
        let mut ledger = SuggestionLedger::default();
        let s = suggestion("src/a.rs", "let x = 1;", "name it", 9.0);
        let id = s.id.clone();
        reconcile(vec![s], &mut ledger, &anchors(&["let x = 1;"]), 7.0);

        // Next round: the diff no longer contains the anchored code.
        let outcome = reconcile(vec![], &mut ledger, &anchors(&["fn other() {}"]), 7.0);
        assert_eq!(outcome.stale.len(), 1);
        assert_eq!(ledger.state_of(&id), Some(SuggestionState::Stale));
    }

    #[test]
    fn stale_suggestion_republished_when_anchor_returns() {
        let mut ledger = SuggestionLedger::default();
        let s = suggestion("src/a.rs", "let x = 1;", "name it", 9.0);
        let id = s.id.clone();
        reconcile(vec![s.clone()], &mut ledger, &anchors(&["let x = 1;"]), 7.0);
        reconcile(vec![], &mut ledger, &anchors(&["fn other() {}"]), 7.0);
        assert_eq!(ledger.state_of(&id), Some(SuggestionState::Stale));

        let outcome = reconcile(vec![s], &mut ledger, &anchors(&["let x = 1;"]), 7.0);
        assert_eq!(outcome.to_publish.len(), 1);
        assert_eq!(ledger.state_of(&id), Some(SuggestionState::Shown));
    }

    #[test]
    fn threshold_filters_low_and_missing_scores() {
        let mut ledger = SuggestionLedger::default();
        let low = suggestion("src/a.rs", "a", "minor nit", 3.0);
        let mut unscored = suggestion("src/a.rs", "b", "no score", 9.0);
        unscored.score = None;
        let good = suggestion("src/a.rs", "c", "real issue", 8.0);

        let outcome = reconcile(
            vec![low, unscored, good],
            &mut ledger,
            &anchors(&["a", "b", "c"]),
            7.0,
        );
        assert_eq!(outcome.to_publish.len(), 1);
        assert_eq!(outcome.below_threshold, 2);
        assert_eq!(outcome.to_publish[0].body, "real issue");
    }

    #[test]
    fn anchor_containment_matches_hunk_anchors() {
        // A hunk anchor covers the whole hunk's changed lines; the
        // suggestion anchor is a fragment of it.
        let mut ledger = SuggestionLedger::default();
        let s = suggestion("src/a.rs", "let x = 1;", "name it", 9.0);
        let id = s.id.clone();
        let hunk_anchor = anchors(&["fn setup() {\nlet x = 1;\nlet y = 2;"]);

        reconcile(vec![s], &mut ledger, &hunk_anchor, 7.0);
        let outcome = reconcile(vec![], &mut ledger, &hunk_anchor, 7.0);
        assert!(outcome.stale.is_empty());
        assert_eq!(ledger.state_of(&id), Some(SuggestionState::Shown));
    }

    #[test]
    fn ledger_roundtrips_through_serde() {
        let mut ledger = SuggestionLedger::default();
        let s = suggestion("src/a.rs", "let x = 1;", "name it", 9.0);
        reconcile(vec![s], &mut ledger, &anchors(&["let x = 1;"]), 7.0);

        let json = serde_json::to_string(&ledger).unwrap();
        let restored: SuggestionLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.entries.len(), 1);
        let id = suggestion_id("src/a.rs", "let x = 1;", "name it");
        assert_eq!(restored.state_of(&id), Some(SuggestionState::Shown));
    }

    #[tokio::test]
    async fn tracker_persists_across_invocations() {
        let store = Arc::new(MemoryLedgerStore::new());
        let tracker = SuggestionTracker::new(store, 7.0);
        let current = anchors(&["let x = 1;"]);

        let first = tracker
            .reconcile_thread(
                "pr-42",
                vec![suggestion("src/a.rs", "let x = 1;", "name it", 9.0)],
                &current,
            )
            .await
            .unwrap();
        assert_eq!(first.to_publish.len(), 1);

        let second = tracker
            .reconcile_thread(
                "pr-42",
                vec![suggestion("src/a.rs", "let x = 1;", "name it", 9.0)],
                &current,
            )
            .await
            .unwrap();
        assert!(second.to_publish.is_empty());
        assert_eq!(second.suppressed, 1);
    }

    #[tokio::test]
    async fn file_store_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let current = anchors(&["let x = 1;"]);

        {
            let tracker =
                SuggestionTracker::new(Arc::new(FileLedgerStore::new(dir.path())), 7.0);
            let outcome = tracker
                .reconcile_thread(
                    "owner/repo#41",
                    vec![suggestion("src/a.rs", "let x = 1;", "name it", 9.0)],
                    &current,
                )
                .await
                .unwrap();
            assert_eq!(outcome.to_publish.len(), 1);
        }

        // New tracker over the same directory, as after a process restart.
        let tracker = SuggestionTracker::new(Arc::new(FileLedgerStore::new(dir.path())), 7.0);
        let outcome = tracker
            .reconcile_thread(
                "owner/repo#41",
                vec![suggestion("src/a.rs", "let x = 1;", "name it", 9.0)],
                &current,
            )
            .await
            .unwrap();
        assert!(outcome.to_publish.is_empty());
        assert_eq!(outcome.suppressed, 1);
    }

    #[tokio::test]
    async fn file_store_missing_thread_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path());
        let loaded = store.load("never-seen").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn distinct_threads_are_independent() {
        let store = Arc::new(MemoryLedgerStore::new());
        let tracker = SuggestionTracker::new(store, 7.0);
        let current = anchors(&["let x = 1;"]);
        let mk = || suggestion("src/a.rs", "let x = 1;", "name it", 9.0);

        let a = tracker.reconcile_thread("pr-1", vec![mk()], &current).await.unwrap();
        let b = tracker.reconcile_thread("pr-2", vec![mk()], &current).await.unwrap();
        assert_eq!(a.to_publish.len(), 1);
        assert_eq!(b.to_publish.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_reconciles_for_one_thread_serialize() {
        let store = Arc::new(MemoryLedgerStore::new());
        let tracker = Arc::new(SuggestionTracker::new(store, 7.0));
        let current = anchors(&["let x = 1;"]);

        let t1 = {
            let tracker = Arc::clone(&tracker);
            let current = current.clone();
            tokio::spawn(async move {
                let s = suggestion("src/a.rs", "let x = 1;", "name it", 9.0);
                tracker.reconcile_thread("pr-9", vec![s], &current).await.unwrap()
            })
        };
        let t2 = {
            let tracker = Arc::clone(&tracker);
            let current = current.clone();
            tokio::spawn(async move {
                let s = suggestion("src/a.rs", "let x = 1;", "name it", 9.0);
                tracker.reconcile_thread("pr-9", vec![s], &current).await.unwrap()
            })
        };

        let (a, b) = (t1.await.unwrap(), t2.await.unwrap());
        // Exactly one of the two racing reconciles publishes.
        assert_eq!(a.to_publish.len() + b.to_publish.len(), 1);
        assert_eq!(a.suppressed + b.suppressed, 1);
        // Both handles are gone, so the lock registry is empty again.
        assert!(tracker.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_registry_does_not_grow_with_thread_ids() {
        let tracker = SuggestionTracker::new(Arc::new(MemoryLedgerStore::new()), 7.0);
        for i in 0..32 {
            tracker
                .reconcile_thread(&format!("pr-{i}"), Vec::new(), &HashSet::new())
                .await
                .unwrap();
        }
        assert!(tracker.locks.lock().unwrap().is_empty());
    }
}
