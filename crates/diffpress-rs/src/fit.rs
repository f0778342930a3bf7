//! Adaptive fitting: compress each file just enough to meet its quota.
//!
//! Every file walks an ascending ladder of compression levels and stops at
//! the first level whose rendering fits the file's quota:
//!
//! 1. **Full** — every hunk verbatim.
//! 2. **Context-trimmed** — unchanged context reduced to a small window
//!    around each change; all ADD/DEL lines kept.
//! 3. **Hunk-pruned** — lowest-density hunks dropped first, down to one.
//! 4. **Header-only** — one summary line with add/del counts.
//! 5. **Excluded** — omitted entirely, recorded in the coverage report.
//!
//! Levels are never skipped, which guarantees maximal preserved detail for
//! the given budget. Fitting is pure: identical inputs produce a
//! byte-identical prompt body.

use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::allocate::Allocation;
use crate::config::EngineConfig;
use crate::patch::{FilePatch, PatchSet};
use crate::tokens::{TokenEstimator, estimate_or_max};

/// Separator between file sections and before each retrieved snippet.
/// Its token cost is charged wherever content is budgeted, so the
/// assembled body never exceeds the sum of its parts' estimates.
pub(crate) const SECTION_SEPARATOR: &str = "\n\n";

/// Compression level applied to one file. Ordered by decreasing detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionLevel {
    Full,
    ContextTrimmed,
    HunkPruned,
    HeaderOnly,
    Excluded,
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionLevel::Full => write!(f, "full"),
            CompressionLevel::ContextTrimmed => write!(f, "context-trimmed"),
            CompressionLevel::HunkPruned => write!(f, "hunk-pruned"),
            CompressionLevel::HeaderOnly => write!(f, "header-only"),
            CompressionLevel::Excluded => write!(f, "excluded"),
        }
    }
}

/// Coverage of one file in the assembled prompt.
#[derive(Debug, Clone, Serialize)]
pub struct FileCoverage {
    pub path: String,
    pub level: CompressionLevel,
}

/// Which files made it into the prompt, and at what fidelity. Consumed by
/// the model-invocation layer and by logging/telemetry collaborators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoverageReport {
    pub files: Vec<FileCoverage>,
    /// Set when context retrieval was requested but failed or timed out.
    pub retrieval_omitted: bool,
    /// Number of retrieved snippets appended to the prompt.
    pub snippets_included: usize,
}

impl CoverageReport {
    pub fn level_for(&self, path: &str) -> Option<CompressionLevel> {
        self.files.iter().find(|f| f.path == path).map(|f| f.level)
    }

    /// Short log-friendly summary, e.g.
    /// `coverage: 3 full, 1 hunk-pruned, 2 excluded; context-retrieval: omitted`.
    pub fn to_log_string(&self) -> String {
        use CompressionLevel::*;
        let mut parts = Vec::new();
        for level in [Full, ContextTrimmed, HunkPruned, HeaderOnly, Excluded] {
            let n = self.files.iter().filter(|f| f.level == level).count();
            if n > 0 {
                parts.push(format!("{n} {level}"));
            }
        }
        let mut s = format!("coverage: {}", parts.join(", "));
        if self.retrieval_omitted {
            s.push_str("; context-retrieval: omitted");
        }
        s
    }
}

/// Result of one fitting pass.
#[derive(Debug)]
pub struct FitOutcome {
    /// Final prompt body for the diff content.
    pub body: String,
    /// Estimated tokens consumed by `body`.
    pub used_tokens: usize,
    pub coverage: CoverageReport,
}

/// Render a file at full fidelity: summary line plus every hunk verbatim.
pub(crate) fn render_full(file: &FilePatch) -> String {
    let mut out = file.summary_line();
    for hunk in &file.hunks {
        out.push('\n');
        out.push_str(&hunk.render());
    }
    out
}

fn render_trimmed(file: &FilePatch, window: usize) -> String {
    let mut out = file.summary_line();
    for hunk in &file.hunks {
        out.push('\n');
        out.push_str(&hunk.render_trimmed(window));
    }
    out
}

/// Render with the `keep` mask over hunks (trimmed context).
fn render_pruned(file: &FilePatch, window: usize, keep: &[bool]) -> String {
    let mut out = file.summary_line();
    for (i, hunk) in file.hunks.iter().enumerate() {
        if keep[i] {
            out.push('\n');
            out.push_str(&hunk.render_trimmed(window));
        }
    }
    out
}

/// Minimal useful rendering of a file: summary line plus its single best
/// hunk, trimmed. The allocator uses this as the all-or-nothing floor.
pub(crate) fn render_floor(file: &FilePatch, window: usize) -> String {
    match file.best_hunk() {
        Some(i) => {
            let mut keep = vec![false; file.hunks.len()];
            keep[i] = true;
            render_pruned(file, window, &keep)
        }
        None => file.summary_line(),
    }
}

/// Fit the patch set into its allocated quotas and assemble the prompt
/// body. Files appear in descending score order; excluded and dropped
/// files are recorded in the coverage report.
pub fn fit(
    set: &PatchSet,
    alloc: &Allocation,
    estimator: &dyn TokenEstimator,
    config: &EngineConfig,
) -> FitOutcome {
    let mut sections: Vec<(usize, String, CompressionLevel, usize)> = Vec::new();
    let mut coverage_levels: Vec<Option<CompressionLevel>> = vec![None; set.files.len()];

    for &idx in &set.by_score_desc() {
        let file = &set.files[idx];
        let quota = match alloc.quotas[idx] {
            Some(q) => q,
            None => {
                coverage_levels[idx] = Some(CompressionLevel::Excluded);
                continue;
            }
        };

        let (body, level, used) = fit_file(file, quota, alloc.pass_through, estimator, config);
        coverage_levels[idx] = Some(level);
        if level != CompressionLevel::Excluded {
            sections.push((idx, body, level, used));
        }
        debug!(
            "fit '{}': level={}, quota={}, used={}",
            file.path,
            level,
            quota,
            sections.last().map_or(0, |s| s.3),
        );
    }

    let sep_cost = estimate_or_max(estimator, SECTION_SEPARATOR, usize::MAX);
    let mut body = String::new();
    let mut used_tokens = 0usize;
    for (i, (_, section, _, used)) in sections.iter().enumerate() {
        if i > 0 {
            body.push_str(SECTION_SEPARATOR);
            used_tokens = used_tokens.saturating_add(sep_cost);
        }
        body.push_str(section);
        used_tokens = used_tokens.saturating_add(*used);
    }

    let coverage = CoverageReport {
        files: set
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| FileCoverage {
                path: f.path.clone(),
                level: coverage_levels[i].unwrap_or(CompressionLevel::Excluded),
            })
            .collect(),
        retrieval_omitted: false,
        snippets_included: 0,
    };

    FitOutcome {
        body,
        used_tokens,
        coverage,
    }
}

/// Walk one file down the compression ladder until it fits `quota`.
/// Returns the rendering, the level reached, and the estimated tokens used
/// (zero when excluded).
fn fit_file(
    file: &FilePatch,
    quota: usize,
    pass_through: bool,
    estimator: &dyn TokenEstimator,
    config: &EngineConfig,
) -> (String, CompressionLevel, usize) {
    // Fast path: the allocator already verified everything fits, so no
    // lossy step may run at all.
    if pass_through {
        let body = render_full(file);
        let est = estimate_or_max(estimator, &body, usize::MAX);
        return (body, CompressionLevel::Full, est);
    }

    // Level 1: Full.
    let body = render_full(file);
    let est = estimate_or_max(estimator, &body, usize::MAX);
    if est <= quota {
        return (body, CompressionLevel::Full, est);
    }

    // Level 2: Context-trimmed.
    let body = render_trimmed(file, config.context_lines);
    let est = estimate_or_max(estimator, &body, usize::MAX);
    if est <= quota {
        return (body, CompressionLevel::ContextTrimmed, est);
    }

    // Level 3: Hunk-pruned. Drop lowest-density hunks first; ties drop the
    // later hunk so earlier context survives. Stop when it fits or only
    // one hunk remains.
    if file.hunks.len() > 1 {
        let mut order: Vec<usize> = (0..file.hunks.len()).collect();
        // Ascending density; equal densities keep index order so the later
        // hunk is popped first.
        order.sort_by(|&a, &b| {
            file.hunks[a]
                .density()
                .partial_cmp(&file.hunks[b].density())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.cmp(&a))
        });

        let mut keep = vec![true; file.hunks.len()];
        for &drop in &order {
            if keep.iter().filter(|k| **k).count() <= 1 {
                break;
            }
            keep[drop] = false;
            let body = render_pruned(file, config.context_lines, &keep);
            let est = estimate_or_max(estimator, &body, usize::MAX);
            if est <= quota {
                return (body, CompressionLevel::HunkPruned, est);
            }
        }
    }

    // Level 4: Header-only.
    let body = file.summary_line();
    let est = estimate_or_max(estimator, &body, usize::MAX);
    if est <= quota {
        return (body, CompressionLevel::HeaderOnly, est);
    }

    // Level 5: Excluded.
    (String::new(), CompressionLevel::Excluded, 0)
}
