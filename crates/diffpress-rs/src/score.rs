//! File importance scoring.
//!
//! Assigns a score to every [`FilePatch`](crate::patch::FilePatch) so the
//! allocator can distribute
//! budget where review attention matters most. Scoring is pure and
//! deterministic given identical inputs: same diff, same metadata, same
//! weights — same scores, same order. Required for reproducible prompts.
//!
//! The heuristic combines change density, file role (tests, generated
//! code, and lock files score lower), and a keyword bonus when the file
//! name shows up in the PR title, description, or linked ticket text.
//! Hard include rules force the maximal score; hard exclude rules force
//! exclusion regardless of budget.

use crate::config::ScoreWeights;
use crate::patch::PatchSet;
use tracing::debug;

/// Score assigned to hard-included paths. Large enough to dominate any
/// heuristic score under default weights.
pub const FORCED_SCORE: f64 = 100.0;

/// PR/issue metadata supplied by the orchestration layer.
#[derive(Debug, Clone, Default)]
pub struct PrMetadata {
    pub title: String,
    pub description: String,
    /// Text of any linked ticket, if available.
    pub ticket_text: String,
    /// Paths matching any of these rules are always included at maximal
    /// score. Rules match as path substrings.
    pub include_paths: Vec<String>,
    /// Paths matching any of these rules are excluded regardless of budget.
    pub exclude_paths: Vec<String>,
}

impl PrMetadata {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_ticket_text(mut self, text: impl Into<String>) -> Self {
        self.ticket_text = text.into();
        self
    }

    pub fn include_path(mut self, rule: impl Into<String>) -> Self {
        self.include_paths.push(rule.into());
        self
    }

    pub fn exclude_path(mut self, rule: impl Into<String>) -> Self {
        self.exclude_paths.push(rule.into());
        self
    }
}

/// Assign scores to every file in the set, in place.
pub fn score_patch_set(set: &mut PatchSet, meta: &PrMetadata, weights: &ScoreWeights) {
    for file in &mut set.files {
        if rule_matches(&meta.exclude_paths, &file.path) {
            file.excluded = true;
            file.score = 0.0;
            debug!("scored '{}': excluded by path rule", file.path);
            continue;
        }
        if rule_matches(&meta.include_paths, &file.path) {
            file.score = FORCED_SCORE;
            debug!("scored '{}': forced include", file.path);
            continue;
        }
        if file.binary {
            // No hunks to review; ranks below any real content.
            file.score = 0.0;
            continue;
        }

        let base = file.density() * weights.density_weight + keyword_bonus(&file.path, meta, weights);
        file.score = base * role_multiplier(&file.path, weights);
        debug!("scored '{}': {:.3}", file.path, file.score);
    }
}

fn rule_matches(rules: &[String], path: &str) -> bool {
    rules.iter().any(|r| !r.is_empty() && path.contains(r.as_str()))
}

/// Multiplier for low-signal file roles. First match wins: lock files are
/// checked before tests so `tests/Cargo.lock` still ranks as a lock file.
fn role_multiplier(path: &str, weights: &ScoreWeights) -> f64 {
    let lower = path.to_lowercase();
    let name = lower.rsplit('/').next().unwrap_or(&lower);

    let lockfile = name.ends_with(".lock")
        || name == "package-lock.json"
        || name == "yarn.lock"
        || name == "pnpm-lock.yaml"
        || name == "go.sum";
    if lockfile {
        return weights.role_lockfile;
    }

    let generated = lower.contains("/generated/")
        || lower.contains(".generated.")
        || name.ends_with(".pb.go")
        || name.ends_with("_pb2.py")
        || lower.starts_with("vendor/")
        || lower.contains("/vendor/");
    if generated {
        return weights.role_generated;
    }

    let test = lower.starts_with("tests/")
        || lower.contains("/tests/")
        || lower.contains("/test/")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
        || name.starts_with("test_");
    if test {
        return weights.role_test;
    }

    1.0
}

/// Bonus when the file's stem appears in the PR title, description, or
/// ticket text (case-insensitive). Stems shorter than three characters are
/// skipped to avoid accidental matches.
fn keyword_bonus(path: &str, meta: &PrMetadata, weights: &ScoreWeights) -> f64 {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.split('.').next().unwrap_or(name).to_lowercase();
    if stem.len() < 3 {
        return 0.0;
    }
    let haystack = format!(
        "{} {} {}",
        meta.title.to_lowercase(),
        meta.description.to_lowercase(),
        meta.ticket_text.to_lowercase(),
    );
    if haystack.contains(&stem) {
        weights.keyword_bonus
    } else {
        0.0
    }
}
