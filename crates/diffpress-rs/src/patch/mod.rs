//! Structured representation of a multi-file diff.
//!
//! A [`PatchSet`] owns one [`FilePatch`] per changed file, each of which
//! owns its [`Hunk`]s exclusively. Hunks are immutable once parsed; all
//! compression happens at render time, never by mutating the model. Built
//! once per review invocation and discarded after prompt assembly.

pub mod parser;

pub use parser::{MalformedDiffError, parse};

use std::collections::HashSet;
use std::fmt;

/// Tag of a single diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Add,
    Del,
    Context,
}

/// One line of a hunk, stored without its `+`/`-`/space prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    pub content: String,
}

impl DiffLine {
    /// Render with the unified-diff prefix character.
    pub fn render(&self) -> String {
        let prefix = match self.kind {
            LineKind::Add => '+',
            LineKind::Del => '-',
            LineKind::Context => ' ',
        };
        format!("{prefix}{}", self.content)
    }

    pub fn is_change(&self) -> bool {
        matches!(self.kind, LineKind::Add | LineKind::Del)
    }
}

/// Contiguous block of a file's diff. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct Hunk {
    /// Starting line in the old file.
    pub old_start: u32,
    /// Line count in the old file (context + deletions).
    pub old_lines: u32,
    /// Starting line in the new file.
    pub new_start: u32,
    /// Line count in the new file (context + additions).
    pub new_lines: u32,
    /// Trailing section text from the hunk header (enclosing function etc.).
    pub section: String,
    /// Ordered tagged lines.
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// The `@@ -a,b +c,d @@ section` header line.
    pub fn header(&self) -> String {
        let mut h = format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_lines, self.new_start, self.new_lines,
        );
        if !self.section.is_empty() {
            h.push(' ');
            h.push_str(&self.section);
        }
        h
    }

    /// Render the hunk verbatim: header plus every line.
    pub fn render(&self) -> String {
        let mut out = self.header();
        for line in &self.lines {
            out.push('\n');
            out.push_str(&line.render());
        }
        out
    }

    /// Render with surrounding context reduced to `window` unchanged lines
    /// on either side of each change run. All ADD/DEL lines are kept.
    ///
    /// The header is recomputed from the kept lines so line counts stay
    /// honest; start positions are advanced past dropped leading context.
    pub fn render_trimmed(&self, window: usize) -> String {
        let changed: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_change())
            .map(|(i, _)| i)
            .collect();
        if changed.is_empty() {
            return self.render();
        }

        let keep: Vec<bool> = (0..self.lines.len())
            .map(|i| {
                self.lines[i].is_change()
                    || changed.iter().any(|&c| i.abs_diff(c) <= window)
            })
            .collect();

        // Advance start positions past dropped leading context.
        let leading_dropped = keep.iter().take_while(|k| !*k).count() as u32;
        let mut old_count = 0u32;
        let mut new_count = 0u32;
        for (i, line) in self.lines.iter().enumerate() {
            if !keep[i] {
                continue;
            }
            match line.kind {
                LineKind::Add => new_count += 1,
                LineKind::Del => old_count += 1,
                LineKind::Context => {
                    old_count += 1;
                    new_count += 1;
                }
            }
        }

        let mut out = format!(
            "@@ -{},{} +{},{} @@",
            self.old_start + leading_dropped,
            old_count,
            self.new_start + leading_dropped,
            new_count,
        );
        if !self.section.is_empty() {
            out.push(' ');
            out.push_str(&self.section);
        }
        for (i, line) in self.lines.iter().enumerate() {
            if keep[i] {
                out.push('\n');
                out.push_str(&line.render());
            }
        }
        out
    }

    /// Fraction of lines that are changes. Higher density scores higher.
    pub fn density(&self) -> f64 {
        if self.lines.is_empty() {
            return 0.0;
        }
        let changed = self.lines.iter().filter(|l| l.is_change()).count();
        changed as f64 / self.lines.len() as f64
    }

    /// `(additions, deletions)` counts.
    pub fn change_counts(&self) -> (usize, usize) {
        let adds = self.lines.iter().filter(|l| l.kind == LineKind::Add).count();
        let dels = self.lines.iter().filter(|l| l.kind == LineKind::Del).count();
        (adds, dels)
    }

    /// Normalized content of the changed lines, used to anchor suggestion
    /// identities. Deliberately independent of absolute line numbers so
    /// unrelated edits elsewhere in the file do not move the anchor.
    pub fn anchor(&self) -> String {
        crate::suggest::normalize_anchor_lines(
            self.lines.iter().filter(|l| l.is_change()).map(|l| l.content.as_str()),
        )
    }
}

/// How a file changed in the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Renamed => write!(f, "renamed"),
        }
    }
}

/// One file's changes. Owns its hunks exclusively.
#[derive(Debug, Clone)]
pub struct FilePatch {
    /// Path in the new tree (old tree path for deletions).
    pub path: String,
    /// Previous path for renames.
    pub old_path: Option<String>,
    pub kind: ChangeKind,
    /// Binary files carry zero hunks and are excluded from token accounting
    /// beyond their one-line summary.
    pub binary: bool,
    pub hunks: Vec<Hunk>,
    /// Importance score, assigned by the scorer. Zero until scored.
    pub score: f64,
    /// Hard-excluded by a path rule; never enters the prompt.
    pub excluded: bool,
}

impl FilePatch {
    /// `(additions, deletions)` summed across hunks.
    pub fn change_counts(&self) -> (usize, usize) {
        self.hunks.iter().fold((0, 0), |(a, d), h| {
            let (ha, hd) = h.change_counts();
            (a + ha, d + hd)
        })
    }

    /// One-line summary: path, change kind, and add/del counts.
    pub fn summary_line(&self) -> String {
        let (adds, dels) = self.change_counts();
        let mut line = format!("## file: '{}' ({}, +{adds} -{dels})", self.path, self.kind);
        if let Some(ref old) = self.old_path {
            line.push_str(&format!(" [was '{old}']"));
        }
        if self.binary {
            line.push_str(" [binary]");
        }
        line
    }

    /// Average change density across hunks, weighted by hunk length.
    pub fn density(&self) -> f64 {
        let total: usize = self.hunks.iter().map(|h| h.lines.len()).sum();
        if total == 0 {
            return 0.0;
        }
        let changed: usize = self
            .hunks
            .iter()
            .map(|h| h.lines.iter().filter(|l| l.is_change()).count())
            .sum();
        changed as f64 / total as f64
    }

    /// Index of the highest-density hunk (the one the allocator must be able
    /// to afford for the file to be worth including at all). Ties go to the
    /// earlier hunk.
    pub fn best_hunk(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, h) in self.hunks.iter().enumerate() {
            let d = h.density();
            match best {
                Some((_, bd)) if d <= bd => {}
                _ => best = Some((i, d)),
            }
        }
        best.map(|(i, _)| i)
    }
}

/// The entire changeset, in diff order.
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    pub files: Vec<FilePatch>,
}

impl PatchSet {
    /// Indices of files sorted by descending score, ties broken by diff
    /// order (stable sort — required for reproducible prompts).
    pub fn by_score_desc(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.files.len()).collect();
        order.sort_by(|&a, &b| {
            self.files[b]
                .score
                .partial_cmp(&self.files[a].score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }

    /// Normalized anchors of every hunk in the set. Used by the suggestion
    /// tracker to detect suggestions whose underlying code has changed.
    pub fn anchors(&self) -> HashSet<String> {
        self.files
            .iter()
            .flat_map(|f| f.hunks.iter())
            .map(|h| h.anchor())
            .filter(|a| !a.is_empty())
            .collect()
    }
}
