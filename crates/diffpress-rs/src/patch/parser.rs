//! Unified-diff parser.
//!
//! Parsing is all-or-nothing: any malformed section fails the whole parse
//! with a [`MalformedDiffError`] and no partial [`PatchSet`] is returned.
//! Mixed line endings are tolerated (trailing `\r` is stripped before any
//! matching); binary files become zero-hunk entries flagged `binary`.

use super::{ChangeKind, DiffLine, FilePatch, Hunk, LineKind, PatchSet};
use thiserror::Error;
use tracing::debug;

/// Errors from diff parsing. Always fatal for the whole parse.
#[derive(Debug, Error)]
pub enum MalformedDiffError {
    #[error("empty diff input")]
    Empty,

    #[error("line {line}: expected a file header, found {found:?}")]
    ExpectedFileHeader { line: usize, found: String },

    #[error("file '{path}': section has no hunks and no binary or rename marker")]
    MissingHunks { path: String },

    #[error("line {line}: malformed hunk header {header:?}")]
    BadHunkHeader { line: usize, header: String },

    #[error(
        "file '{path}', hunk at line {line}: header declares -{expected_old}/+{expected_new} \
         lines but body has -{actual_old}/+{actual_new}"
    )]
    CountMismatch {
        path: String,
        line: usize,
        expected_old: u32,
        expected_new: u32,
        actual_old: u32,
        actual_new: u32,
    },

    #[error("line {line}: unexpected content outside any hunk: {found:?}")]
    UnexpectedLine { line: usize, found: String },
}

/// Parse raw unified-diff text into a [`PatchSet`].
///
/// Accepts both `git diff` output (with `diff --git` headers, rename and
/// mode lines, binary markers) and plain unified diffs that start directly
/// at `--- a/...`.
pub fn parse(raw: &str) -> Result<PatchSet, MalformedDiffError> {
    // Mixed line endings: strip one trailing '\r' per line.
    let lines: Vec<&str> = raw.lines().map(|l| l.strip_suffix('\r').unwrap_or(l)).collect();

    if lines.iter().all(|l| l.trim().is_empty()) {
        return Err(MalformedDiffError::Empty);
    }

    let mut files = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
            continue;
        }
        if line.starts_with("diff --git ") || line.starts_with("--- ") {
            let (file, next) = parse_file_section(&lines, i)?;
            files.push(file);
            i = next;
        } else {
            return Err(MalformedDiffError::ExpectedFileHeader {
                line: i + 1,
                found: truncate(line),
            });
        }
    }

    if files.is_empty() {
        return Err(MalformedDiffError::Empty);
    }

    debug!(
        "parsed diff: {} file(s), {} hunk(s)",
        files.len(),
        files.iter().map(|f| f.hunks.len()).sum::<usize>(),
    );
    Ok(PatchSet { files })
}

/// Parse one file section starting at `start`. Returns the patch and the
/// index of the first line after the section.
fn parse_file_section(
    lines: &[&str],
    start: usize,
) -> Result<(FilePatch, usize), MalformedDiffError> {
    let mut i = start;
    let mut git_path: Option<String> = None;
    let mut old_path: Option<String> = None;
    let mut new_path: Option<String> = None;
    let mut rename_from: Option<String> = None;
    let mut rename_to: Option<String> = None;
    let mut kind = ChangeKind::Modified;
    let mut binary = false;
    let mut saw_marker = false;

    if let Some(rest) = lines[i].strip_prefix("diff --git ") {
        git_path = git_header_path(rest);
        i += 1;
    }

    // File-level header lines before the first hunk.
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("@@ ") || line.starts_with("diff --git ") {
            break;
        }
        if let Some(p) = line.strip_prefix("--- ") {
            old_path = marker_path(p);
            i += 1;
        } else if let Some(p) = line.strip_prefix("+++ ") {
            new_path = marker_path(p);
            i += 1;
        } else if let Some(p) = line.strip_prefix("rename from ") {
            rename_from = Some(p.to_string());
            kind = ChangeKind::Renamed;
            saw_marker = true;
            i += 1;
        } else if let Some(p) = line.strip_prefix("rename to ") {
            rename_to = Some(p.to_string());
            kind = ChangeKind::Renamed;
            saw_marker = true;
            i += 1;
        } else if line.starts_with("new file mode") {
            kind = ChangeKind::Added;
            i += 1;
        } else if line.starts_with("deleted file mode") {
            kind = ChangeKind::Deleted;
            i += 1;
        } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
            binary = true;
            saw_marker = true;
            i += 1;
        } else if line.starts_with("index ")
            || line.starts_with("old mode")
            || line.starts_with("new mode")
            || line.starts_with("similarity index")
            || line.starts_with("dissimilarity index")
        {
            // Metadata we don't model; mode-only changes still count as a
            // complete section.
            if line.starts_with("old mode") || line.starts_with("new mode") {
                saw_marker = true;
            }
            i += 1;
        } else if line.trim().is_empty() {
            i += 1;
        } else {
            return Err(MalformedDiffError::UnexpectedLine {
                line: i + 1,
                found: truncate(line),
            });
        }
    }

    // Hunks.
    let mut hunks = Vec::new();
    while i < lines.len() && lines[i].starts_with("@@ ") {
        let (hunk, next) = parse_hunk(lines, i, path_label(&new_path, &old_path, &git_path))?;
        hunks.push(hunk);
        i = next;
    }

    let path = resolve_path(&new_path, &old_path, &rename_to, &git_path, kind).ok_or(
        MalformedDiffError::ExpectedFileHeader {
            line: start + 1,
            found: truncate(lines[start]),
        },
    )?;

    if hunks.is_empty() && !binary && !saw_marker {
        return Err(MalformedDiffError::MissingHunks { path });
    }

    let old = rename_from.or_else(|| {
        old_path
            .as_ref()
            .filter(|o| kind == ChangeKind::Renamed && **o != path)
            .cloned()
    });

    Ok((
        FilePatch {
            path,
            old_path: old,
            kind,
            binary,
            hunks,
            score: 0.0,
            excluded: false,
        },
        i,
    ))
}

/// Parse one hunk starting at its `@@` header. Validates that the declared
/// line counts agree with the body.
fn parse_hunk(
    lines: &[&str],
    start: usize,
    path: String,
) -> Result<(Hunk, usize), MalformedDiffError> {
    let header = lines[start];
    let (old_start, old_lines, new_start, new_lines, section) =
        parse_hunk_header(header).ok_or(MalformedDiffError::BadHunkHeader {
            line: start + 1,
            header: truncate(header),
        })?;

    let mut body = Vec::new();
    let mut actual_old = 0u32;
    let mut actual_new = 0u32;
    let mut i = start + 1;

    while i < lines.len() {
        let line = lines[i];
        let (kind, content) = match line.as_bytes().first() {
            Some(b' ') => (LineKind::Context, &line[1..]),
            Some(b'+') if !line.starts_with("+++ ") => (LineKind::Add, &line[1..]),
            Some(b'-') if !line.starts_with("--- ") => (LineKind::Del, &line[1..]),
            // "\ No newline at end of file" — informational, not counted.
            Some(b'\\') => {
                i += 1;
                continue;
            }
            // Some producers emit completely empty lines for empty context.
            None => (LineKind::Context, ""),
            _ => break,
        };
        // Stop at the next hunk or file; prefix-matched lines above already
        // excluded "---"/"+++" headers.
        if actual_old >= old_lines && actual_new >= new_lines {
            break;
        }
        match kind {
            LineKind::Add => actual_new += 1,
            LineKind::Del => actual_old += 1,
            LineKind::Context => {
                actual_old += 1;
                actual_new += 1;
            }
        }
        body.push(DiffLine {
            kind,
            content: content.to_string(),
        });
        i += 1;
    }

    if actual_old != old_lines || actual_new != new_lines {
        return Err(MalformedDiffError::CountMismatch {
            path,
            line: start + 1,
            expected_old: old_lines,
            expected_new: new_lines,
            actual_old,
            actual_new,
        });
    }

    Ok((
        Hunk {
            old_start,
            old_lines,
            new_start,
            new_lines,
            section,
            lines: body,
        },
        i,
    ))
}

/// Parse `@@ -a[,b] +c[,d] @@ [section]`. Missing counts default to 1.
fn parse_hunk_header(header: &str) -> Option<(u32, u32, u32, u32, String)> {
    let rest = header.strip_prefix("@@ -")?;
    let (old_part, rest) = rest.split_once(" +")?;
    let (new_part, section) = rest.split_once(" @@")?;
    let (old_start, old_lines) = parse_range(old_part)?;
    let (new_start, new_lines) = parse_range(new_part)?;
    Some((
        old_start,
        old_lines,
        new_start,
        new_lines,
        section.trim().to_string(),
    ))
}

fn parse_range(part: &str) -> Option<(u32, u32)> {
    match part.split_once(',') {
        Some((s, c)) => Some((s.parse().ok()?, c.parse().ok()?)),
        None => Some((part.parse().ok()?, 1)),
    }
}

/// Extract the b-side path from a `diff --git a/x b/y` remainder.
fn git_header_path(rest: &str) -> Option<String> {
    let b = rest.split(" b/").nth(1)?;
    Some(b.to_string())
}

/// Path from a `---`/`+++` marker, with the `a/`/`b/` prefix stripped.
/// `/dev/null` maps to `None`.
fn marker_path(p: &str) -> Option<String> {
    let p = p.split('\t').next().unwrap_or(p).trim();
    if p == "/dev/null" {
        return None;
    }
    let p = p
        .strip_prefix("a/")
        .or_else(|| p.strip_prefix("b/"))
        .unwrap_or(p);
    Some(p.to_string())
}

fn resolve_path(
    new_path: &Option<String>,
    old_path: &Option<String>,
    rename_to: &Option<String>,
    git_path: &Option<String>,
    kind: ChangeKind,
) -> Option<String> {
    if kind == ChangeKind::Deleted {
        return old_path.clone().or_else(|| git_path.clone());
    }
    new_path
        .clone()
        .or_else(|| rename_to.clone())
        .or_else(|| git_path.clone())
        .or_else(|| old_path.clone())
}

fn path_label(
    new_path: &Option<String>,
    old_path: &Option<String>,
    git_path: &Option<String>,
) -> String {
    new_path
        .clone()
        .or_else(|| old_path.clone())
        .or_else(|| git_path.clone())
        .unwrap_or_else(|| "(unknown)".to_string())
}

fn truncate(line: &str) -> String {
    const MAX: usize = 80;
    if line.len() > MAX {
        format!("{}...", line.chars().take(MAX).collect::<String>())
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
diff --git a/src/main.rs b/src/main.rs
index 1111111..2222222 100644
--- a/src/main.rs
+++ b/src/main.rs
@@ -1,3 +1,4 @@
 fn main() {
-    old();
+    new();
+    extra();
 }
";

    #[test]
    fn parses_single_file() {
        let set = parse(SIMPLE).unwrap();
        assert_eq!(set.files.len(), 1);
        let f = &set.files[0];
        assert_eq!(f.path, "src/main.rs");
        assert_eq!(f.kind, ChangeKind::Modified);
        assert_eq!(f.hunks.len(), 1);
        assert_eq!(f.change_counts(), (2, 1));
    }

    #[test]
    fn parses_crlf_line_endings() {
        let crlf = SIMPLE.replace('\n', "\r\n");
        let set = parse(&crlf).unwrap();
        assert_eq!(set.files[0].hunks[0].lines[0].content, "fn main() {");
    }

    #[test]
    fn parses_plain_unified_diff_without_git_header() {
        let raw = "\
--- a/lib.py
+++ b/lib.py
@@ -5,2 +5,2 @@ def f():
 x = 1
-y = 2
+y = 3
";
        let set = parse(raw).unwrap();
        assert_eq!(set.files[0].path, "lib.py");
        assert_eq!(set.files[0].hunks[0].section, "def f():");
    }

    #[test]
    fn binary_file_becomes_zero_hunk_entry() {
        let raw = "\
diff --git a/logo.png b/logo.png
index 1111111..2222222 100644
Binary files a/logo.png and b/logo.png differ
";
        let set = parse(raw).unwrap();
        let f = &set.files[0];
        assert!(f.binary);
        assert!(f.hunks.is_empty());
        assert_eq!(f.path, "logo.png");
    }

    #[test]
    fn new_and_deleted_files() {
        let raw = "\
diff --git a/new.rs b/new.rs
new file mode 100644
--- /dev/null
+++ b/new.rs
@@ -0,0 +1,1 @@
+fn fresh() {}
diff --git a/gone.rs b/gone.rs
deleted file mode 100644
--- a/gone.rs
+++ /dev/null
@@ -1,1 +0,0 @@
-fn stale() {}
";
        let set = parse(raw).unwrap();
        assert_eq!(set.files[0].kind, ChangeKind::Added);
        assert_eq!(set.files[0].path, "new.rs");
        assert_eq!(set.files[1].kind, ChangeKind::Deleted);
        assert_eq!(set.files[1].path, "gone.rs");
    }

    #[test]
    fn rename_with_hunk() {
        let raw = "\
diff --git a/old_name.rs b/new_name.rs
similarity index 95%
rename from old_name.rs
rename to new_name.rs
--- a/old_name.rs
+++ b/new_name.rs
@@ -1,1 +1,1 @@
-fn a() {}
+fn b() {}
";
        let set = parse(raw).unwrap();
        let f = &set.files[0];
        assert_eq!(f.kind, ChangeKind::Renamed);
        assert_eq!(f.path, "new_name.rs");
        assert_eq!(f.old_path.as_deref(), Some("old_name.rs"));
    }

    #[test]
    fn pure_rename_without_hunks() {
        let raw = "\
diff --git a/a.rs b/b.rs
similarity index 100%
rename from a.rs
rename to b.rs
";
        let set = parse(raw).unwrap();
        assert!(set.files[0].hunks.is_empty());
        assert_eq!(set.files[0].kind, ChangeKind::Renamed);
    }

    #[test]
    fn count_mismatch_is_fatal() {
        let raw = "\
--- a/x.rs
+++ b/x.rs
@@ -1,5 +1,5 @@
 only
-two
+three
";
        let err = parse(raw).unwrap_err();
        assert!(matches!(err, MalformedDiffError::CountMismatch { .. }));
    }

    #[test]
    fn bad_hunk_header_is_fatal() {
        let raw = "\
--- a/x.rs
+++ b/x.rs
@@ bogus @@
 a
";
        let err = parse(raw).unwrap_err();
        assert!(matches!(err, MalformedDiffError::UnexpectedLine { .. } | MalformedDiffError::BadHunkHeader { .. }));
    }

    #[test]
    fn section_without_hunks_or_markers_is_fatal() {
        let raw = "\
diff --git a/x.rs b/x.rs
index 1111111..2222222 100644
";
        let err = parse(raw).unwrap_err();
        assert!(matches!(err, MalformedDiffError::MissingHunks { .. }));
    }

    #[test]
    fn empty_input_is_fatal() {
        assert!(matches!(parse(""), Err(MalformedDiffError::Empty)));
        assert!(matches!(parse("  \n \n"), Err(MalformedDiffError::Empty)));
    }

    #[test]
    fn garbage_preamble_is_fatal() {
        let raw = format!("commit 123abc\n{SIMPLE}");
        assert!(matches!(
            parse(&raw),
            Err(MalformedDiffError::ExpectedFileHeader { line: 1, .. })
        ));
    }

    #[test]
    fn no_newline_marker_ignored_in_counts() {
        let raw = "\
--- a/x.txt
+++ b/x.txt
@@ -1,1 +1,1 @@
-old
\\ No newline at end of file
+new
\\ No newline at end of file
";
        let set = parse(raw).unwrap();
        assert_eq!(set.files[0].hunks[0].lines.len(), 2);
    }

    #[test]
    fn multiple_hunks_per_file() {
        let raw = "\
--- a/x.rs
+++ b/x.rs
@@ -1,2 +1,2 @@
 a
-b
+B
@@ -10,2 +10,2 @@
 c
-d
+D
";
        let set = parse(raw).unwrap();
        assert_eq!(set.files[0].hunks.len(), 2);
        assert_eq!(set.files[0].hunks[1].old_start, 10);
    }
}
