//! Unified diff parser for patch files.
//!
//! Accepts git-style patches (`diff --git` headers with extended metadata)
//! as well as plain `---`/`+++` patches as written by `diff -u`.

use std::iter::Peekable;
use std::path::PathBuf;

use crate::error::{DebugFlowError, Result};
use crate::model::{Change, ChangeKind, FileDiff, Hunk};

/// Parse unified diff text into per-file hunks.
pub fn parse_unified_diff(diff_text: &str) -> Result<Vec<FileDiff>> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut lines = diff_text.lines().peekable();

    while let Some(line) = lines.peek().copied() {
        let git_header = if line.starts_with("diff ") {
            lines.next();
            Some(line)
        } else if line.starts_with("--- ") {
            None
        } else {
            lines.next();
            continue;
        };

        let (mut old_path, mut new_path, kind) = parse_file_header(&mut lines);
        if old_path.is_none()
            && new_path.is_none()
            && let Some((old, new)) = git_header.and_then(parse_git_header_paths)
        {
            old_path = Some(old);
            new_path = Some(new);
        }

        // "Binary files a/x and b/x differ" or "GIT binary patch"
        if lines.peek().is_some_and(|l| l.contains("Binary")) {
            lines.next();
            files.push(FileDiff {
                old_path,
                new_path,
                kind,
                hunks: Vec::new(),
                is_binary: true,
            });
            continue;
        }

        let mut hunks = Vec::new();
        while let Some(peek_line) = lines.peek() {
            if peek_line.starts_with("diff ") || peek_line.starts_with("--- ") {
                break;
            } else if peek_line.starts_with("@@") {
                hunks.push(parse_hunk(&mut lines)?);
            } else {
                lines.next(); // skip non-hunk, non-diff lines
            }
        }

        files.push(FileDiff {
            old_path,
            new_path,
            kind,
            hunks,
            is_binary: false,
        });
    }

    if files.is_empty() {
        return Err(DebugFlowError::NoChanges);
    }

    Ok(files)
}

fn parse_file_header<'a, I>(
    lines: &mut Peekable<I>,
) -> (Option<PathBuf>, Option<PathBuf>, ChangeKind)
where
    I: Iterator<Item = &'a str>,
{
    let mut old_path: Option<PathBuf> = None;
    let mut new_path: Option<PathBuf> = None;
    let mut kind = ChangeKind::Modify;

    while let Some(line) = lines.peek() {
        if let Some(path) = line.strip_prefix("--- ") {
            if let Some(path) = patch_path(path, "a/") {
                old_path = Some(path);
            }
            lines.next();
        } else if let Some(path) = line.strip_prefix("+++ ") {
            if let Some(path) = patch_path(path, "b/") {
                new_path = Some(path);
            }
            lines.next();
            break; // Done with file header
        } else if line.starts_with("new file") {
            kind = ChangeKind::Add;
            lines.next();
        } else if line.starts_with("deleted file") {
            kind = ChangeKind::Delete;
            lines.next();
        } else if let Some(path) = line.strip_prefix("rename from ") {
            kind = ChangeKind::Rename;
            old_path = Some(PathBuf::from(path));
            lines.next();
        } else if let Some(path) = line.strip_prefix("rename to ") {
            new_path = Some(PathBuf::from(path));
            lines.next();
        } else if let Some(path) = line.strip_prefix("copy from ") {
            kind = ChangeKind::Copy;
            old_path = Some(PathBuf::from(path));
            lines.next();
        } else if let Some(path) = line.strip_prefix("copy to ") {
            new_path = Some(PathBuf::from(path));
            lines.next();
        } else if line.starts_with("@@") || line.starts_with("diff ") {
            break;
        } else if line.starts_with("Binary files") {
            if let Some((old, new)) = parse_binary_file_line(line) {
                if old_path.is_none() {
                    old_path = old;
                }
                if new_path.is_none() {
                    new_path = new;
                }
                if kind == ChangeKind::Modify {
                    kind = kind_from_paths(old_path.is_some(), new_path.is_some());
                }
            }
            break;
        } else {
            lines.next(); // index, mode and similarity lines
        }
    }

    // /dev/null on either side
    if kind == ChangeKind::Modify {
        kind = kind_from_paths(old_path.is_some(), new_path.is_some());
    }

    (old_path, new_path, kind)
}

fn kind_from_paths(has_old: bool, has_new: bool) -> ChangeKind {
    match (has_old, has_new) {
        (false, true) => ChangeKind::Add,
        (true, false) => ChangeKind::Delete,
        _ => ChangeKind::Modify,
    }
}

/// Path from a `---`/`+++` line: strips the `a/`/`b/` prefix and a trailing
/// timestamp, `None` for `/dev/null`.
fn patch_path(raw: &str, prefix: &str) -> Option<PathBuf> {
    let path = raw.split('\t').next().unwrap_or(raw).trim_end();
    if path == "/dev/null" {
        return None;
    }
    Some(PathBuf::from(path.strip_prefix(prefix).unwrap_or(path)))
}

/// Paths from `diff --git a/<old> b/<new>`, for entries without `---`/`+++`.
fn parse_git_header_paths(line: &str) -> Option<(PathBuf, PathBuf)> {
    let rest = line.strip_prefix("diff --git ")?;
    let (old, new) = rest.split_once(" b/")?;
    let old = old.strip_prefix("a/").unwrap_or(old);
    Some((PathBuf::from(old), PathBuf::from(new)))
}

fn parse_hunk<'a, I>(lines: &mut Peekable<I>) -> Result<Hunk>
where
    I: Iterator<Item = &'a str>,
{
    let header_line = lines
        .next()
        .ok_or_else(|| DebugFlowError::InvalidPatch("missing hunk header".to_string()))?;

    // Parse @@ -old_start,old_lines +new_start,new_lines @@
    let (old_start, old_lines, new_start, new_lines) = parse_hunk_header(header_line)
        .ok_or_else(|| DebugFlowError::InvalidPatch(format!("bad hunk header {header_line:?}")))?;

    let mut old_remaining = old_lines;
    let mut new_remaining = new_lines;
    let mut changes = Vec::new();

    while old_remaining > 0 || new_remaining > 0 {
        let Some(line) = lines.peek().copied() else {
            break;
        };
        if line.starts_with("@@") || line.starts_with("diff ") {
            log::warn!("Hunk {header_line} ended early");
            break;
        }
        lines.next();

        if line.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        }

        let change = if let Some(content) = line.strip_prefix('+') {
            new_remaining = new_remaining.saturating_sub(1);
            Change::insert(content)
        } else if let Some(content) = line.strip_prefix('-') {
            old_remaining = old_remaining.saturating_sub(1);
            Change::delete(content)
        } else {
            // Context; some tools drop the space of empty context lines
            let content = line.strip_prefix(' ').unwrap_or(line);
            old_remaining = old_remaining.saturating_sub(1);
            new_remaining = new_remaining.saturating_sub(1);
            Change::normal(content)
        };
        changes.push(change);
    }

    if lines.peek().is_some_and(|l| l.starts_with('\\')) {
        lines.next();
    }

    Ok(Hunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        changes,
    })
}

fn parse_hunk_header(line: &str) -> Option<(u32, u32, u32, u32)> {
    // Format: @@ -old_start,old_lines +new_start,new_lines @@
    // or: @@ -old_start +new_start @@ (count defaults to 1)

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 || parts[0] != "@@" {
        return None;
    }

    let old_part = parts[1].strip_prefix('-')?;
    let new_part = parts[2].strip_prefix('+')?;

    let (old_start, old_lines) = parse_range(old_part);
    let (new_start, new_lines) = parse_range(new_part);

    Some((old_start, old_lines, new_start, new_lines))
}

fn parse_range(s: &str) -> (u32, u32) {
    if let Some((start, count)) = s.split_once(',') {
        (start.parse().unwrap_or(1), count.parse().unwrap_or(1))
    } else {
        (s.parse().unwrap_or(1), 1)
    }
}

/// Parse paths from "Binary files a/<old> and b/<new> differ".
/// Either side is `None` for /dev/null.
fn parse_binary_file_line(line: &str) -> Option<(Option<PathBuf>, Option<PathBuf>)> {
    let content = line.strip_prefix("Binary files ")?;
    let content = content.strip_suffix(" differ")?;
    let (old_part, new_part) = content.split_once(" and ")?;

    Some((patch_path(old_part, "a/"), patch_path(new_part, "b/")))
}
