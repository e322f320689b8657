use git2::{Delta, Diff, DiffOptions, Repository};
use std::path::{Path, PathBuf};

use super::head_tree;
use crate::error::{DebugFlowError, Result};
use crate::model::{Change, ChangeKind, FileDiff, Hunk};

/// Diff of one repository-relative path between HEAD and the working tree.
pub fn file_diff(repo: &Repository, path: &Path) -> Result<FileDiff> {
    let head = head_tree(repo)?;

    let mut opts = DiffOptions::new();
    opts.include_untracked(true);
    opts.show_untracked_content(true);
    opts.recurse_untracked_dirs(true);
    opts.disable_pathspec_match(true);
    opts.pathspec(path);

    let diff = repo.diff_tree_to_workdir_with_index(head.as_ref(), Some(&mut opts))?;

    match parse_diff(&diff) {
        Ok(files) => files
            .into_iter()
            .next()
            .ok_or_else(|| DebugFlowError::FileNotFound(path.to_path_buf())),
        Err(DebugFlowError::NoChanges) => Err(DebugFlowError::FileNotFound(path.to_path_buf())),
        Err(err) => Err(err),
    }
}

fn parse_diff(diff: &Diff) -> Result<Vec<FileDiff>> {
    let mut files: Vec<FileDiff> = Vec::new();

    for (delta_idx, delta) in diff.deltas().enumerate() {
        let kind = match delta.status() {
            Delta::Added | Delta::Untracked => ChangeKind::Add,
            Delta::Deleted => ChangeKind::Delete,
            Delta::Modified | Delta::Typechange => ChangeKind::Modify,
            Delta::Renamed => ChangeKind::Rename,
            Delta::Copied => ChangeKind::Copy,
            _ => ChangeKind::Unknown,
        };

        let old_path = delta.old_file().path().map(PathBuf::from);
        let new_path = delta.new_file().path().map(PathBuf::from);
        let is_binary = delta.old_file().is_binary() || delta.new_file().is_binary();

        let hunks = if is_binary {
            Vec::new()
        } else {
            parse_hunks(diff, delta_idx)?
        };

        files.push(FileDiff {
            old_path: (kind != ChangeKind::Add).then_some(old_path).flatten(),
            new_path: (kind != ChangeKind::Delete).then_some(new_path).flatten(),
            kind,
            hunks,
            is_binary,
        });
    }

    if files.is_empty() {
        return Err(DebugFlowError::NoChanges);
    }

    Ok(files)
}

fn parse_hunks(diff: &Diff, delta_idx: usize) -> Result<Vec<Hunk>> {
    let mut hunks: Vec<Hunk> = Vec::new();

    let Some(patch) = git2::Patch::from_diff(diff, delta_idx)? else {
        return Ok(hunks);
    };

    for hunk_idx in 0..patch.num_hunks() {
        let (hunk, _) = patch.hunk(hunk_idx)?;

        let mut changes = Vec::new();
        for line_idx in 0..patch.num_lines_in_hunk(hunk_idx)? {
            let line = patch.line_in_hunk(hunk_idx, line_idx)?;

            let content = String::from_utf8_lossy(line.content());
            let content = content.trim_end_matches('\n').trim_end_matches('\r');
            let change = match line.origin() {
                '+' => Change::insert(content),
                '-' => Change::delete(content),
                ' ' => Change::normal(content),
                // end-of-file newline markers
                _ => continue,
            };
            changes.push(change);
        }

        hunks.push(Hunk {
            old_start: hunk.old_start(),
            old_lines: hunk.old_lines(),
            new_start: hunk.new_start(),
            new_lines: hunk.new_lines(),
            changes,
        });
    }

    Ok(hunks)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::vcs::git::fixtures::{commit_all, numbered_lines, write};

    #[test]
    fn should_diff_single_modified_file() {
        // given
        let dir = tempdir().expect("failed to create temp dir");
        let repo = Repository::init(dir.path()).expect("failed to init repo");
        write(dir.path(), "a.txt", &numbered_lines(20));
        write(dir.path(), "b.txt", "untouched\n");
        commit_all(&repo, "initial");
        write(
            dir.path(),
            "a.txt",
            &numbered_lines(20).replace("line 5\n", "LINE 5\n"),
        );
        write(dir.path(), "b.txt", "touched\n");

        // when
        let file = file_diff(&repo, Path::new("a.txt")).expect("diff should succeed");

        // then
        assert_eq!(file.kind, ChangeKind::Modify);
        assert_eq!(file.new_path, Some(PathBuf::from("a.txt")));
        assert_eq!(file.hunks.len(), 1);
        let hunk = &file.hunks[0];
        assert_eq!((hunk.old_start, hunk.old_lines), (2, 7));
        assert!(hunk.changes.contains(&Change::delete("line 5")));
        assert!(hunk.changes.contains(&Change::insert("LINE 5")));
    }

    #[test]
    fn should_diff_untracked_file_as_addition() {
        let dir = tempdir().expect("failed to create temp dir");
        let repo = Repository::init(dir.path()).expect("failed to init repo");
        write(dir.path(), "a.txt", "a\n");
        commit_all(&repo, "initial");
        write(dir.path(), "new.txt", "one\ntwo\n");

        let file = file_diff(&repo, Path::new("new.txt")).expect("diff should succeed");

        assert_eq!(file.kind, ChangeKind::Add);
        assert!(file.old_path.is_none());
        assert_eq!(
            file.hunks[0].changes,
            vec![Change::insert("one"), Change::insert("two")]
        );
    }

    #[test]
    fn should_report_unchanged_file_as_not_found() {
        let dir = tempdir().expect("failed to create temp dir");
        let repo = Repository::init(dir.path()).expect("failed to init repo");
        write(dir.path(), "a.txt", "a\n");
        commit_all(&repo, "initial");

        let result = file_diff(&repo, Path::new("a.txt"));

        assert!(matches!(result, Err(DebugFlowError::FileNotFound(_))));
    }
}
