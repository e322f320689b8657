use git2::{Repository, Status, StatusEntry, StatusOptions};

use crate::error::Result;
use crate::model::{ChangeKind, PathEntry};

/// Changed paths of the working tree and index, sorted by path.
///
/// Untracked files are included, ignored ones are not.
pub fn changed_paths(repo: &Repository) -> Result<Vec<PathEntry>> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false)
        .renames_head_to_index(true)
        .renames_index_to_workdir(true);

    let statuses = repo.statuses(Some(&mut opts))?;

    let mut entries = Vec::new();
    for entry in statuses.iter() {
        let Some(path) = entry_path(&entry) else {
            log::warn!("Skipping status entry with a non UTF-8 path");
            continue;
        };
        entries.push(PathEntry::new(path, change_kind(entry.status())));
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(entries)
}

/// Current path of an entry; renames report their destination.
fn entry_path(entry: &StatusEntry<'_>) -> Option<String> {
    let renamed_to = entry
        .index_to_workdir()
        .filter(|_| entry.status().is_wt_renamed())
        .or_else(|| {
            entry
                .head_to_index()
                .filter(|_| entry.status().is_index_renamed())
        })
        .and_then(|delta| delta.new_file().path().map(|p| p.to_string_lossy().replace('\\', "/")));

    renamed_to.or_else(|| entry.path().map(str::to_string))
}

fn change_kind(status: Status) -> ChangeKind {
    if status.is_conflicted() {
        ChangeKind::Unknown
    } else if status.intersects(Status::INDEX_RENAMED | Status::WT_RENAMED) {
        ChangeKind::Rename
    } else if status.intersects(Status::INDEX_NEW | Status::WT_NEW) {
        ChangeKind::Add
    } else if status.intersects(Status::INDEX_DELETED | Status::WT_DELETED) {
        ChangeKind::Delete
    } else if status.intersects(
        Status::INDEX_MODIFIED
            | Status::WT_MODIFIED
            | Status::INDEX_TYPECHANGE
            | Status::WT_TYPECHANGE,
    ) {
        ChangeKind::Modify
    } else {
        ChangeKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::vcs::git::fixtures::{commit_all, numbered_lines, write};

    #[test]
    fn should_map_statuses_to_change_kinds() {
        // given
        let dir = tempdir().expect("failed to create temp dir");
        let root = dir.path();
        let repo = Repository::init(root).expect("failed to init repo");
        write(root, ".gitignore", "*.log\n");
        write(root, "a.txt", &numbered_lines(3));
        write(root, "b.txt", &numbered_lines(4));
        write(root, "c.txt", &numbered_lines(30));
        commit_all(&repo, "initial");

        // when
        write(root, "a.txt", "changed\n");
        fs::remove_file(root.join("b.txt")).expect("failed to delete");
        write(root, "nested/d.txt", "new\n");
        write(root, "debug.log", "ignored\n");
        fs::rename(root.join("c.txt"), root.join("e.txt")).expect("failed to rename");
        let mut index = repo.index().expect("failed to open index");
        index.remove_path(Path::new("c.txt")).expect("failed to unstage");
        index.add_path(Path::new("e.txt")).expect("failed to stage");
        index.write().expect("failed to write index");

        let entries = changed_paths(&repo).expect("status should succeed");

        // then
        assert_eq!(
            entries,
            vec![
                PathEntry::new("a.txt", ChangeKind::Modify),
                PathEntry::new("b.txt", ChangeKind::Delete),
                PathEntry::new("e.txt", ChangeKind::Rename),
                PathEntry::new("nested/d.txt", ChangeKind::Add),
            ]
        );
    }

    #[test]
    fn should_report_nothing_for_clean_tree() {
        let dir = tempdir().expect("failed to create temp dir");
        let repo = Repository::init(dir.path()).expect("failed to init repo");
        write(dir.path(), "a.txt", "a\n");
        commit_all(&repo, "initial");

        assert!(changed_paths(&repo).expect("status should succeed").is_empty());
    }

    #[test]
    fn should_prefer_conflicts_over_other_flags() {
        assert_eq!(
            change_kind(Status::CONFLICTED | Status::WT_MODIFIED),
            ChangeKind::Unknown
        );
        assert_eq!(change_kind(Status::WT_TYPECHANGE), ChangeKind::Modify);
        assert_eq!(
            change_kind(Status::INDEX_NEW | Status::WT_MODIFIED),
            ChangeKind::Add
        );
    }
}
