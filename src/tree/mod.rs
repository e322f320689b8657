//! Hierarchical grouping of changed paths.
//!
//! [`build_tree`] turns a flat list of [`PathEntry`] values into nested
//! directories, and [`optimize`] collapses chains of directories that only
//! contain a single sub-directory into one compound key (`"foo/bar"`).

pub mod display;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ChangeKind, PathEntry};

/// A file directly contained in a [`FileTree`] directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeFile {
    /// Last path segment
    pub name: String,
    pub kind: ChangeKind,
}

impl TreeFile {
    pub fn new(name: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A directory node. The root is a `FileTree` as well.
///
/// Children are kept in a sorted map so iteration yields a stable display
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTree {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, FileTree>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<TreeFile>,
}

impl FileTree {
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.files.is_empty()
    }

    /// A directory with exactly one sub-directory and no files of its own.
    fn is_pass_through(&self) -> bool {
        self.children.len() == 1 && self.files.is_empty()
    }

    /// Full paths of every file reachable from this node.
    pub fn file_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths("", &mut paths);
        paths
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (key, child) in &self.children {
            child.collect_paths(&join_path(prefix, key), out);
        }
        for file in &self.files {
            out.push(join_path(prefix, &file.name));
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
            + self
                .children
                .values()
                .map(FileTree::file_count)
                .sum::<usize>()
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Group a flat list of paths into a directory tree.
///
/// Empty segments are discarded, so leading, trailing and doubled slashes
/// are tolerated. Entries without any segment are skipped. Duplicate paths
/// are all kept.
pub fn build_tree<'a, I>(entries: I) -> FileTree
where
    I: IntoIterator<Item = &'a PathEntry>,
{
    let mut root = FileTree::default();

    for entry in entries {
        let segments: Vec<&str> = entry.name.split('/').filter(|s| !s.is_empty()).collect();
        let Some((file_name, dirs)) = segments.split_last() else {
            log::debug!("Skipping path entry without segments: {:?}", entry.name);
            continue;
        };

        let mut current = &mut root;
        for dir in dirs {
            current = current.children.entry((*dir).to_string()).or_default();
        }
        current.files.push(TreeFile::new(*file_name, entry.kind));
    }

    root
}

/// Collapse pass-through directories into compound keys.
///
/// Returns a new tree; the input is left untouched. Applying it twice yields
/// the same tree as applying it once.
pub fn optimize(tree: &FileTree) -> FileTree {
    let mut children = BTreeMap::new();

    for (key, child) in &tree.children {
        let mut child = optimize(child);

        if child.is_pass_through() {
            // Exactly one entry, checked above
            if let Some((nested_key, nested)) = child.children.pop_first() {
                children.insert(format!("{key}/{nested_key}"), nested);
                continue;
            }
        }
        children.insert(key.clone(), child);
    }

    FileTree {
        children,
        files: tree.files.clone(),
    }
}

/// Keep the entries whose path contains `needle`, ignoring case.
pub fn filter_entries(entries: &[PathEntry], needle: &str) -> Vec<PathEntry> {
    let needle = needle.to_lowercase();
    if needle.is_empty() {
        return entries.to_vec();
    }

    entries
        .iter()
        .filter(|entry| entry.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}
