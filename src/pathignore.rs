use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::model::PathEntry;

pub const IGNORE_FILE: &str = ".debugflowignore";

/// Drop entries matched by `.debugflowignore` rules in `root`.
///
/// Without an ignore file every entry is kept.
pub fn filter_entries(root: &Path, entries: Vec<PathEntry>) -> Vec<PathEntry> {
    let Some(matcher) = load_matcher(root) else {
        return entries;
    };

    let before = entries.len();
    let kept: Vec<PathEntry> = entries
        .into_iter()
        .filter(|entry| {
            !matcher
                .matched_path_or_any_parents(Path::new(&entry.name), false)
                .is_ignore()
        })
        .collect();
    if kept.len() < before {
        log::debug!(
            "{IGNORE_FILE} hid {} of {before} changed paths",
            before - kept.len()
        );
    }
    kept
}

fn load_matcher(root: &Path) -> Option<Gitignore> {
    let ignore_file = root.join(IGNORE_FILE);
    if !ignore_file.is_file() {
        return None;
    }

    let mut builder = GitignoreBuilder::new(root);
    // Malformed patterns are skipped, valid ones still apply
    if let Some(err) = builder.add(&ignore_file) {
        log::warn!("Partially invalid {}: {err}", ignore_file.display());
    }
    match builder.build() {
        Ok(matcher) => Some(matcher),
        Err(err) => {
            log::warn!("Ignoring {}: {err}", ignore_file.display());
            None
        }
    }
}
