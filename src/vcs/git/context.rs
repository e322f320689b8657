use git2::{ErrorCode, Repository};
use std::path::Path;

use super::head_tree;
use crate::error::Result;

/// Content of a repository-relative path at HEAD.
///
/// Returns `None` for paths HEAD does not contain (new files, unborn
/// branches) and for binary blobs. Invalid UTF-8 is replaced.
pub fn old_source(repo: &Repository, file_path: &Path) -> Result<Option<String>> {
    let Some(head) = head_tree(repo)? else {
        return Ok(None);
    };

    let entry = match head.get_path(file_path) {
        Ok(entry) => entry,
        Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let blob = repo.find_blob(entry.id())?;
    if blob.is_binary() {
        log::debug!("{} is binary at HEAD", file_path.display());
        return Ok(None);
    }

    Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
}
