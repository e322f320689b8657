pub mod context;
pub mod diff;
pub mod status;

use git2::{ErrorCode, Repository, Tree};
use std::path::{Path, PathBuf};

use crate::error::{DebugFlowError, Result};
use crate::model::{FileDiff, PathEntry};

/// Changed paths, diffs and old file contents of a git working tree.
pub struct GitSource {
    repo: Repository,
    root: PathBuf,
}

impl GitSource {
    /// Open the repository containing `path`.
    pub fn discover(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path).map_err(|_| DebugFlowError::NotARepository)?;

        let root = repo
            .workdir()
            .ok_or(DebugFlowError::NotARepository)?
            .to_path_buf();
        log::debug!("Using git repository at {}", root.display());

        Ok(Self { repo, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working tree and index changes against HEAD, untracked files included.
    pub fn changed_paths(&self) -> Result<Vec<PathEntry>> {
        status::changed_paths(&self.repo)
    }

    /// HEAD to working tree diff of one file.
    pub fn file_diff(&self, path: &Path) -> Result<FileDiff> {
        diff::file_diff(&self.repo, &self.repo_relative(path))
    }

    /// Content of `path` at HEAD, `None` when HEAD does not have it.
    pub fn old_source(&self, path: &Path) -> Result<Option<String>> {
        context::old_source(&self.repo, &self.repo_relative(path))
    }

    fn repo_relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// HEAD's tree, `None` on a branch without commits.
pub(crate) fn head_tree(repo: &Repository) -> Result<Option<Tree<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_tree()?)),
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}
