use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebugFlowError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Event stream ended")]
    StreamEnded,

    #[error("Not a repository")]
    NotARepository,

    #[error("No changes to show")]
    NoChanges,

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("File not found in diff: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl From<ureq::Error> for DebugFlowError {
    fn from(err: ureq::Error) -> Self {
        DebugFlowError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DebugFlowError>;
