//! Where changed paths and hunks come from: a git working tree or a patch
//! file.

pub mod diff_parser;
pub mod git;

pub use diff_parser::parse_unified_diff;
pub use git::GitSource;
