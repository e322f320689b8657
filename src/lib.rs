//! Helpers for inspecting changes while debugging: grouping changed paths
//! into a compact tree, unfolding the context around diff hunks, and
//! consuming typed server-sent event streams.

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod pathignore;
pub mod sse;
pub mod tree;
pub mod unfold;
pub mod vcs;

pub use error::{DebugFlowError, Result};
