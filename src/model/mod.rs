pub mod diff_types;

pub use diff_types::{
    Change, ChangeKind, ChangeType, FileDiff, Hunk, NumberedChange, PathEntry,
};
