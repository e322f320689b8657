use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;

/// Kind of change a file went through between two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Delete,
    Modify,
    Rename,
    Copy,
    #[default]
    Unknown,
}

impl ChangeKind {
    pub fn as_char(&self) -> char {
        match self {
            ChangeKind::Add => 'A',
            ChangeKind::Delete => 'D',
            ChangeKind::Modify => 'M',
            ChangeKind::Rename => 'R',
            ChangeKind::Copy => 'C',
            ChangeKind::Unknown => '?',
        }
    }

    /// Inverse of [`ChangeKind::as_char`], also accepting the lowercase letters
    /// `git status --short` style listings use.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(ChangeKind::Add),
            'D' => Some(ChangeKind::Delete),
            'M' => Some(ChangeKind::Modify),
            'R' => Some(ChangeKind::Rename),
            'C' => Some(ChangeKind::Copy),
            '?' => Some(ChangeKind::Unknown),
            _ => None,
        }
    }
}

/// A changed file as reported by a status listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    /// Full slash-delimited path
    pub name: String,
    pub kind: ChangeKind,
}

impl PathEntry {
    pub fn new(name: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Insert,
    Delete,
    Normal,
}

/// One line of a hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub kind: ChangeType,
    pub content: String,
}

impl Change {
    pub fn normal(content: impl Into<String>) -> Self {
        Self {
            kind: ChangeType::Normal,
            content: content.into(),
        }
    }

    pub fn insert(content: impl Into<String>) -> Self {
        Self {
            kind: ChangeType::Insert,
            content: content.into(),
        }
    }

    pub fn delete(content: impl Into<String>) -> Self {
        Self {
            kind: ChangeType::Delete,
            content: content.into(),
        }
    }

    pub fn prefix(&self) -> char {
        match self.kind {
            ChangeType::Insert => '+',
            ChangeType::Delete => '-',
            ChangeType::Normal => ' ',
        }
    }
}

/// A contiguous region of a unified diff, anchored to old-file line numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    /// Starting line number in the old file (from @@ header)
    pub old_start: u32,
    /// Number of lines from the old file in this hunk
    pub old_lines: u32,
    /// Starting line number in the new file (from @@ header)
    pub new_start: u32,
    /// Number of lines from the new file in this hunk
    pub new_lines: u32,
    pub changes: Vec<Change>,
}

impl Hunk {
    /// Old-file lines covered by this hunk as `[start, end)`.
    ///
    /// A hunk without old lines is anchored after `old_start`, as unified
    /// diffs write pure insertions.
    pub fn old_range(&self) -> Range<u32> {
        anchored_range(self.old_start, self.old_lines)
    }

    /// New-file lines covered by this hunk as `[start, end)`.
    pub fn new_range(&self) -> Range<u32> {
        anchored_range(self.new_start, self.new_lines)
    }

    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_lines, self.new_start, self.new_lines
        )
    }

    /// Iterate changes together with their old/new line numbers.
    pub fn lines(&self) -> impl Iterator<Item = NumberedChange<'_>> {
        let mut old_lineno = self.old_start;
        let mut new_lineno = self.new_start;
        self.changes.iter().map(move |change| {
            let (old, new) = match change.kind {
                ChangeType::Insert => {
                    let ln = new_lineno;
                    new_lineno += 1;
                    (None, Some(ln))
                }
                ChangeType::Delete => {
                    let ln = old_lineno;
                    old_lineno += 1;
                    (Some(ln), None)
                }
                ChangeType::Normal => {
                    let lns = (old_lineno, new_lineno);
                    old_lineno += 1;
                    new_lineno += 1;
                    (Some(lns.0), Some(lns.1))
                }
            };
            NumberedChange {
                change,
                old_lineno: old,
                new_lineno: new,
            }
        })
    }
}

fn anchored_range(start: u32, lines: u32) -> Range<u32> {
    if lines == 0 {
        let anchor = start.saturating_add(1);
        anchor..anchor
    } else {
        start..start.saturating_add(lines)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberedChange<'a> {
    pub change: &'a Change,
    pub old_lineno: Option<u32>,
    pub new_lineno: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub old_path: Option<PathBuf>,
    pub new_path: Option<PathBuf>,
    pub kind: ChangeKind,
    pub hunks: Vec<Hunk>,
    pub is_binary: bool,
}

impl FileDiff {
    pub fn display_path(&self) -> Option<&PathBuf> {
        self.new_path.as_ref().or(self.old_path.as_ref())
    }

    pub fn to_path_entry(&self) -> Option<PathEntry> {
        self.display_path().map(|path| PathEntry {
            name: path.to_string_lossy().replace('\\', "/"),
            kind: self.kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hunk() -> Hunk {
        Hunk {
            old_start: 3,
            old_lines: 3,
            new_start: 3,
            new_lines: 3,
            changes: vec![
                Change::normal("a"),
                Change::delete("b"),
                Change::insert("B"),
                Change::normal("c"),
            ],
        }
    }

    #[test]
    fn should_number_lines_per_side() {
        let hunk = sample_hunk();

        let numbers: Vec<_> = hunk
            .lines()
            .map(|l| (l.old_lineno, l.new_lineno))
            .collect();

        assert_eq!(
            numbers,
            vec![
                (Some(3), Some(3)),
                (Some(4), None),
                (None, Some(4)),
                (Some(5), Some(5)),
            ]
        );
    }

    #[test]
    fn should_render_header() {
        assert_eq!(sample_hunk().header(), "@@ -3,3 +3,3 @@");
        assert_eq!(sample_hunk().old_range(), 3..6);
    }

    #[test]
    fn should_anchor_pure_insertions_after_old_start() {
        let hunk = Hunk {
            old_start: 5,
            old_lines: 0,
            new_start: 6,
            new_lines: 2,
            changes: vec![Change::insert("x"), Change::insert("y")],
        };

        assert_eq!(hunk.old_range(), 6..6);
        assert_eq!(hunk.new_range(), 6..8);
    }

    #[test]
    fn should_round_trip_change_kind_letters() {
        for kind in [
            ChangeKind::Add,
            ChangeKind::Delete,
            ChangeKind::Modify,
            ChangeKind::Rename,
            ChangeKind::Copy,
            ChangeKind::Unknown,
        ] {
            assert_eq!(ChangeKind::from_char(kind.as_char()), Some(kind));
        }
        assert_eq!(ChangeKind::from_char('x'), None);
    }

    #[test]
    fn should_serialize_change_kind_lowercase() {
        let entry = PathEntry::new("src/main.rs", ChangeKind::Modify);
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"name":"src/main.rs","kind":"modify"}"#);
    }
}
