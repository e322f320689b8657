//! Collapsed (hidden) old-file lines around diff hunks and the decorations
//! offering to reveal them.
//!
//! Line ranges are 1-based and half-open: `[start_line, end_line)`.

mod expand;

pub use expand::{SourceExpansion, expand_from_source};

use serde::Serialize;

use crate::model::Hunk;

/// Number of lines revealed by a directional (up/down) expansion.
pub const EXPAND_STEP: u32 = 10;

/// What a decoration expands when activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Expand {
    /// The last lines before the following hunk
    Up,
    /// The first lines after the preceding hunk
    Down,
    /// The whole gap between two hunks
    AllBetween,
    /// Everything from the start of the file
    UpToStart,
    /// Everything up to the end of the file
    DownToEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    None,
}

impl Expand {
    pub fn direction(self) -> Direction {
        match self {
            Expand::Up => Direction::Up,
            Expand::Down => Direction::Down,
            Expand::AllBetween | Expand::UpToStart | Expand::DownToEnd => Direction::None,
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Expand::Up => "↑",
            Expand::Down => "↓",
            Expand::AllBetween => "↕",
            Expand::UpToStart => "⇈",
            Expand::DownToEnd => "⇊",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnfoldDecoration {
    pub start_line: u32,
    pub end_line: u32,
    pub expand: Expand,
}

impl UnfoldDecoration {
    fn new(start_line: i64, end_line: i64, expand: Expand) -> Self {
        Self {
            start_line: to_line(start_line),
            end_line: to_line(end_line),
            expand,
        }
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line)
    }

    pub fn direction(&self) -> Direction {
        self.expand.direction()
    }

    pub fn label(&self) -> String {
        match self.direction() {
            Direction::Up => "Expand up".to_string(),
            Direction::Down => "Expand down".to_string(),
            Direction::None => format!("Expand {} lines", self.line_count()),
        }
    }
}

/// Old-file lines hidden between, before or after hunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollapsedRegion {
    pub start_line: u32,
    pub end_line: u32,
}

impl CollapsedRegion {
    pub fn len(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, line: u32) -> bool {
        self.start_line <= line && line < self.end_line
    }
}

/// Where a group of decorations is rendered relative to the hunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Placement {
    BeforeHunk(usize),
    AfterLastHunk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecorationGroup {
    pub placement: Placement,
    pub decorations: Vec<UnfoldDecoration>,
}

/// Decorations for the gap between `previous` and `current`.
///
/// A missing `previous` means the gap before the first hunk, a missing
/// `current` the gap after the last one.
pub fn decorations_between(
    previous: Option<&Hunk>,
    current: Option<&Hunk>,
    lines_count: u32,
) -> Vec<UnfoldDecoration> {
    decorations_between_with_step(previous, current, lines_count, EXPAND_STEP)
}

pub fn decorations_between_with_step(
    previous: Option<&Hunk>,
    current: Option<&Hunk>,
    lines_count: u32,
    step: u32,
) -> Vec<UnfoldDecoration> {
    let step = i64::from(step.max(1));
    let eof = i64::from(lines_count) + 1;

    match (previous, current) {
        (None, None) => Vec::new(),
        (Some(previous), None) => file_end(gap_start(previous), eof, step),
        (None, Some(current)) => file_start(gap_end(current, eof), step),
        (Some(previous), Some(current)) => {
            in_between(gap_start(previous), gap_end(current, eof), step)
        }
    }
}

/// All decoration groups for a file, in rendering order.
///
/// Without hunks, a non-empty file is one collapsed region decorated like the
/// start of a file.
pub fn decorate(hunks: &[Hunk], lines_count: u32) -> Vec<DecorationGroup> {
    decorate_with_step(hunks, lines_count, EXPAND_STEP)
}

pub fn decorate_with_step(hunks: &[Hunk], lines_count: u32, step: u32) -> Vec<DecorationGroup> {
    let mut groups = Vec::new();
    let mut push = |placement, decorations: Vec<UnfoldDecoration>| {
        if !decorations.is_empty() {
            groups.push(DecorationGroup {
                placement,
                decorations,
            });
        }
    };

    if hunks.is_empty() {
        let eof = i64::from(lines_count) + 1;
        push(Placement::BeforeHunk(0), file_start(eof, i64::from(step.max(1))));
        return groups;
    }

    for (idx, hunk) in hunks.iter().enumerate() {
        let previous = idx.checked_sub(1).and_then(|i| hunks.get(i));
        push(
            Placement::BeforeHunk(idx),
            decorations_between_with_step(previous, Some(hunk), lines_count, step),
        );
    }
    push(
        Placement::AfterLastHunk,
        decorations_between_with_step(hunks.last(), None, lines_count, step),
    );

    groups
}

/// Every non-empty range of old-file lines not covered by a hunk.
///
/// Together with the hunks' old ranges these cover `[1, lines_count]`
/// exactly once.
pub fn collapsed_regions(hunks: &[Hunk], lines_count: u32) -> Vec<CollapsedRegion> {
    let eof = i64::from(lines_count) + 1;
    let mut regions = Vec::new();
    let mut cursor: i64 = 1;

    for hunk in hunks {
        let range = hunk.old_range();
        let end = i64::from(range.start).min(eof);
        if end > cursor {
            regions.push(region(cursor, end));
        }
        cursor = cursor.max(i64::from(range.end));
    }
    if eof > cursor {
        regions.push(region(cursor, eof));
    }

    regions
}

fn region(start: i64, end: i64) -> CollapsedRegion {
    CollapsedRegion {
        start_line: to_line(start),
        end_line: to_line(end),
    }
}

fn to_line(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn gap_start(previous: &Hunk) -> i64 {
    i64::from(previous.old_range().end).max(1)
}

fn gap_end(current: &Hunk, eof: i64) -> i64 {
    i64::from(current.old_range().start).min(eof)
}

fn file_start(end: i64, step: i64) -> Vec<UnfoldDecoration> {
    let collapsed = end - 1;
    if collapsed <= 0 {
        return Vec::new();
    }

    let mut decorations = vec![UnfoldDecoration::new(1, end, Expand::UpToStart)];
    if collapsed > step {
        decorations.push(UnfoldDecoration::new((end - step).max(1), end, Expand::Up));
    }
    decorations
}

fn file_end(start: i64, eof: i64, step: i64) -> Vec<UnfoldDecoration> {
    let collapsed = eof - start;
    if collapsed <= 0 {
        return Vec::new();
    }

    let mut decorations = Vec::new();
    if collapsed > step {
        decorations.push(UnfoldDecoration::new(start, start + step, Expand::Down));
    }
    decorations.push(UnfoldDecoration::new(start, eof, Expand::DownToEnd));
    decorations
}

fn in_between(start: i64, end: i64, step: i64) -> Vec<UnfoldDecoration> {
    let collapsed = end - start;
    if collapsed <= 0 {
        return Vec::new();
    }
    if collapsed < step {
        return vec![UnfoldDecoration::new(start, end, Expand::AllBetween)];
    }

    vec![
        UnfoldDecoration::new(start, start + step, Expand::Down),
        UnfoldDecoration::new(start, end, Expand::AllBetween),
        UnfoldDecoration::new(end - step, end, Expand::Up),
    ]
}
