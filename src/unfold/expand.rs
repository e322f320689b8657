use std::ops::Range;

use crate::model::{Change, Hunk};

use super::{
    CollapsedRegion, DecorationGroup, EXPAND_STEP, UnfoldDecoration, collapsed_regions,
    decorate_with_step,
};

/// Reveal old-file lines `[start, end)` as unchanged context.
///
/// The range is clamped to the source. Lines already shown by a hunk are left
/// alone, so expanding a visible range returns the hunks unchanged. Revealed
/// lines that touch a hunk are merged into it.
pub fn expand_from_source<S: AsRef<str>>(
    hunks: &[Hunk],
    source: &[S],
    start: u32,
    end: u32,
) -> Vec<Hunk> {
    let lines_count = u32::try_from(source.len()).unwrap_or(u32::MAX);
    let Some(range) = clamp_range(start, end, lines_count) else {
        log::debug!("Ignoring expansion of {start}..{end}, source has {lines_count} lines");
        return hunks.to_vec();
    };

    let mut ordered = hunks.to_vec();
    ordered.sort_by_key(|h| h.old_range().start);

    let runs = uncovered_runs(&ordered, range);
    if runs.is_empty() {
        return hunks.to_vec();
    }

    let context: Vec<Hunk> = runs
        .into_iter()
        .map(|run| context_hunk(&ordered, source, run))
        .collect();
    ordered.extend(context);
    // Stable: an insertion anchored before a revealed line stays in front of it
    ordered.sort_by_key(|h| h.old_range().start);

    merge_adjacent(ordered)
}

fn clamp_range(start: u32, end: u32, lines_count: u32) -> Option<Range<u32>> {
    let start = start.max(1);
    let end = end.min(lines_count.saturating_add(1));
    (start < end).then_some(start..end)
}

fn uncovered_runs(hunks: &[Hunk], range: Range<u32>) -> Vec<Range<u32>> {
    let mut runs = Vec::new();
    let mut run_start = None;

    for line in range.clone() {
        let covered = hunks.iter().any(|h| h.old_range().contains(&line));
        // Pure insertions sit between two lines and split a run there
        let anchored = hunks.iter().any(|h| {
            let old = h.old_range();
            old.is_empty() && old.start == line
        });

        if let Some(start) = run_start
            && (covered || anchored)
        {
            runs.push(start..line);
            run_start = None;
        }
        if !covered && run_start.is_none() {
            run_start = Some(line);
        }
    }
    if let Some(start) = run_start {
        runs.push(start..range.end);
    }

    runs
}

fn context_hunk<S: AsRef<str>>(hunks: &[Hunk], source: &[S], run: Range<u32>) -> Hunk {
    // New-file numbering is shifted by whatever the closest preceding hunk
    // added or removed.
    let delta = hunks
        .iter()
        .rev()
        .find(|h| h.old_range().end <= run.start)
        .map(|h| i64::from(h.new_range().end) - i64::from(h.old_range().end))
        .unwrap_or(0);
    let new_start = u32::try_from((i64::from(run.start) + delta).max(1)).unwrap_or(u32::MAX);

    let first = (run.start - 1) as usize;
    let last = (run.end - 1) as usize;
    let changes: Vec<Change> = source[first..last]
        .iter()
        .map(|line| Change::normal(line.as_ref()))
        .collect();
    let lines = run.end - run.start;

    Hunk {
        old_start: run.start,
        old_lines: lines,
        new_start,
        new_lines: lines,
        changes,
    }
}

fn merge_adjacent(hunks: Vec<Hunk>) -> Vec<Hunk> {
    let mut merged: Vec<Hunk> = Vec::with_capacity(hunks.len());

    for hunk in hunks {
        match merged.last_mut() {
            Some(previous) if previous.old_range().end >= hunk.old_range().start => {
                merge_into(previous, hunk);
            }
            _ => merged.push(hunk),
        }
    }

    merged
}

fn merge_into(previous: &mut Hunk, next: Hunk) {
    let old_start = previous.old_range().start.min(next.old_range().start);
    let new_start = previous.new_range().start.min(next.new_range().start);

    previous.old_lines += next.old_lines;
    previous.new_lines += next.new_lines;
    // Undo the insertion anchoring for sides that still have no lines
    previous.old_start = if previous.old_lines == 0 {
        old_start.saturating_sub(1)
    } else {
        old_start
    };
    previous.new_start = if previous.new_lines == 0 {
        new_start.saturating_sub(1)
    } else {
        new_start
    };
    previous.changes.extend(next.changes);
}

/// Hunks of one file together with the old source they were computed from.
///
/// This is the stateful side of unfolding: [`SourceExpansion::expand_range`]
/// replaces the hunk list with one that shows more context.
#[derive(Debug, Clone)]
pub struct SourceExpansion {
    hunks: Vec<Hunk>,
    source: Vec<String>,
    step: u32,
}

impl SourceExpansion {
    pub fn new(hunks: Vec<Hunk>, old_source: &str) -> Self {
        Self {
            hunks,
            source: old_source.lines().map(str::to_string).collect(),
            step: EXPAND_STEP,
        }
    }

    /// Use a different size for directional expansions.
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step.max(1);
        self
    }

    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    pub fn into_hunks(self) -> Vec<Hunk> {
        self.hunks
    }

    pub fn source_lines(&self) -> &[String] {
        &self.source
    }

    pub fn lines_count(&self) -> u32 {
        u32::try_from(self.source.len()).unwrap_or(u32::MAX)
    }

    pub fn expand_range(&mut self, start: u32, end: u32) {
        self.hunks = expand_from_source(&self.hunks, &self.source, start, end);
    }

    pub fn apply(&mut self, decoration: &UnfoldDecoration) {
        self.expand_range(decoration.start_line, decoration.end_line);
    }

    pub fn decorate(&self) -> Vec<DecorationGroup> {
        decorate_with_step(&self.hunks, self.lines_count(), self.step)
    }

    pub fn collapsed_regions(&self) -> Vec<CollapsedRegion> {
        collapsed_regions(&self.hunks, self.lines_count())
    }
}
