use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::bounded;
use serde::Serialize;
use serde_json::{Value, json};

use debug_flow::config::AppConfig;
use debug_flow::model::{ChangeKind, FileDiff, Hunk, PathEntry};
use debug_flow::sse::{
    EventStream, HttpConnector, ReconnectingTypedEventSource, TypedEventSource,
};
use debug_flow::tree::{self, display::render_tree};
use debug_flow::unfold::{
    CollapsedRegion, DecorationGroup, Placement, SourceExpansion, UnfoldDecoration,
};
use debug_flow::vcs::{GitSource, parse_unified_diff};
use debug_flow::{pathignore, sse};

use crate::cli::{TreeArgs, UnfoldArgs, WatchArgs};

pub fn tree(args: &TreeArgs, out: &mut impl Write) -> Result<()> {
    let mut entries = if let Some(patch) = &args.patch {
        patch_entries(patch)?
    } else if args.repo.is_some() || io::stdin().is_terminal() {
        let dir = args.repo.clone().unwrap_or_else(|| PathBuf::from("."));
        repo_entries(&dir)?
    } else {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read path list from stdin")?;
        parse_path_list(&text)
    };

    if let Some(needle) = &args.filter {
        entries = tree::filter_entries(&entries, needle);
    }
    log::debug!("Building tree from {} paths", entries.len());

    let mut file_tree = tree::build_tree(&entries);
    if !args.no_optimize {
        file_tree = tree::optimize(&file_tree);
    }

    if args.json {
        serde_json::to_writer_pretty(&mut *out, &file_tree)?;
        writeln!(out)?;
    } else {
        for line in render_tree(&file_tree) {
            writeln!(out, "{line}")?;
        }
    }
    Ok(())
}

fn repo_entries(dir: &Path) -> Result<Vec<PathEntry>> {
    let source = GitSource::discover(dir)
        .with_context(|| format!("{}: not inside a git repository", dir.display()))?;
    let entries = source.changed_paths()?;
    Ok(pathignore::filter_entries(source.root(), entries))
}

fn patch_entries(patch: &Path) -> Result<Vec<PathEntry>> {
    let files = read_patch(patch)?;
    Ok(files.iter().filter_map(FileDiff::to_path_entry).collect())
}

fn read_patch(patch: &Path) -> Result<Vec<FileDiff>> {
    let text = fs::read_to_string(patch)
        .with_context(|| format!("Failed to read patch {}", patch.display()))?;
    parse_unified_diff(&text).with_context(|| format!("Failed to parse {}", patch.display()))
}

/// Parse `<kind-letter> <path>` lines; lines without a leading status letter
/// are taken as bare paths of unknown kind.
pub fn parse_path_list(text: &str) -> Vec<PathEntry> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut chars = line.chars();
            match (chars.next(), chars.next()) {
                (Some(letter), Some(sep)) if sep.is_whitespace() => {
                    match ChangeKind::from_char(letter) {
                        Some(kind) => PathEntry::new(chars.as_str().trim_start(), kind),
                        None => PathEntry::new(line, ChangeKind::Unknown),
                    }
                }
                _ => PathEntry::new(line, ChangeKind::Unknown),
            }
        })
        .collect()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnfoldReport<'a> {
    path: Option<&'a Path>,
    lines_count: u32,
    hunks: &'a [Hunk],
    decorations: Vec<DecorationGroup>,
    collapsed: Vec<CollapsedRegion>,
}

pub fn unfold(args: &UnfoldArgs, config: &AppConfig, out: &mut impl Write) -> Result<()> {
    let (file, old_source) = match (&args.patch, &args.old) {
        (Some(patch), Some(old)) => {
            let file = select_file(read_patch(patch)?, args.path.as_deref())?;
            let old_source = fs::read_to_string(old)
                .with_context(|| format!("Failed to read {}", old.display()))?;
            (file, old_source)
        }
        _ => {
            let dir = args.repo.clone().unwrap_or_else(|| PathBuf::from("."));
            let path = args
                .path
                .as_deref()
                .ok_or_else(|| anyhow!("PATH is required when reading from a repository"))?;
            let source = GitSource::discover(&dir)
                .with_context(|| format!("{}: not inside a git repository", dir.display()))?;
            let file = source.file_diff(path)?;
            let old_source = source.old_source(path)?.unwrap_or_default();
            (file, old_source)
        }
    };

    if file.is_binary {
        bail!("Cannot unfold binary file");
    }

    let path = file.display_path().cloned();
    let mut expansion = SourceExpansion::new(file.hunks, &old_source)
        .with_step(config.unfold.expand_step);
    for range in &args.expand {
        log::debug!("Expanding old lines {}..{}", range.start, range.end);
        expansion.expand_range(range.start, range.end);
    }

    if args.json {
        let report = UnfoldReport {
            path: path.as_deref(),
            lines_count: expansion.lines_count(),
            hunks: expansion.hunks(),
            decorations: expansion.decorate(),
            collapsed: expansion.collapsed_regions(),
        };
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
        return Ok(());
    }

    if let Some(path) = &path {
        writeln!(out, "{}", path.display())?;
    }
    write_unfolded(expansion.hunks(), &expansion.decorate(), out)?;
    Ok(())
}

fn select_file(files: Vec<FileDiff>, path: Option<&Path>) -> Result<FileDiff> {
    match path {
        Some(path) => files
            .into_iter()
            .find(|file| file.display_path().is_some_and(|p| p == path))
            .ok_or_else(|| anyhow!("{} is not part of the patch", path.display())),
        None if files.len() == 1 => files
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Patch is empty")),
        None => bail!(
            "Patch touches {} files, pass the PATH to unfold",
            files.len()
        ),
    }
}

/// Print hunks with each decoration group in front of the hunk it belongs to.
fn write_unfolded(
    hunks: &[Hunk],
    groups: &[DecorationGroup],
    out: &mut impl Write,
) -> io::Result<()> {
    let before = |idx: usize| {
        groups
            .iter()
            .filter(move |g| g.placement == Placement::BeforeHunk(idx))
            .flat_map(|g| g.decorations.iter())
    };

    for (idx, hunk) in hunks.iter().enumerate() {
        for decoration in before(idx) {
            writeln!(out, "{}", format_decoration(decoration))?;
        }
        writeln!(out, "{}", hunk.header())?;
        for change in &hunk.changes {
            writeln!(out, "{}{}", change.prefix(), change.content)?;
        }
    }

    let trailing = groups.iter().filter(|g| match g.placement {
        Placement::BeforeHunk(idx) => idx >= hunks.len(),
        Placement::AfterLastHunk => true,
    });
    for group in trailing {
        for decoration in &group.decorations {
            writeln!(out, "{}", format_decoration(decoration))?;
        }
    }
    Ok(())
}

fn format_decoration(decoration: &UnfoldDecoration) -> String {
    format!(
        "{} {} [{}, {})",
        decoration.expand.glyph(),
        decoration.label(),
        decoration.start_line,
        decoration.end_line
    )
}

pub fn watch(args: &WatchArgs, config: &AppConfig) -> Result<()> {
    let connector = HttpConnector::new(config.stream.connect_timeout());
    if args.no_reconnect {
        let source = TypedEventSource::new(&args.url, connector);
        print_events(&source, &args.events)
    } else {
        let options = config.stream.reconnect_options();
        let source = ReconnectingTypedEventSource::new(&args.url, options, connector);
        print_events(&source, &args.events)
    }
}

/// Print every event as a JSON line until the source gives up.
fn print_events<S: EventStream>(source: &S, events: &[String]) -> Result<()> {
    let default_events = [sse::parser::DEFAULT_EVENT_TYPE.to_string()];
    let events = if events.is_empty() {
        &default_events[..]
    } else {
        events
    };

    for event_type in events {
        source.on::<Value, _>(event_type, |event| {
            let line = json!({
                "type": event.event_type,
                "id": event.last_event_id,
                "data": event.data,
            });
            let mut stdout = io::stdout().lock();
            if let Err(err) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
                log::debug!("Failed to write event: {err}");
            }
        });
    }

    let url = source.url().to_string();
    source.on_open(move || log::info!("Connected to {url}"));

    let (closed_tx, closed_rx) = bounded::<String>(1);
    // Reconnect attempts are logged by the source itself
    source.on_error(move |error| {
        if error.retry_in.is_none() {
            let _ = closed_tx.try_send(error.message.clone());
        }
    });

    source.start();
    let message = closed_rx
        .recv()
        .context("Event stream stopped unexpectedly")?;
    source.close();
    Err(anyhow!("{message}"))
}
