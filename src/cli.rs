use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "debug-flow",
    version,
    about = "Group changed files, unfold diff context and watch event streams"
)]
pub struct Cli {
    /// More log output (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print changed files as a directory tree
    Tree(TreeArgs),
    /// Print the hunks of one file with their expand controls
    Unfold(UnfoldArgs),
    /// Print server-sent events as JSON lines
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
pub struct TreeArgs {
    /// Read changes from the git repository containing DIR
    #[arg(long, value_name = "DIR", conflicts_with = "patch")]
    pub repo: Option<PathBuf>,

    /// Read changes from a unified diff
    #[arg(long, value_name = "FILE")]
    pub patch: Option<PathBuf>,

    /// Keep only paths containing this text (case-insensitive)
    #[arg(long)]
    pub filter: Option<String>,

    /// Keep single-child directories as separate levels
    #[arg(long)]
    pub no_optimize: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct UnfoldArgs {
    /// Diff the working tree of the git repository containing DIR
    #[arg(long, value_name = "DIR", conflicts_with_all = ["patch", "old"])]
    pub repo: Option<PathBuf>,

    /// Read hunks from a unified diff
    #[arg(long, value_name = "FILE", requires = "old")]
    pub patch: Option<PathBuf>,

    /// Old version of the patched file
    #[arg(long, value_name = "FILE", requires = "patch")]
    pub old: Option<PathBuf>,

    /// File to unfold, relative to the repository root
    pub path: Option<PathBuf>,

    /// Reveal old lines START up to, not including, END (repeatable)
    #[arg(long, value_name = "START:END", action = ArgAction::Append)]
    pub expand: Vec<LineRange>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Event stream endpoint
    pub url: String,

    /// Event types to print (default: message)
    #[arg(long = "event", value_name = "NAME", action = ArgAction::Append)]
    pub events: Vec<String>,

    /// Stop at the first error instead of reconnecting
    #[arg(long)]
    pub no_reconnect: bool,
}

/// `START:END` as given to `--expand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl FromStr for LineRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once(':')
            .ok_or_else(|| format!("expected START:END, got '{s}'"))?;
        let parse = |value: &str| {
            value
                .trim()
                .parse::<u32>()
                .map_err(|err| format!("invalid line number '{value}': {err}"))
        };
        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn should_have_consistent_argument_definitions() {
        Cli::command().debug_assert();
    }

    #[test]
    fn should_parse_repeated_expand_ranges() {
        // given
        let argv = [
            "debug-flow", "unfold", "--repo", ".", "src/lib.rs", "--expand", "1:5", "--expand",
            "20:31",
        ];

        // when
        let cli = Cli::try_parse_from(argv).expect("arguments should parse");

        // then
        let Command::Unfold(args) = cli.command else {
            panic!("expected unfold command");
        };
        assert_eq!(
            args.expand,
            vec![
                LineRange { start: 1, end: 5 },
                LineRange { start: 20, end: 31 }
            ]
        );
        assert_eq!(args.path, Some(PathBuf::from("src/lib.rs")));
    }

    #[test]
    fn should_reject_malformed_range() {
        assert!("12".parse::<LineRange>().is_err());
        assert!("a:3".parse::<LineRange>().is_err());
    }

    #[test]
    fn should_require_old_source_with_patch() {
        let result = Cli::try_parse_from(["debug-flow", "unfold", "--patch", "x.diff"]);

        assert!(result.is_err());
    }

    #[test]
    fn should_accept_global_verbosity_after_subcommand() {
        let cli = Cli::try_parse_from(["debug-flow", "watch", "http://localhost/events", "-vv"])
            .expect("arguments should parse");

        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }
}
