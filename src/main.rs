mod cli;
mod commands;

use std::io;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command};
use debug_flow::config::{self, AppConfig};
use debug_flow::logging;

fn main() {
    if let Err(err) = run_app() {
        eprintln!("debug-flow: {err:#}");
        std::process::exit(1);
    }
}

fn run_app() -> Result<()> {
    let cli = Cli::parse();

    let (config, warnings) = match config::load_config() {
        Ok(outcome) => (outcome.config.unwrap_or_default(), outcome.warnings),
        Err(err) => (
            AppConfig::default(),
            vec![format!(
                "Warning: Failed to load config ({}): {err:#}",
                config::config_path_hint()
            )],
        ),
    };
    logging::init(&config.log_config().adjust(cli.verbose, cli.quiet));
    for warning in &warnings {
        eprintln!("{warning}");
    }

    let mut stdout = io::stdout().lock();
    match &cli.command {
        Command::Tree(args) => commands::tree(args, &mut stdout).context("tree failed"),
        Command::Unfold(args) => {
            commands::unfold(args, &config, &mut stdout).context("unfold failed")
        }
        Command::Watch(args) => {
            drop(stdout);
            commands::watch(args, &config).with_context(|| format!("watching {}", args.url))
        }
    }
}
