//! Logger configuration and named loggers.
//!
//! Nothing here installs a logger implicitly: the binary builds a
//! [`LogConfig`] and calls [`init`] once. Library code only goes through the
//! `log` facade, so tests stay silent.

use log::LevelFilter;

pub const ROOT_TARGET: &str = "debug_flow";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: LevelFilter,
    /// Per-target overrides, e.g. `("debug_flow::sse", Debug)`
    pub targets: Vec<(String, LevelFilter)>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            targets: Vec::new(),
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>, level: LevelFilter) -> Self {
        self.targets.push((target.into(), level));
        self
    }

    /// Apply `-v`/`-q` flags on top of the configured level.
    pub fn adjust(mut self, verbose: u8, quiet: bool) -> Self {
        if quiet {
            self.level = LevelFilter::Error;
        } else if verbose > 0 {
            self.level = match verbose {
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
            .max(self.level);
        }
        self
    }
}

/// Debug builds log at `Info`, release builds at `Warn`.
pub fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    }
}

/// Parse a level name as written in the config file (`"debug"`, `"WARN"`, `"off"`).
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    value.trim().parse().ok()
}

/// Install `env_logger` writing to stderr. `RUST_LOG` still takes precedence
/// when set.
pub fn init(config: &LogConfig) {
    if let Err(err) = builder(config).try_init() {
        eprintln!("Warning: logger already initialised: {err}");
    }
}

fn builder(config: &LogConfig) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.level);
    for (target, level) in &config.targets {
        builder.filter_module(target, *level);
    }
    builder.parse_default_env();
    builder.target(env_logger::Target::Stderr);
    builder
}

/// A named logger. Children extend the parent's target with `::name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Logger {
    target: String,
}

impl Logger {
    pub fn root() -> Self {
        Self {
            target: ROOT_TARGET.to_string(),
        }
    }

    pub fn child(&self, name: &str) -> Self {
        Self {
            target: format!("{}::{name}", self.target),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn enabled(&self, level: log::Level) -> bool {
        log::log_enabled!(target: self.target.as_str(), level)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::root()
    }
}
