use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use log::LevelFilter;
use toml::Value;
use toml::value::Table;

use crate::logging::{self, LogConfig};
use crate::sse::ReconnectOptions;
use crate::unfold::EXPAND_STEP;

const APP_DIR: &str = "debug-flow";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub log_level: Option<LevelFilter>,
    pub stream: StreamConfig,
    pub unfold: UnfoldConfig,
}

impl AppConfig {
    pub fn log_config(&self) -> LogConfig {
        let config = LogConfig::default();
        match self.log_level {
            Some(level) => config.with_level(level),
            None => config,
        }
    }
}

/// `[stream]` table: event stream connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub backoff_factor: f64,
    pub connect_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            backoff_factor: 2.0,
            connect_timeout_ms: 10_000,
        }
    }
}

impl StreamConfig {
    pub fn reconnect_options(&self) -> ReconnectOptions {
        ReconnectOptions {
            initial_delay: Duration::from_millis(self.initial_reconnect_delay_ms),
            max_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// `[unfold]` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnfoldConfig {
    pub expand_step: u32,
}

impl Default for UnfoldConfig {
    fn default() -> Self {
        Self {
            expand_step: EXPAND_STEP,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLoadOutcome {
    pub config: Option<AppConfig>,
    pub warnings: Vec<String>,
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_config_home = std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from);
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let appdata = std::env::var_os("APPDATA").map(PathBuf::from);

    config_path_from_parts(xdg_config_home, home, appdata)
}

pub fn config_path_hint() -> &'static str {
    #[cfg(windows)]
    {
        r"%APPDATA%\debug-flow\config.toml"
    }

    #[cfg(not(windows))]
    {
        "$XDG_CONFIG_HOME/debug-flow/config.toml (default: ~/.config/debug-flow/config.toml)"
    }
}

fn config_path_from_parts(
    xdg_config_home: Option<PathBuf>,
    home: Option<PathBuf>,
    _appdata: Option<PathBuf>,
) -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let base = _appdata
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| anyhow!("Could not determine APPDATA for config directory"))?;
        return Ok(base.join(APP_DIR).join("config.toml"));
    }

    #[cfg(not(windows))]
    {
        if let Some(base) = xdg_config_home.filter(|p| !p.as_os_str().is_empty()) {
            return Ok(base.join(APP_DIR).join("config.toml"));
        }

        let home = home
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| anyhow!("Could not determine HOME for config directory"))?;
        Ok(home.join(".config").join(APP_DIR).join("config.toml"))
    }
}

pub fn load_config() -> Result<ConfigLoadOutcome> {
    let path = config_path()?;
    load_config_from_path(&path)
}

pub fn load_config_from_path(path: &Path) -> Result<ConfigLoadOutcome> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ConfigLoadOutcome::default()),
        Err(err) => return Err(err.into()),
    };

    let value: Value = toml::from_str(&contents)?;
    let table = value
        .as_table()
        .ok_or_else(|| anyhow!("Config root must be a TOML table"))?;

    let mut config = AppConfig::default();
    let mut warnings = Vec::new();

    for (key, value) in table {
        match key.as_str() {
            "log_level" => match value.as_str().map(|s| (s, logging::parse_level(s))) {
                Some((_, Some(level))) => config.log_level = Some(level),
                Some((name, None)) => warnings.push(format!(
                    "Warning: Unknown log level '{name}' in config key 'log_level'; ignoring value"
                )),
                None => warnings.push(
                    "Warning: Config key 'log_level' must be a string; ignoring value".to_string(),
                ),
            },
            "stream" => match value.as_table() {
                Some(section) => parse_stream(section, &mut config.stream, &mut warnings),
                None => warnings.push(
                    "Warning: Config key 'stream' must be a table; ignoring value".to_string(),
                ),
            },
            "unfold" => match value.as_table() {
                Some(section) => parse_unfold(section, &mut config.unfold, &mut warnings),
                None => warnings.push(
                    "Warning: Config key 'unfold' must be a table; ignoring value".to_string(),
                ),
            },
            _ => warnings.push(format!("Warning: Unknown config key '{key}', ignoring")),
        }
    }

    Ok(ConfigLoadOutcome {
        config: Some(config),
        warnings,
    })
}

fn parse_stream(section: &Table, stream: &mut StreamConfig, warnings: &mut Vec<String>) {
    for (key, value) in section {
        let name = format!("stream.{key}");
        match key.as_str() {
            "initial_reconnect_delay_ms" => {
                if let Some(ms) = millis(&name, value, warnings) {
                    stream.initial_reconnect_delay_ms = ms;
                }
            }
            "max_reconnect_delay_ms" => {
                if let Some(ms) = millis(&name, value, warnings) {
                    stream.max_reconnect_delay_ms = ms;
                }
            }
            "connect_timeout_ms" => {
                if let Some(ms) = millis(&name, value, warnings) {
                    stream.connect_timeout_ms = ms;
                }
            }
            "backoff_factor" => {
                let factor = match value {
                    Value::Float(f) => Some(*f),
                    Value::Integer(i) => Some(*i as f64),
                    _ => None,
                };
                match factor {
                    Some(f) if f.is_finite() && f >= 1.0 => stream.backoff_factor = f,
                    _ => warnings.push(format!(
                        "Warning: Config key '{name}' must be a number >= 1; ignoring value"
                    )),
                }
            }
            _ => warnings.push(format!("Warning: Unknown config key '{name}', ignoring")),
        }
    }
}

fn parse_unfold(section: &Table, unfold: &mut UnfoldConfig, warnings: &mut Vec<String>) {
    for (key, value) in section {
        let name = format!("unfold.{key}");
        match key.as_str() {
            "expand_step" => match value.as_integer().and_then(|i| u32::try_from(i).ok()) {
                Some(step) if step > 0 => unfold.expand_step = step,
                _ => warnings.push(format!(
                    "Warning: Config key '{name}' must be a positive integer; ignoring value"
                )),
            },
            _ => warnings.push(format!("Warning: Unknown config key '{name}', ignoring")),
        }
    }
}

fn millis(name: &str, value: &Value, warnings: &mut Vec<String>) -> Option<u64> {
    let ms = value.as_integer().and_then(|i| u64::try_from(i).ok());
    if ms.is_none() {
        warnings.push(format!(
            "Warning: Config key '{name}' must be a non-negative integer; ignoring value"
        ));
    }
    ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn load(contents: &str) -> ConfigLoadOutcome {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("failed to write config");
        load_config_from_path(&path).expect("config should parse")
    }

    #[test]
    fn should_return_none_when_config_file_missing() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("config.toml");
        let outcome = load_config_from_path(&path).expect("missing config should not fail");
        assert_eq!(outcome.config, None);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn should_load_all_sections_from_valid_toml() {
        let outcome = load(
            "log_level = \"debug\"\n\
             [stream]\n\
             initial_reconnect_delay_ms = 500\n\
             max_reconnect_delay_ms = 4000\n\
             backoff_factor = 1.5\n\
             connect_timeout_ms = 2500\n\
             [unfold]\n\
             expand_step = 20\n",
        );

        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        let config = outcome.config.expect("config should be present");
        assert_eq!(config.log_level, Some(LevelFilter::Debug));
        assert_eq!(config.unfold.expand_step, 20);
        let options = config.stream.reconnect_options();
        assert_eq!(options.initial_delay, Duration::from_millis(500));
        assert_eq!(options.max_delay, Duration::from_millis(4000));
        assert_eq!(options.backoff_factor, 1.5);
        assert_eq!(config.stream.connect_timeout(), Duration::from_millis(2500));
        assert_eq!(config.log_config().level, LevelFilter::Debug);
    }

    #[test]
    fn should_parse_empty_config_as_defaults() {
        let outcome = load("");

        assert_eq!(outcome.config, Some(AppConfig::default()));
        assert!(outcome.warnings.is_empty());
        let config = AppConfig::default();
        assert_eq!(config.stream.reconnect_options(), ReconnectOptions::default());
        assert_eq!(config.unfold.expand_step, 10);
    }

    #[test]
    fn should_error_on_invalid_toml() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "log_level =\n").expect("failed to write config");

        let result = load_config_from_path(&path);
        assert!(result.is_err(), "invalid TOML should return error");
    }

    #[test]
    fn should_warn_on_unknown_keys_and_keep_known_values() {
        let outcome = load("log_level = \"warn\"\nlog_levels = \"typo\"\n[unfold]\nstep = 3\n");

        assert_eq!(
            outcome.config.as_ref().and_then(|cfg| cfg.log_level),
            Some(LevelFilter::Warn)
        );
        assert_eq!(
            outcome.warnings,
            vec![
                "Warning: Unknown config key 'log_levels', ignoring",
                "Warning: Unknown config key 'unfold.step', ignoring",
            ]
        );
    }

    #[test]
    fn should_warn_and_ignore_values_with_invalid_type() {
        let outcome = load(
            "log_level = 123\n\
             [stream]\n\
             initial_reconnect_delay_ms = \"fast\"\n\
             backoff_factor = 0.5\n\
             [unfold]\n\
             expand_step = 0\n",
        );

        assert_eq!(outcome.config, Some(AppConfig::default()));
        assert_eq!(
            outcome.warnings,
            vec![
                "Warning: Config key 'log_level' must be a string; ignoring value",
                "Warning: Config key 'stream.backoff_factor' must be a number >= 1; ignoring value",
                "Warning: Config key 'stream.initial_reconnect_delay_ms' must be a non-negative integer; ignoring value",
                "Warning: Config key 'unfold.expand_step' must be a positive integer; ignoring value",
            ]
        );
    }

    #[test]
    fn should_warn_on_unknown_log_level_and_non_table_sections() {
        let outcome = load("log_level = \"chatty\"\nstream = 5\n");

        assert_eq!(outcome.config, Some(AppConfig::default()));
        assert_eq!(
            outcome.warnings,
            vec![
                "Warning: Unknown log level 'chatty' in config key 'log_level'; ignoring value",
                "Warning: Config key 'stream' must be a table; ignoring value",
            ]
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn should_use_xdg_config_home_when_set() {
        let path = config_path_from_parts(
            Some(PathBuf::from("/tmp/xdg-config")),
            Some(PathBuf::from("/tmp/home")),
            None,
        )
        .expect("config path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/xdg-config/debug-flow/config.toml"));
    }

    #[cfg(not(windows))]
    #[test]
    fn should_fallback_to_home_dot_config_when_xdg_unset() {
        let path = config_path_from_parts(None, Some(PathBuf::from("/home/tester")), None)
            .expect("config path should resolve");

        assert_eq!(
            path,
            PathBuf::from("/home/tester/.config/debug-flow/config.toml")
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn should_ignore_empty_xdg_config_home() {
        let path = config_path_from_parts(
            Some(PathBuf::from("")),
            Some(PathBuf::from("/home/tester")),
            None,
        )
        .expect("config path should resolve");

        assert_eq!(
            path,
            PathBuf::from("/home/tester/.config/debug-flow/config.toml")
        );
    }

    #[cfg(windows)]
    #[test]
    fn should_use_windows_appdata_base_dir() {
        let path = config_path_from_parts(
            Some(PathBuf::from(r"C:\xdg\ignored")),
            Some(PathBuf::from(r"C:\Users\tester")),
            Some(PathBuf::from(r"C:\Users\tester\AppData\Roaming")),
        )
        .expect("config path should resolve");

        assert_eq!(
            path,
            PathBuf::from(r"C:\Users\tester\AppData\Roaming\debug-flow\config.toml")
        );
    }
}
