//! Logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;

/// Default filter when nothing else is configured.
const DEFAULT_FILTER: &str = "ragmcp=info,warn";

/// Filter used with `--verbose`.
const VERBOSE_FILTER: &str = "ragmcp=debug,info";

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name; anything other than `json` is pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive string.
    pub filter: String,
    /// Write to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: DEFAULT_FILTER.to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds logging configuration from the environment only.
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        Self::from_settings(None, verbose)
    }

    /// Builds logging configuration from config settings with env overrides.
    ///
    /// Filter precedence: `RAGMCP_LOG`, then `RUST_LOG`, then `--verbose`,
    /// then the config file, then the built-in default.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let mut config = Self::default();

        if let Some(settings) = settings {
            if let Some(format) = &settings.format {
                config.format = LogFormat::parse(format);
            }
            if let Some(level) = &settings.level {
                config.filter.clone_from(level);
            }
            config.file = settings.file.as_ref().map(PathBuf::from);
        }
        if verbose {
            config.filter = VERBOSE_FILTER.to_string();
        }

        apply_env_overrides(&mut config);
        config
    }
}

fn apply_env_overrides(config: &mut LoggingConfig) {
    if let Some(filter) = ["RAGMCP_LOG", "RUST_LOG"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
    {
        config.filter = filter;
    }
    if let Ok(format) = std::env::var("RAGMCP_LOG_FORMAT") {
        config.format = LogFormat::parse(&format);
    }
    if let Ok(file) = std::env::var("RAGMCP_LOG_FILE") {
        if !file.trim().is_empty() {
            config.file = Some(PathBuf::from(file));
        }
    }
}
