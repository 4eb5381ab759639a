//! Logging setup shared by Herd binaries.
//!
//! Console output goes to stdout or stderr, optionally as JSON. When a log
//! file is configured, a second non-blocking layer appends plain text to it;
//! the returned [`LogGuards`] must be kept alive until shutdown so buffered
//! lines are flushed.

use crate::config::EnvParser;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
    pub stderr: bool,
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Build from `HERD_LOG_LEVEL`, `HERD_LOG_JSON` and `HERD_LOG_FILE`.
    ///
    /// Invalid values fall back to their defaults.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        Self {
            level: parser.get_log_level("LOG_LEVEL", default_level),
            json: parser.get_bool("LOG_JSON", false),
            stderr: false,
            file: parser.get_optional_path("LOG_FILE"),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env("HERD_LOG").unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            stderr: false,
            file: None,
        }
    }
}

/// Flush guards for non-blocking writers.
#[must_use = "dropping LogGuards stops file logging"]
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LogGuards, std::io::Error> {
    let mut guards = Vec::new();

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            guards.push(guard);
            Some(fmt::layer().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry()
        .with(config.filter())
        .with(file_layer);

    let result = match (config.json, config.stderr) {
        (true, true) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (true, false) => registry.with(fmt::layer().json()).try_init(),
        (false, true) => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        (false, false) => registry.with(fmt::layer()).try_init(),
    };
    result.map_err(|e| std::io::Error::other(e.to_string()))?;

    Ok(LogGuards { _guards: guards })
}
