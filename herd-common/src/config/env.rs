//! `HERD_*` environment overrides.
//!
//! Every malformed value is recorded and the default kept, so a caller can
//! report all bad variables at once after reading them.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{var}='{value}' is not a boolean (use true/false, 1/0, yes/no, on/off)")]
    NotBoolean { var: String, value: String },

    #[error("{var}='{value}' is not a duration (use 30s, 2m or HH:MM:SS)")]
    NotDuration { var: String, value: String },

    #[error("{var}='{value}' is not a log level (trace, debug, info, warn, error, off)")]
    NotLogLevel { var: String, value: String },
}

pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    pub fn new() -> Self {
        Self::with_prefix("HERD_")
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Raw value and full variable name; unset and non-UTF-8 both read as `None`.
    fn lookup(&self, name: &str) -> (String, Option<String>) {
        let var = format!("{}{}", self.prefix, name);
        let value = env::var(&var).ok();
        (var, value)
    }

    /// Parse `name` with `parse`; on failure record `invalid(var, value)`.
    fn parsed<T>(
        &mut self,
        name: &str,
        default: T,
        parse: impl FnOnce(&str) -> Option<T>,
        invalid: impl FnOnce(String, String) -> EnvError,
    ) -> T {
        let (var, value) = self.lookup(name);
        let Some(value) = value else {
            return default;
        };
        match parse(&value) {
            Some(parsed) => parsed,
            None => {
                self.errors.push(invalid(var, value));
                default
            }
        }
    }

    /// Trimmed string; unset or blank yields `None`.
    pub fn get_string(&mut self, name: &str) -> Option<String> {
        self.lookup(name)
            .1
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn get_bool(&mut self, name: &str, default: bool) -> bool {
        self.parsed(
            name,
            default,
            |v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" | "" => Some(false),
                _ => None,
            },
            |var, value| EnvError::NotBoolean { var, value },
        )
    }

    /// `~`-expanded path.
    pub fn get_path(&mut self, name: &str, default: &Path) -> PathBuf {
        self.get_optional_path(name)
            .unwrap_or_else(|| default.to_path_buf())
    }

    pub fn get_optional_path(&mut self, name: &str) -> Option<PathBuf> {
        self.get_string(name)
            .map(|v| PathBuf::from(shellexpand::tilde(&v).as_ref()))
    }

    /// Lowercased tracing level.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> String {
        self.parsed(
            name,
            default.to_string(),
            |v| {
                let lower = v.trim().to_ascii_lowercase();
                matches!(
                    lower.as_str(),
                    "trace" | "debug" | "info" | "warn" | "error" | "off"
                )
                .then_some(lower)
            },
            |var, value| EnvError::NotLogLevel { var, value },
        )
    }

    pub fn get_duration(&mut self, name: &str) -> Option<Duration> {
        self.parsed(
            name,
            None,
            |v| super::parse_duration(v).map(Some),
            |var, value| EnvError::NotDuration { var, value },
        )
    }
}
