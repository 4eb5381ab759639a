//! Configuration system for Herd.
//!
//! This module provides:
//! - The TOML configuration model (`herd.toml`)
//! - Environment variable overrides (`HERD_*`) with type safety
//! - Validation warnings reported on startup
//!
//! The orchestrator core never reads files itself; the binary loads a
//! [`HerdConfig`] once and hands it to the components.

pub mod env;

pub use env::{EnvError, EnvParser};

use crate::types::SourceControlKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "herd.toml";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid environment overrides: {0}")]
    Env(String),
}

/// Root of `herd.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HerdConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    /// Tool version → executable path.
    #[serde(default)]
    pub tools: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub source_control: SourceControlConfig,
    /// Remote deployment host. Absent means remote actions fail.
    #[serde(default)]
    pub session: Option<SessionConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory build log artifacts are written to.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    /// Class whose static `BuildHotUpdateFor<Target>` methods run hot-update builds.
    #[serde(default = "default_hot_update_entry_class")]
    pub hot_update_entry_class: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            logs_dir: default_logs_dir(),
            hot_update_entry_class: default_hot_update_entry_class(),
        }
    }
}

/// Source-control executables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceControlConfig {
    #[serde(default = "default_git")]
    pub git: PathBuf,
    #[serde(default = "default_cm")]
    pub cm: PathBuf,
}

impl Default for SourceControlConfig {
    fn default() -> Self {
        Self {
            git: default_git(),
            cm: default_cm(),
        }
    }
}

/// Credentials and trust settings for the remote deployment host.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    /// Accepted for compatibility but never sent: the system ssh client
    /// authenticates with `private_key_path` or the running agent.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
    /// Duration string such as `30s` or `00:00:30`. Unparsable disables keep-alive.
    #[serde(default)]
    pub keep_alive_interval: Option<String>,
    /// SHA256 host-key fingerprints that may be trusted. Empty trusts nothing.
    #[serde(default)]
    pub expected_fingerprints: Vec<String>,
    /// Prefix remote commands with `sudo`.
    #[serde(default)]
    pub need_sudo: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
}

impl SessionConfig {
    pub fn new(address: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: default_ssh_port(),
            user: user.into(),
            password: None,
            private_key_path: None,
            keep_alive_interval: None,
            expected_fingerprints: Vec::new(),
            need_sudo: false,
            connect_timeout: default_connect_timeout(),
        }
    }

    /// `~`-expanded private key path.
    pub fn expanded_key_path(&self) -> Option<PathBuf> {
        self.private_key_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
    }

    /// `user@address:port`, used as a log prefix.
    pub fn display_target(&self) -> String {
        format!("{}@{}:{}", self.user, self.address, self.port)
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key_path", &self.private_key_path)
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("expected_fingerprints", &self.expected_fingerprints)
            .field("need_sudo", &self.need_sudo)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Where notifications go when a project does not name its own target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub default_target: Option<String>,
    /// Separate target for per-line build output.
    #[serde(default)]
    pub log_target: Option<String>,
}

/// One `[[projects]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub source_path: PathBuf,
    pub tool_version: String,
    #[serde(default)]
    pub player_build_output: PathBuf,
    #[serde(default)]
    pub addressable_build_output: PathBuf,
    #[serde(default)]
    pub source_control: SourceControlKind,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub notification_target: Option<String>,
    #[serde(default)]
    pub deployment: Vec<ActionSpec>,
}

/// Declarative deployment step: a kind plus string parameters.
///
/// Parameters may contain `{projectName}`-style tokens; they are resolved
/// once when the deployment pipeline is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub kind: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, String>,
}

impl ActionSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Non-fatal configuration problem reported at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl HerdConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Apply `HERD_*` environment overrides.
    ///
    /// Nothing is changed unless every variable that is set parses.
    pub fn apply_env(&mut self, parser: &mut EnvParser) -> Result<(), ConfigError> {
        let log_level = parser.get_log_level("LOG_LEVEL", &self.general.log_level);
        let logs_dir = parser.get_path("LOGS_DIR", &self.general.logs_dir);
        let entry_class = parser.get_string("HOT_UPDATE_ENTRY_CLASS");
        let connect_timeout = parser.get_duration("SESSION_CONNECT_TIMEOUT");
        let need_sudo = self
            .session
            .as_ref()
            .map(|s| parser.get_bool("SESSION_NEED_SUDO", s.need_sudo));

        if parser.has_errors() {
            let joined = parser
                .take_errors()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ConfigError::Env(joined));
        }

        self.general.log_level = log_level;
        self.general.logs_dir = logs_dir;
        if let Some(class) = entry_class {
            self.general.hot_update_entry_class = class;
        }
        if let Some(session) = self.session.as_mut() {
            if let Some(timeout) = connect_timeout {
                session.connect_timeout = humantime::format_duration(timeout).to_string();
            }
            session.need_sudo = need_sudo.unwrap_or(session.need_sudo);
        }
        Ok(())
    }

    /// Collect problems that do not stop startup but will fail requests later.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for project in &self.projects {
            if !project.source_path.exists() {
                warnings.push(ConfigWarning {
                    field: format!("projects.{}.source_path", project.name),
                    message: format!("{} does not exist", project.source_path.display()),
                });
            }
            if project.source_control != SourceControlKind::None
                && project.branch.as_deref().is_none_or(|b| b.trim().is_empty())
            {
                warnings.push(ConfigWarning {
                    field: format!("projects.{}.branch", project.name),
                    message: format!(
                        "source_control is {} but no branch is set; sync will be skipped",
                        project.source_control
                    ),
                });
            }
        }

        if let Some(session) = &self.session {
            if session.expected_fingerprints.is_empty() {
                warnings.push(ConfigWarning {
                    field: "session.expected_fingerprints".to_string(),
                    message: "empty allow-list; every login will be refused".to_string(),
                });
            }
            if session.password.is_some() {
                warnings.push(ConfigWarning {
                    field: "session.password".to_string(),
                    message: "passwords are not used; authenticate with private_key_path or an ssh agent"
                        .to_string(),
                });
            }
            if let Some(interval) = &session.keep_alive_interval
                && parse_duration(interval).is_none()
            {
                warnings.push(ConfigWarning {
                    field: "session.keep_alive_interval".to_string(),
                    message: format!("'{interval}' is not a duration; keep-alive disabled"),
                });
            }
        }

        warnings
    }
}

/// Load and parse a configuration file.
pub fn load_config(path: &Path) -> Result<HerdConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    HerdConfig::from_toml(&text, path)
}

/// Parse a duration written either as `30s`/`1m 30s` or as `HH:MM:SS`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(duration) = humantime::parse_duration(trimmed) {
        return Some(duration);
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: u64 = parts[0].parse().ok()?;
    let minutes: u64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    let whole = hours.checked_mul(3600)?.checked_add(minutes * 60)?;
    Duration::from_secs(whole).checked_add(Duration::try_from_secs_f64(seconds).ok()?)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_hot_update_entry_class() -> String {
    "JenkinsBuild".to_string()
}

fn default_git() -> PathBuf {
    PathBuf::from("git")
}

fn default_cm() -> PathBuf {
    PathBuf::from("cm")
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> String {
    "30s".to_string()
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
