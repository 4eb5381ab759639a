//! Common types used across Herd components.

use crate::config::{ActionSpec, ProjectConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Logical platform a build is produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildTarget {
    Windows,
    Windows64,
    Linux,
    Mac,
    WindowsServer,
    LinuxServer,
    Android,
    #[serde(rename = "iOS")]
    Ios,
}

impl BuildTarget {
    /// Every target, in declaration order.
    pub const ALL: [BuildTarget; 8] = [
        Self::Windows,
        Self::Windows64,
        Self::Linux,
        Self::Mac,
        Self::WindowsServer,
        Self::LinuxServer,
        Self::Android,
        Self::Ios,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Windows64 => "Windows64",
            Self::Linux => "Linux",
            Self::Mac => "Mac",
            Self::WindowsServer => "WindowsServer",
            Self::LinuxServer => "LinuxServer",
            Self::Android => "Android",
            Self::Ios => "iOS",
        }
    }
}

impl std::fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a target name is not one of [`BuildTarget::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown build target '{0}'")]
pub struct UnknownTarget(pub String);

impl FromStr for BuildTarget {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|target| target.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownTarget(s.to_string()))
    }
}

/// What a build run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildKind {
    /// Full player executable.
    Player,
    /// Incrementally deployable content patch.
    HotUpdate,
}

impl BuildKind {
    /// Label used in log artifact names.
    pub fn artifact_label(&self) -> &'static str {
        match self {
            Self::Player => "PlayerBuild",
            Self::HotUpdate => "HotUpdateBuild",
        }
    }
}

impl std::fmt::Display for BuildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Player => write!(f, "player"),
            Self::HotUpdate => write!(f, "hot update"),
        }
    }
}

/// Source-control backend a project is synchronized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceControlKind {
    #[default]
    None,
    /// Distributed, `git` command line.
    Git,
    /// Centralized, Plastic SCM `cm` command line.
    #[serde(alias = "plastic")]
    Cm,
}

impl std::fmt::Display for SourceControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Git => write!(f, "git"),
            Self::Cm => write!(f, "cm"),
        }
    }
}

/// A named, independently buildable project.
///
/// Immutable after load; `branch` only changes through the coordinator's
/// branch switch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectDescriptor {
    pub name: String,
    pub source_path: PathBuf,
    pub tool_version: String,
    pub player_build_output: PathBuf,
    pub addressable_build_output: PathBuf,
    pub source_control: SourceControlKind,
    pub branch: Option<String>,
    pub notification_target: Option<String>,
    pub deployment: Vec<ActionSpec>,
}

impl From<&ProjectConfig> for ProjectDescriptor {
    fn from(config: &ProjectConfig) -> Self {
        Self {
            name: config.name.clone(),
            source_path: config.source_path.clone(),
            tool_version: config.tool_version.clone(),
            player_build_output: config.player_build_output.clone(),
            addressable_build_output: config.addressable_build_output.clone(),
            source_control: config.source_control,
            branch: config
                .branch
                .as_ref()
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty()),
            notification_target: config
                .notification_target
                .as_ref()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            deployment: config.deployment.clone(),
        }
    }
}

impl std::fmt::Display for ProjectDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, tool {})",
            self.name,
            self.source_path.display(),
            self.tool_version
        )
    }
}
