//! Error kinds, their codes and remediation hints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Subsystem an error kind belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Config,
    Session,
    Build,
    SourceControl,
    Transfer,
    Deployment,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Session => write!(f, "session"),
            Self::Build => write!(f, "build"),
            Self::SourceControl => write!(f, "source_control"),
            Self::Transfer => write!(f, "transfer"),
            Self::Deployment => write!(f, "deployment"),
        }
    }
}

/// Every expected failure an operation can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // Config (E001-E099)
    // =========================================================================
    /// Configuration is missing, unreadable or invalid
    ConfigInvalid,
    /// No project with the requested name
    UnknownProject,
    /// Project references a tool version with no installation path
    UnknownToolVersion,

    // =========================================================================
    // Session (E100-E199)
    // =========================================================================
    /// Remote host identity is not in the fingerprint allow-list
    UntrustedRemoteIdentity,
    /// Could not connect or authenticate to the remote host
    SessionConnectFailed,
    /// Remote command could not be executed
    RemoteCommandFailed,

    // =========================================================================
    // Build (E200-E299)
    // =========================================================================
    /// Project already has a build in flight
    ProjectBusy,
    /// Build tool process could not be spawned
    ProcessStartFailed,
    /// Build tool exited with a non-zero code
    NonZeroExitCode,

    // =========================================================================
    // Source control (E300-E399)
    // =========================================================================
    /// A fetch/checkout/pull/reset step failed
    SourceControlSyncFailed,

    // =========================================================================
    // Transfer (E400-E499)
    // =========================================================================
    /// Another upload to the same remote path is outstanding
    TransferAlreadyInFlight,
    /// Local path is neither a file nor a directory
    InvalidLocalPath,
    /// Upload failed or was cancelled
    TransferFailed,
    /// Local directory could not be archived
    ArchiveCreationFailed,
    /// Archive was uploaded but could not be extracted remotely
    RemoteExtractionFailed,

    // =========================================================================
    // Deployment (E500-E599)
    // =========================================================================
    /// A deployment action failed; remaining actions were skipped
    DeploymentActionFailed,
    /// Operation or action kind is not supported
    UnsupportedOperation,
}

impl ErrorKind {
    /// Stable catalog code, e.g. `HERD-E201`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "HERD-E001",
            Self::UnknownProject => "HERD-E002",
            Self::UnknownToolVersion => "HERD-E003",
            Self::UntrustedRemoteIdentity => "HERD-E100",
            Self::SessionConnectFailed => "HERD-E101",
            Self::RemoteCommandFailed => "HERD-E102",
            Self::ProjectBusy => "HERD-E200",
            Self::ProcessStartFailed => "HERD-E201",
            Self::NonZeroExitCode => "HERD-E202",
            Self::SourceControlSyncFailed => "HERD-E300",
            Self::TransferAlreadyInFlight => "HERD-E400",
            Self::InvalidLocalPath => "HERD-E401",
            Self::TransferFailed => "HERD-E402",
            Self::ArchiveCreationFailed => "HERD-E403",
            Self::RemoteExtractionFailed => "HERD-E404",
            Self::DeploymentActionFailed => "HERD-E500",
            Self::UnsupportedOperation => "HERD-E501",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigInvalid | Self::UnknownProject | Self::UnknownToolVersion => {
                ErrorCategory::Config
            }
            Self::UntrustedRemoteIdentity
            | Self::SessionConnectFailed
            | Self::RemoteCommandFailed => ErrorCategory::Session,
            Self::ProjectBusy | Self::ProcessStartFailed | Self::NonZeroExitCode => {
                ErrorCategory::Build
            }
            Self::SourceControlSyncFailed => ErrorCategory::SourceControl,
            Self::TransferAlreadyInFlight
            | Self::InvalidLocalPath
            | Self::TransferFailed
            | Self::ArchiveCreationFailed
            | Self::RemoteExtractionFailed => ErrorCategory::Transfer,
            Self::DeploymentActionFailed | Self::UnsupportedOperation => {
                ErrorCategory::Deployment
            }
        }
    }

    /// Whether retrying the same request later can succeed without a config change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProjectBusy
                | Self::TransferAlreadyInFlight
                | Self::SessionConnectFailed
                | Self::RemoteCommandFailed
                | Self::TransferFailed
        )
    }

    /// Operator-facing hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "Fix the configuration file and restart",
            Self::UnknownProject => "Check the project name against `herdd projects`",
            Self::UnknownToolVersion => "Add the tool version to the [tools] table",
            Self::UntrustedRemoteIdentity => {
                "Verify the host key out of band and add its SHA256 fingerprint to session.expected_fingerprints"
            }
            Self::SessionConnectFailed => "Check the session address, user and private key",
            Self::RemoteCommandFailed => "Check connectivity to the remote host",
            Self::ProjectBusy => "Wait for the running build of this project to finish",
            Self::ProcessStartFailed => "Check the tool installation path for this version",
            Self::NonZeroExitCode => "Inspect the build log artifact for errors",
            Self::SourceControlSyncFailed => "Inspect the working copy and the branch name",
            Self::TransferAlreadyInFlight => "Wait for the pending upload to the same path",
            Self::InvalidLocalPath => "Check the deployment action's local path",
            Self::TransferFailed => "Check remote permissions and free space",
            Self::ArchiveCreationFailed => "Check local permissions next to the uploaded directory",
            Self::RemoteExtractionFailed => "Ensure `unzip` is installed on the remote host",
            Self::DeploymentActionFailed => "Inspect the failing deployment action",
            Self::UnsupportedOperation => "Use a supported operation or action kind",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConfigInvalid => "ConfigInvalid",
            Self::UnknownProject => "UnknownProject",
            Self::UnknownToolVersion => "UnknownToolVersion",
            Self::UntrustedRemoteIdentity => "UntrustedRemoteIdentity",
            Self::SessionConnectFailed => "SessionConnectFailed",
            Self::RemoteCommandFailed => "RemoteCommandFailed",
            Self::ProjectBusy => "ProjectBusy",
            Self::ProcessStartFailed => "ProcessStartFailed",
            Self::NonZeroExitCode => "NonZeroExitCode",
            Self::SourceControlSyncFailed => "SourceControlSyncFailed",
            Self::TransferAlreadyInFlight => "TransferAlreadyInFlight",
            Self::InvalidLocalPath => "InvalidLocalPath",
            Self::TransferFailed => "TransferFailed",
            Self::ArchiveCreationFailed => "ArchiveCreationFailed",
            Self::RemoteExtractionFailed => "RemoteExtractionFailed",
            Self::DeploymentActionFailed => "DeploymentActionFailed",
            Self::UnsupportedOperation => "UnsupportedOperation",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Sub-step of a source-control synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Fetch,
    Checkout,
    Pull,
    Reset,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Checkout => write!(f, "checkout"),
            Self::Pull => write!(f, "pull"),
            Self::Reset => write!(f, "reset"),
        }
    }
}
