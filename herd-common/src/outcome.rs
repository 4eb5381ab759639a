//! Uniform success/message result returned by every public operation.

use crate::errors::{ErrorCategory, ErrorKind};
use serde::{Deserialize, Serialize};

/// Identifies the deployment action that stopped a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAction {
    /// Zero-based position in the project's deployment chain.
    pub index: usize,
    /// Action kind as configured (e.g. `upload`).
    pub action: String,
    /// Kind reported by the action itself.
    pub cause: Option<ErrorKind>,
}

/// Result of a build, sync, session, transfer or deployment operation.
///
/// Expected failures are values, never panics: `success` is false,
/// `message` is fit for direct display and `kind` classifies the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_action: Option<FailedAction>,
}

/// Catalog details for a failed [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnosis {
    pub code: &'static str,
    pub category: ErrorCategory,
    /// Retrying later can succeed without a config change.
    pub retryable: bool,
    pub remediation: &'static str,
}

impl std::fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error {}", self.category, self.code)?;
        if self.retryable {
            write!(f, ", retry later")?;
        }
        write!(f, ": {}", self.remediation)
    }
}

impl Outcome {
    pub fn ok() -> Self {
        Self::ok_with(String::new())
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            kind: None,
            failed_action: None,
        }
    }

    pub fn fail(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            kind: Some(kind),
            failed_action: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.success
    }

    /// Catalog details for a failure. A failed deployment action is
    /// diagnosed by its cause when the action reported one.
    pub fn diagnosis(&self) -> Option<Diagnosis> {
        if self.success {
            return None;
        }
        let kind = self
            .failed_action
            .as_ref()
            .and_then(|action| action.cause)
            .or(self.kind)?;
        Some(Diagnosis {
            code: kind.code(),
            category: kind.category(),
            retryable: kind.is_transient(),
            remediation: kind.remediation(),
        })
    }

    /// Re-tag a failure as the given deployment action's failure, keeping
    /// the message and remembering the original kind as the cause.
    pub fn into_failed_action(mut self, index: usize, action: impl Into<String>) -> Self {
        if self.success {
            return self;
        }
        self.failed_action = Some(FailedAction {
            index,
            action: action.into(),
            cause: self.kind,
        });
        self.kind = Some(ErrorKind::DeploymentActionFailed);
        self
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.success, self.kind) {
            (true, _) if self.message.is_empty() => write!(f, "ok"),
            (true, _) => write!(f, "ok: {}", self.message),
            (false, Some(kind)) => write!(f, "failed [{}]: {}", kind.code(), self.message),
            (false, None) => write!(f, "failed: {}", self.message),
        }
    }
}
