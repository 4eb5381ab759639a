//! Deployment actions and the factory that resolves them from config.

use crate::session::SecureSession;
use crate::transfer::TransferChannel;
use herd_common::{ActionSpec, ErrorKind, Outcome, PathTemplate};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("action '{kind}' requires parameter '{param}'")]
    MissingParameter { kind: String, param: &'static str },
}

/// A resolved deployment step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentAction {
    Upload {
        local_path: PathBuf,
        remote_path: String,
    },
    RemoteCommand {
        command: String,
    },
    /// A configured kind with no constructor; fails when reached.
    Unsupported {
        kind: String,
    },
}

/// What actions may use.
pub struct ActionContext {
    pub transfer: Arc<TransferChannel>,
    pub session: Option<Arc<SecureSession>>,
}

impl DeploymentAction {
    pub fn kind_name(&self) -> &str {
        match self {
            Self::Upload { .. } => "upload",
            Self::RemoteCommand { .. } => "remote-command",
            Self::Unsupported { kind } => kind,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Upload {
                local_path,
                remote_path,
            } => format!("upload {} to {}", local_path.display(), remote_path),
            Self::RemoteCommand { command } => format!("run `{command}`"),
            Self::Unsupported { kind } => format!("unsupported action '{kind}'"),
        }
    }

    pub async fn run(&self, ctx: &ActionContext) -> Outcome {
        match self {
            Self::Upload {
                local_path,
                remote_path,
            } => ctx.transfer.upload(local_path, remote_path).await,
            Self::RemoteCommand { command } => match &ctx.session {
                Some(session) => session.run_command(command).await,
                None => Outcome::fail(
                    ErrorKind::SessionConnectFailed,
                    "No remote session is configured.",
                ),
            },
            Self::Unsupported { kind } => Outcome::fail(
                ErrorKind::UnsupportedOperation,
                format!("Deployment action '{kind}' is not supported."),
            ),
        }
    }
}

type Constructor = fn(&ActionSpec, &PathTemplate) -> Result<DeploymentAction, ActionError>;

/// Maps configured kind strings to constructors.
pub struct ActionFactory {
    constructors: HashMap<String, Constructor>,
}

impl Default for ActionFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ActionFactory {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// `upload` (also `sftp-upload`, `SftpUploadAction`) and `remote-command`.
    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();
        factory.register("upload", build_upload);
        factory.register("sftp-upload", build_upload);
        factory.register("SftpUploadAction", build_upload);
        factory.register("remote-command", build_remote_command);
        factory
    }

    /// Kinds are matched case-insensitively.
    pub fn register(&mut self, kind: &str, constructor: Constructor) {
        self.constructors
            .insert(kind.to_ascii_lowercase(), constructor);
    }

    pub fn knows(&self, kind: &str) -> bool {
        self.constructors.contains_key(&kind.to_ascii_lowercase())
    }

    /// Unknown kinds resolve to [`DeploymentAction::Unsupported`].
    pub fn create(
        &self,
        spec: &ActionSpec,
        template: &PathTemplate,
    ) -> Result<DeploymentAction, ActionError> {
        match self.constructors.get(&spec.kind.to_ascii_lowercase()) {
            Some(constructor) => constructor(spec, template),
            None => Ok(DeploymentAction::Unsupported {
                kind: spec.kind.clone(),
            }),
        }
    }
}

fn required<'a>(spec: &'a ActionSpec, param: &'static str) -> Result<&'a str, ActionError> {
    spec.param(param)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ActionError::MissingParameter {
            kind: spec.kind.clone(),
            param,
        })
}

fn build_upload(spec: &ActionSpec, template: &PathTemplate) -> Result<DeploymentAction, ActionError> {
    let local = template.resolve(required(spec, "local_path")?);
    let remote = template.resolve(required(spec, "remote_path")?);
    Ok(DeploymentAction::Upload {
        local_path: PathBuf::from(shellexpand::tilde(&local).as_ref()),
        remote_path: remote,
    })
}

fn build_remote_command(
    spec: &ActionSpec,
    template: &PathTemplate,
) -> Result<DeploymentAction, ActionError> {
    Ok(DeploymentAction::RemoteCommand {
        command: template.resolve(required(spec, "command")?),
    })
}
