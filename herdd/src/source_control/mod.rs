//! Source-control synchronization before a build.
//!
//! Each backend drives its command-line client as a subprocess. Steps run
//! strictly in order and the first failing step aborts the sequence; its
//! captured output becomes the failure message.

mod git;
mod plastic;

pub use git::GitSourceControl;
pub use plastic::PlasticSourceControl;

use async_trait::async_trait;
use herd_common::{
    ErrorKind, Outcome, ProjectDescriptor, SourceControlConfig, SourceControlKind, SyncStep,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const BUSY_MESSAGE: &str = "Another source control process is still running.";

/// A working copy that can be reset and moved to a branch.
#[async_trait]
pub trait SourceControl: Send + Sync {
    fn kind(&self) -> SourceControlKind;

    /// Bring the working copy to the tip of `branch`.
    async fn checkout(&self, branch: &str) -> Outcome;

    /// Discard local changes; `hard` also reverts the working tree.
    async fn reset(&self, hard: bool) -> Outcome;
}

/// Runs one client's steps in a working copy, one sequence at a time.
#[derive(Debug)]
pub(crate) struct StepRunner {
    program: PathBuf,
    working_dir: PathBuf,
    running: Mutex<()>,
}

impl StepRunner {
    pub(crate) fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
            running: Mutex::new(()),
        }
    }

    pub(crate) fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Run `steps` in order, rejecting the call if another sequence is active.
    pub(crate) async fn run(&self, steps: &[(SyncStep, Vec<String>)]) -> Outcome {
        let Ok(_running) = self.running.try_lock() else {
            warn!(
                "Rejected source control request in {}: already running",
                self.working_dir.display()
            );
            return Outcome::fail(ErrorKind::SourceControlSyncFailed, BUSY_MESSAGE);
        };

        let mut transcript = String::new();
        for (step, args) in steps {
            match self.run_step(*step, args).await {
                Ok(output) => transcript.push_str(&output),
                Err(outcome) => return outcome,
            }
        }
        Outcome::ok_with(transcript.trim_end().to_string())
    }

    async fn run_step(&self, step: SyncStep, args: &[String]) -> Result<String, Outcome> {
        info!(
            "[{}] {} {}",
            step,
            self.program.display(),
            args.join(" ")
        );
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Outcome::fail(
                    ErrorKind::SourceControlSyncFailed,
                    format!("{step} failed: could not run {}: {e}", self.program.display()),
                )
            })?;

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));
        debug!("[{}] output: {}", step, captured.trim_end());

        if output.status.success() {
            Ok(captured)
        } else {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            warn!("[{}] exited with {}", step, code);
            Err(Outcome::fail(
                ErrorKind::SourceControlSyncFailed,
                format!("{step} failed: {}", captured.trim_end()),
            ))
        }
    }
}

/// Build the adapter for a project, if its kind has one.
pub fn adapter_for(
    project: &ProjectDescriptor,
    programs: &SourceControlConfig,
) -> Option<Arc<dyn SourceControl>> {
    match project.source_control {
        SourceControlKind::None => None,
        SourceControlKind::Git => Some(Arc::new(GitSourceControl::new(
            &programs.git,
            &project.source_path,
        ))),
        SourceControlKind::Cm => Some(Arc::new(PlasticSourceControl::new(
            &programs.cm,
            &project.source_path,
        ))),
    }
}

/// Per-project adapters.
#[derive(Default)]
pub struct SourceControlRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn SourceControl>>>,
}

impl SourceControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for every project that has a kind and a branch.
    pub fn from_projects(projects: &[ProjectDescriptor], programs: &SourceControlConfig) -> Self {
        let registry = Self::new();
        for project in projects {
            if project.branch.is_none() {
                continue;
            }
            if let Some(adapter) = adapter_for(project, programs) {
                info!(
                    "Registered {} source control for {}",
                    adapter.kind(),
                    project.name
                );
                registry.register(&project.name, adapter);
            }
        }
        registry
    }

    pub fn register(&self, project: &str, adapter: Arc<dyn SourceControl>) {
        self.adapters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(project.to_string(), adapter);
    }

    pub fn get(&self, project: &str) -> Option<Arc<dyn SourceControl>> {
        self.adapters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(project)
            .cloned()
    }

    /// Hard reset, then checkout of the project's branch.
    ///
    /// Succeeds without doing anything when no adapter is registered.
    pub async fn sync(&self, project: &ProjectDescriptor) -> Outcome {
        let Some(adapter) = self.get(&project.name) else {
            warn!(
                "No source control registered for {}; building the working copy as is",
                project.name
            );
            return Outcome::ok_with("No source control registered.");
        };

        let reset = adapter.reset(true).await;
        if !reset.success {
            return reset;
        }
        match project.branch.as_deref() {
            Some(branch) => adapter.checkout(branch).await,
            None => reset,
        }
    }
}
