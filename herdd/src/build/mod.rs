//! Build coordinator.
//!
//! One request per project at a time: `Idle → Syncing → Building →
//! (Deploying) → Idle`. The running-builds map is the only record of
//! whether a project is busy. Entries are inserted with a single
//! check-and-insert and removed by a drop guard, so a failed or panicking
//! request never leaves its project locked.

pub mod command;
pub mod launcher;
pub mod output;
pub mod scripted;

pub use command::{CommandSpec, hot_update_command, player_command};
pub use launcher::{
    BuildProcess, OutputLine, OutputSource, OutputStream, ProcessLauncher, TokioLauncher,
};
pub use output::BuildLog;
pub use scripted::ScriptedLauncher;

use crate::events::{Notification, NotificationSink};
use crate::pipeline::DeploymentPipeline;
use crate::registry::ProjectRegistry;
use crate::source_control::{SourceControlRegistry, adapter_for};
use chrono::{DateTime, Utc};
use herd_common::{
    BuildKind, BuildTarget, ErrorKind, HerdConfig, Outcome, ProjectDescriptor,
    SourceControlConfig,
};
use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

// ── Running builds ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Syncing,
    Building,
    Deploying,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syncing => write!(f, "syncing"),
            Self::Building => write!(f, "building"),
            Self::Deploying => write!(f, "deploying"),
        }
    }
}

/// One in-flight request.
#[derive(Debug)]
struct BuildHandle {
    kind: Option<BuildKind>,
    target: Option<BuildTarget>,
    phase: BuildPhase,
    started_at: DateTime<Utc>,
    pid: Option<u32>,
    lines: Arc<AtomicU64>,
    kill: Option<oneshot::Sender<()>>,
}

/// Snapshot of a running request, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStatus {
    pub project: String,
    /// `None` for a deployment-only request.
    pub kind: Option<BuildKind>,
    pub target: Option<BuildTarget>,
    pub phase: BuildPhase,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
    pub lines: u64,
}

type RunningBuilds = Mutex<HashMap<String, BuildHandle>>;

/// Removes the project's entry when the request ends, however it ends.
struct RunningGuard<'a> {
    running: &'a RunningBuilds,
    project: String,
}

impl RunningGuard<'_> {
    fn update(&self, f: impl FnOnce(&mut BuildHandle)) {
        let mut running = lock(self.running);
        if let Some(handle) = running.get_mut(&self.project) {
            f(handle);
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        lock(self.running).remove(&self.project);
    }
}

fn lock(running: &RunningBuilds) -> MutexGuard<'_, HashMap<String, BuildHandle>> {
    running
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn busy(project: &str) -> Outcome {
    Outcome::fail(
        ErrorKind::ProjectBusy,
        format!("Project {project} is already running! Please check back another time."),
    )
}

// ── Settings ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Where log artifacts are written.
    pub logs_dir: PathBuf,
    pub hot_update_entry_class: String,
    /// Source control clients used when a branch switch creates an adapter.
    pub programs: SourceControlConfig,
}

impl BuildSettings {
    pub fn from_config(config: &HerdConfig) -> Self {
        Self {
            logs_dir: config.general.logs_dir.clone(),
            hot_update_entry_class: config.general.hot_update_entry_class.clone(),
            programs: config.source_control.clone(),
        }
    }
}

// ── Coordinator ──────────────────────────────────────────────────────────

pub struct BuildCoordinator {
    registry: Arc<ProjectRegistry>,
    source_control: Arc<SourceControlRegistry>,
    pipeline: Arc<DeploymentPipeline>,
    launcher: Arc<dyn ProcessLauncher>,
    sink: Arc<dyn NotificationSink>,
    settings: BuildSettings,
    running: RunningBuilds,
}

impl BuildCoordinator {
    pub fn new(
        registry: Arc<ProjectRegistry>,
        source_control: Arc<SourceControlRegistry>,
        pipeline: Arc<DeploymentPipeline>,
        launcher: Arc<dyn ProcessLauncher>,
        sink: Arc<dyn NotificationSink>,
        settings: BuildSettings,
    ) -> Self {
        Self {
            registry,
            source_control,
            pipeline,
            launcher,
            sink,
            settings,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Full player build.
    pub async fn request_build(&self, project: &str, target: BuildTarget) -> Outcome {
        self.run_build(project, target, BuildKind::Player).await
    }

    /// Hot-update build, followed by the project's deployment chain when
    /// the build tool exits cleanly.
    pub async fn request_hot_update_build(&self, project: &str, target: BuildTarget) -> Outcome {
        self.run_build(project, target, BuildKind::HotUpdate).await
    }

    /// Run the deployment chain on its own, holding the project's slot.
    pub async fn request_deployment(&self, project: &str) -> Outcome {
        if self.registry.find_project(project).is_none() {
            return unknown_project(project);
        }
        let guard = match self.reserve(project, None, None, BuildPhase::Deploying) {
            Ok(guard) => guard,
            Err(outcome) => return outcome,
        };
        let outcome = self.pipeline.run(project).await;
        drop(guard);
        outcome
    }

    /// Point the project at another branch. Refused while it is busy.
    pub fn switch_branch(&self, project: &str, branch: &str) -> Outcome {
        let branch = branch.trim();
        if branch.is_empty() {
            return Outcome::fail(ErrorKind::ConfigInvalid, "Branch name must not be empty.");
        }
        let Some(descriptor) = self.registry.find_project(project) else {
            return unknown_project(project);
        };

        let running = lock(&self.running);
        if running.contains_key(project) {
            return busy(project);
        }
        self.registry.set_branch(project, branch);
        if self.source_control.get(project).is_none()
            && let Some(adapter) = adapter_for(&descriptor, &self.settings.programs)
        {
            info!(
                "Registered {} source control for {}",
                adapter.kind(),
                project
            );
            self.source_control.register(project, adapter);
        }
        drop(running);

        info!("Project {} switched to branch {}", project, branch);
        Outcome::ok_with(format!("Project {project} now builds branch {branch}."))
    }

    pub fn running_builds(&self) -> Vec<BuildStatus> {
        let running = lock(&self.running);
        let mut statuses: Vec<BuildStatus> = running
            .iter()
            .map(|(project, handle)| BuildStatus {
                project: project.clone(),
                kind: handle.kind,
                target: handle.target,
                phase: handle.phase,
                started_at: handle.started_at,
                pid: handle.pid,
                lines: handle.lines.load(Ordering::SeqCst),
            })
            .collect();
        statuses.sort_by(|a, b| a.project.cmp(&b.project));
        statuses
    }

    pub fn is_busy(&self, project: &str) -> bool {
        lock(&self.running).contains_key(project)
    }

    /// Kill every running build process. Returns how many were signalled.
    pub fn shutdown(&self) -> usize {
        let mut running = lock(&self.running);
        let mut killed = 0;
        for (project, handle) in running.iter_mut() {
            if let Some(kill) = handle.kill.take() {
                warn!("Stopping build of {} (pid {:?})", project, handle.pid);
                if kill.send(()).is_ok() {
                    killed += 1;
                }
            }
        }
        killed
    }

    fn reserve(
        &self,
        project: &str,
        kind: Option<BuildKind>,
        target: Option<BuildTarget>,
        phase: BuildPhase,
    ) -> Result<RunningGuard<'_>, Outcome> {
        let mut running = lock(&self.running);
        match running.entry(project.to_string()) {
            Entry::Occupied(_) => {
                info!("Rejected request for {}: already running", project);
                Err(busy(project))
            }
            Entry::Vacant(slot) => {
                slot.insert(BuildHandle {
                    kind,
                    target,
                    phase,
                    started_at: Utc::now(),
                    pid: None,
                    lines: Arc::new(AtomicU64::new(0)),
                    kill: None,
                });
                Ok(RunningGuard {
                    running: &self.running,
                    project: project.to_string(),
                })
            }
        }
    }

    async fn run_build(&self, name: &str, target: BuildTarget, kind: BuildKind) -> Outcome {
        let Some(project) = self.registry.find_project(name) else {
            return unknown_project(name);
        };
        let Some(tool) = self.registry.find_tool_path(&project.tool_version) else {
            return Outcome::fail(
                ErrorKind::UnknownToolVersion,
                format!(
                    "Tool version {} of project {} is not installed.",
                    project.tool_version, name
                ),
            );
        };

        let guard = match self.reserve(name, Some(kind), Some(target), BuildPhase::Syncing) {
            Ok(guard) => guard,
            Err(outcome) => return outcome,
        };
        // The branch may have changed between lookup and reservation.
        let project = self.registry.find_project(name).unwrap_or(project);
        let notify_target = project.notification_target.clone();

        let synced = self.source_control.sync(&project).await;
        if !synced.success {
            error!("Source control sync of {} failed: {}", name, synced.message);
            self.sink.notify(
                notify_target.as_deref(),
                Notification::failure(format!("{name} {kind} build failed"), &synced.message),
            );
            return synced;
        }

        let started_unix = Utc::now().timestamp();
        let spec = match kind {
            BuildKind::Player => player_command(&tool, &project, target, started_unix),
            BuildKind::HotUpdate => hot_update_command(
                &tool,
                &project,
                target,
                &self.settings.hot_update_entry_class,
            ),
        };

        let outcome = self
            .execute(&guard, &project, target, kind, &spec, started_unix)
            .await;
        if !outcome.success || kind == BuildKind::Player {
            return outcome;
        }

        guard.update(|handle| handle.phase = BuildPhase::Deploying);
        let deployed = self.pipeline.run(name).await;
        if !deployed.success {
            return deployed;
        }
        Outcome::ok_with(format!("{} {}", outcome.message, deployed.message))
    }

    /// Launch the tool, stream its output and interpret the exit code.
    async fn execute(
        &self,
        guard: &RunningGuard<'_>,
        project: &ProjectDescriptor,
        target: BuildTarget,
        kind: BuildKind,
        spec: &CommandSpec,
        started_unix: i64,
    ) -> Outcome {
        let name = project.name.as_str();
        let notify_target = project.notification_target.as_deref();
        let command_line = spec.display();
        let started = Instant::now();

        let counter = Arc::new(AtomicU64::new(0));
        guard.update(|handle| {
            handle.phase = BuildPhase::Building;
            handle.lines = counter.clone();
        });
        let mut log = BuildLog::new(name, target, kind, started_unix, counter);
        log.start(&command_line);

        info!("Starting {} {} build of {}: {}", target, kind, name, command_line);
        self.sink.notify(
            notify_target,
            Notification::info(
                format!("{name} {target} {kind} build started"),
                command_line.clone(),
            ),
        );

        let mut process = match self.launcher.launch(spec).await {
            Ok(process) => process,
            Err(e) => {
                error!("Failed to start build tool for {}: {}", name, e);
                let message = format!(
                    "Failed to start build tool {}: {}",
                    spec.program.display(),
                    e
                );
                self.sink.notify(
                    notify_target,
                    Notification::failure(format!("{name} {kind} build failed"), &message),
                );
                return Outcome::fail(ErrorKind::ProcessStartFailed, message);
            }
        };

        let (kill_tx, mut kill_rx) = oneshot::channel();
        let pid = process.id();
        guard.update(|handle| {
            handle.pid = pid;
            handle.kill = Some(kill_tx);
        });

        let mut output = process.take_output();
        let mut kill_seen = false;
        loop {
            tokio::select! {
                line = next_line(&mut output) => match line {
                    Some(line) => {
                        if let Some(formatted) = log.record(&line.text) {
                            info!("{}", formatted);
                            self.sink.log_line(&formatted);
                        }
                    }
                    None => break,
                },
                signal = &mut kill_rx, if !kill_seen => {
                    kill_seen = true;
                    if signal.is_ok() {
                        warn!("Killing build tool for {} (pid {:?})", name, pid);
                        if let Err(e) = process.kill().await {
                            error!("Failed to kill build tool for {}: {}", name, e);
                        }
                    }
                }
            }
        }

        let exit_code = match process.wait().await {
            Ok(code) => code,
            Err(e) => {
                error!("Failed to wait for build tool of {}: {}", name, e);
                None
            }
        };
        log.finish(exit_code);
        let elapsed = humantime::format_duration(Duration::from_secs(started.elapsed().as_secs()));

        match log.persist(&self.settings.logs_dir).await {
            Ok(path) => info!("Build log of {} written to {}", name, path.display()),
            Err(e) => error!(
                "Failed to write build log {} under {}: {}",
                log.artifact_name(),
                self.settings.logs_dir.display(),
                e
            ),
        }

        match exit_code {
            Some(0) => {
                let message = format!(
                    "{name} {target} {kind} build finished in {elapsed} ({} lines).",
                    log.line_count()
                );
                info!("{}", message);
                self.sink.notify(
                    notify_target,
                    Notification::success(format!("{name} {kind} build finished"), &message),
                );
                Outcome::ok_with(message)
            }
            code => {
                let message = match code {
                    Some(code) => format!("Build tool exited with exit code {code}"),
                    None => "Build tool was terminated without an exit code".to_string(),
                };
                warn!("{} {} build of {} failed: {}", target, kind, name, message);
                self.sink.notify(
                    notify_target,
                    Notification::failure(
                        format!("{name} {kind} build failed"),
                        format!("{message} after {elapsed}"),
                    ),
                );
                Outcome::fail(ErrorKind::NonZeroExitCode, message)
            }
        }
    }
}

async fn next_line(output: &mut Option<OutputStream>) -> Option<OutputLine> {
    match output {
        Some(stream) => stream.recv().await,
        None => None,
    }
}

fn unknown_project(project: &str) -> Outcome {
    Outcome::fail(
        ErrorKind::UnknownProject,
        format!("Project {project} not found."),
    )
}
