//! Per-project deployment chains.
//!
//! Each project's action specs are resolved once when the pipeline is
//! built. A run executes them in order and stops at the first failure.

mod action;

pub use action::{ActionContext, ActionError, ActionFactory, DeploymentAction};

use crate::events::{Notification, NotificationSink};
use crate::registry::ProjectRegistry;
use crate::session::SecureSession;
use crate::transfer::TransferChannel;
use herd_common::{ErrorKind, Outcome, PathTemplate};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const NO_ACTIONS_MESSAGE: &str = "No deployment action defined.";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("project '{project}', deployment action {index}: {source}")]
pub struct PipelineError {
    pub project: String,
    pub index: usize,
    #[source]
    pub source: ActionError,
}

struct ProjectChain {
    notification_target: Option<String>,
    actions: Vec<DeploymentAction>,
}

pub struct DeploymentPipeline {
    chains: HashMap<String, ProjectChain>,
    ctx: ActionContext,
    sink: Arc<dyn NotificationSink>,
}

impl DeploymentPipeline {
    pub fn build(
        registry: &ProjectRegistry,
        factory: &ActionFactory,
        transfer: Arc<TransferChannel>,
        session: Option<Arc<SecureSession>>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, PipelineError> {
        let mut chains = HashMap::new();
        for project in registry.projects() {
            let template = PathTemplate::for_project(&project);
            let mut actions = Vec::with_capacity(project.deployment.len());
            for (index, spec) in project.deployment.iter().enumerate() {
                let action = factory
                    .create(spec, &template)
                    .map_err(|source| PipelineError {
                        project: project.name.clone(),
                        index,
                        source,
                    })?;
                if let DeploymentAction::Unsupported { kind } = &action {
                    warn!(
                        "Project {} action {} has unknown kind '{}'; it will fail when reached",
                        project.name, index, kind
                    );
                }
                actions.push(action);
            }
            chains.insert(
                project.name.clone(),
                ProjectChain {
                    notification_target: project.notification_target.clone(),
                    actions,
                },
            );
        }

        Ok(Self {
            chains,
            ctx: ActionContext { transfer, session },
            sink,
        })
    }

    /// Resolved actions for `project`.
    pub fn actions(&self, project: &str) -> Option<&[DeploymentAction]> {
        self.chains.get(project).map(|c| c.actions.as_slice())
    }

    pub async fn run(&self, project: &str) -> Outcome {
        let Some(chain) = self.chains.get(project) else {
            return Outcome::fail(
                ErrorKind::UnknownProject,
                format!("Project {project} not found."),
            );
        };
        if chain.actions.is_empty() {
            info!("{}: {}", project, NO_ACTIONS_MESSAGE);
            return Outcome::ok_with(NO_ACTIONS_MESSAGE);
        }

        let target = chain.notification_target.as_deref();
        let total = chain.actions.len();
        self.sink.notify(
            target,
            Notification::info(
                format!("Deploying {project}"),
                format!("{total} action(s)"),
            ),
        );

        for (index, action) in chain.actions.iter().enumerate() {
            info!(
                "[{}] deployment step {}/{}: {}",
                project,
                index + 1,
                total,
                action.describe()
            );
            let outcome = action.run(&self.ctx).await;
            if !outcome.success {
                warn!(
                    "[{}] deployment step {} ({}) failed: {}",
                    project,
                    index + 1,
                    action.kind_name(),
                    outcome.message
                );
                self.sink.notify(
                    target,
                    Notification::failure(
                        format!("Deployment of {project} failed"),
                        format!(
                            "Step {} ({}): {}",
                            index + 1,
                            action.kind_name(),
                            outcome.message
                        ),
                    ),
                );
                return outcome.into_failed_action(index, action.kind_name());
            }
        }

        self.sink.notify(
            target,
            Notification::success(
                format!("Deployment of {project} finished"),
                format!("{total} action(s) completed"),
            ),
        );
        Outcome::ok_with(format!(
            "Deployment of {project} finished ({total} action(s))."
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::session::MockTransport;
    use herd_common::{HerdConfig, SessionConfig};
    use std::path::Path;

    fn registry(deployment: &str) -> ProjectRegistry {
        let text = format!(
            r#"
[tools]
"2022.3.10f1" = "/opt/unity"

[[projects]]
name = "Game"
source_path = "/work/game"
tool_version = "2022.3.10f1"
addressable_build_output = "/builds/game/ServerData"
{deployment}
"#
        );
        let config = HerdConfig::from_toml(&text, Path::new("test.toml")).unwrap();
        ProjectRegistry::initialize(&config).unwrap()
    }

    fn pipeline(registry: &ProjectRegistry, mock: &MockTransport) -> DeploymentPipeline {
        let mut config = SessionConfig::new("deploy.example.com", "deploy");
        config.expected_fingerprints = vec![mock.fingerprint()];
        let session = Arc::new(SecureSession::new(config, Arc::new(mock.clone())));
        let transfer = Arc::new(TransferChannel::new(Some(session.clone())));
        DeploymentPipeline::build(
            registry,
            &ActionFactory::with_defaults(),
            transfer,
            Some(session),
            Arc::new(EventBus::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn zero_actions_is_informational_success() {
        let registry = registry("");
        let pipeline = pipeline(&registry, &MockTransport::new());
        let outcome = pipeline.run("Game").await;
        assert!(outcome.success);
        assert_eq!(outcome.message, NO_ACTIONS_MESSAGE);
    }

    #[tokio::test]
    async fn unknown_project_fails() {
        let registry = registry("");
        let pipeline = pipeline(&registry, &MockTransport::new());
        let outcome = pipeline.run("Other").await;
        assert_eq!(outcome.kind, Some(ErrorKind::UnknownProject));
    }

    #[tokio::test]
    async fn first_failure_short_circuits() {
        let registry = registry(
            r#"
[[projects.deployment]]
kind = "remote-command"
command = "systemctl stop game"

[[projects.deployment]]
kind = "ftp-mirror"

[[projects.deployment]]
kind = "remote-command"
command = "systemctl start game"
"#,
        );
        let mock = MockTransport::new();
        let pipeline = pipeline(&registry, &mock);

        let outcome = pipeline.run("Game").await;
        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ErrorKind::DeploymentActionFailed));
        let second = pipeline.actions("Game").unwrap()[1].run(&pipeline.ctx).await;
        assert_eq!(outcome.message, second.message);
        let failed = outcome.failed_action.unwrap();
        assert_eq!(failed.index, 1);
        assert_eq!(failed.action, "ftp-mirror");
        assert_eq!(failed.cause, Some(ErrorKind::UnsupportedOperation));
        assert_eq!(mock.commands(), vec!["systemctl stop game"]);
    }

    #[tokio::test]
    async fn templates_are_resolved_at_build_time() {
        let registry = registry(
            r#"
[[projects.deployment]]
kind = "upload"
local_path = "{addressableBuildOutput}"
remote_path = "/srv/cdn/{projectName}"
"#,
        );
        let pipeline = pipeline(&registry, &MockTransport::new());
        assert_eq!(
            pipeline.actions("Game").unwrap(),
            &[DeploymentAction::Upload {
                local_path: "/builds/game/ServerData".into(),
                remote_path: "/srv/cdn/Game".to_string(),
            }]
        );
    }

    #[test]
    fn missing_parameter_fails_the_build() {
        let registry = registry(
            r#"
[[projects.deployment]]
kind = "remote-command"
"#,
        );
        let transfer = Arc::new(TransferChannel::new(None));
        let err = DeploymentPipeline::build(
            &registry,
            &ActionFactory::with_defaults(),
            transfer,
            None,
            Arc::new(EventBus::default()),
        )
        .err()
        .unwrap();
        assert_eq!(err.project, "Game");
        assert_eq!(err.index, 0);
        assert!(err.to_string().contains("command"));
    }

    #[tokio::test]
    async fn all_actions_run_in_order_on_success() {
        let mut registry_text = String::new();
        for step in ["one", "two", "three"] {
            registry_text.push_str(&format!(
                "[[projects.deployment]]\nkind = \"remote-command\"\ncommand = \"echo {step}\"\n"
            ));
        }
        let registry = registry(&registry_text);
        let mock = MockTransport::new();
        let pipeline = pipeline(&registry, &mock);

        let outcome = pipeline.run("Game").await;
        assert!(outcome.success, "{outcome}");
        assert_eq!(mock.commands(), vec!["echo one", "echo two", "echo three"]);
    }
}
