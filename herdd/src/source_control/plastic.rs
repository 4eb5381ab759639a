//! Plastic SCM workspaces driven through the `cm` client.

use super::{SourceControl, StepRunner};
use async_trait::async_trait;
use herd_common::{Outcome, SourceControlKind, SyncStep};
use std::path::Path;
use tracing::info;

/// Centralized backend: `update` stands in for fetch and pull.
#[derive(Debug)]
pub struct PlasticSourceControl {
    runner: StepRunner,
}

impl PlasticSourceControl {
    pub fn new(program: &Path, working_dir: &Path) -> Self {
        Self {
            runner: StepRunner::new(program, working_dir),
        }
    }
}

#[async_trait]
impl SourceControl for PlasticSourceControl {
    fn kind(&self) -> SourceControlKind {
        SourceControlKind::Cm
    }

    async fn checkout(&self, branch: &str) -> Outcome {
        info!(
            "Switching {} to branch {}",
            self.runner.working_dir().display(),
            branch
        );
        self.runner
            .run(&[
                (SyncStep::Fetch, vec!["update".to_string()]),
                (
                    SyncStep::Checkout,
                    vec!["switchtobranch".to_string(), branch.to_string()],
                ),
                (SyncStep::Pull, vec!["update".to_string()]),
            ])
            .await
    }

    async fn reset(&self, hard: bool) -> Outcome {
        let args = if hard {
            vec!["undo".to_string(), "-r".to_string(), ".".to_string()]
        } else {
            vec![
                "unco".to_string(),
                "--all".to_string(),
                "--keepchanges".to_string(),
            ]
        };
        self.runner.run(&[(SyncStep::Reset, args)]).await
    }
}
