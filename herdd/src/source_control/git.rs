//! Git working copies.

use super::{SourceControl, StepRunner};
use async_trait::async_trait;
use herd_common::{Outcome, SourceControlKind, SyncStep};
use std::path::Path;
use tracing::info;

/// `git fetch` → `git checkout <branch>` → `git pull`.
#[derive(Debug)]
pub struct GitSourceControl {
    runner: StepRunner,
}

impl GitSourceControl {
    pub fn new(program: &Path, working_dir: &Path) -> Self {
        Self {
            runner: StepRunner::new(program, working_dir),
        }
    }
}

#[async_trait]
impl SourceControl for GitSourceControl {
    fn kind(&self) -> SourceControlKind {
        SourceControlKind::Git
    }

    async fn checkout(&self, branch: &str) -> Outcome {
        info!(
            "Checking out {} in {}",
            branch,
            self.runner.working_dir().display()
        );
        self.runner
            .run(&[
                (SyncStep::Fetch, vec!["fetch".to_string()]),
                (
                    SyncStep::Checkout,
                    vec!["checkout".to_string(), branch.to_string()],
                ),
                (SyncStep::Pull, vec!["pull".to_string()]),
            ])
            .await
    }

    async fn reset(&self, hard: bool) -> Outcome {
        let mut args = vec!["reset".to_string()];
        if hard {
            args.push("--hard".to_string());
        }
        self.runner.run(&[(SyncStep::Reset, args)]).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::source_control::test_support::{calls, fake_client};
    use herd_common::ErrorKind;

    #[tokio::test]
    async fn checkout_runs_fetch_checkout_pull() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path(), None);
        let git = GitSourceControl::new(&client, dir.path());

        let outcome = git.checkout("main").await;
        assert!(outcome.success, "{outcome}");
        assert_eq!(calls(dir.path()), vec!["fetch", "checkout main", "pull"]);
    }

    #[tokio::test]
    async fn failed_checkout_skips_pull() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path(), Some("checkout"));
        let git = GitSourceControl::new(&client, dir.path());

        let outcome = git.checkout("missing-branch").await;
        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ErrorKind::SourceControlSyncFailed));
        assert!(outcome.message.starts_with("checkout failed"));
        assert!(outcome.message.contains("error: checkout refused"));
        assert_eq!(calls(dir.path()), vec!["fetch", "checkout missing-branch"]);
    }

    #[tokio::test]
    async fn reset_hard_and_soft() {
        let dir = tempfile::tempdir().unwrap();
        let client = fake_client(dir.path(), None);
        let git = GitSourceControl::new(&client, dir.path());

        assert!(git.reset(true).await.success);
        assert!(git.reset(false).await.success);
        assert_eq!(calls(dir.path()), vec!["reset --hard", "reset"]);
    }
}
