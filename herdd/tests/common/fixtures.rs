use herd_common::HerdConfig;
use herdd::build::ScriptedLauncher;
use herdd::session::MockTransport;
use herdd::{ActionFactory, Components, EventBus, Orchestrator};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// `herd.toml` with a `Game` project (no source control) and the given tail.
pub fn herd_config(logs_dir: &Path, tail: &str) -> HerdConfig {
    let text = format!(
        r#"
[general]
logs_dir = "{}"

[tools]
"2022.3.10f1" = "/opt/unity/2022.3.10f1/Editor/Unity"

[notifications]
default_target = "builds"
log_target = "build-log"

[[projects]]
name = "Game"
source_path = "/work/game"
tool_version = "2022.3.10f1"
player_build_output = "/builds/game"
notification_target = "game-builds"
{tail}
"#,
        logs_dir.display()
    );
    HerdConfig::from_toml(&text, Path::new("herd.toml")).unwrap()
}

/// An orchestrator over a mock transport and a scripted launcher.
pub struct TestHerd {
    pub orchestrator: Orchestrator,
    pub mock: MockTransport,
    pub launcher: Arc<ScriptedLauncher>,
    pub events: EventBus,
    pub logs_dir: TempDir,
}

impl TestHerd {
    /// `tail` is appended to the `Game` project; a `[session]` trusting the
    /// mock host is added when `with_session` is set.
    pub fn new(tail: &str, launcher: ScriptedLauncher, mock: MockTransport, with_session: bool) -> Self {
        let logs_dir = tempfile::tempdir().unwrap();
        let mut config = herd_config(logs_dir.path(), tail);
        if with_session {
            let mut session = herd_common::SessionConfig::new("deploy.example.com", "deploy");
            session.expected_fingerprints = vec![mock.fingerprint()];
            config.session = Some(session);
        }

        let launcher = Arc::new(launcher);
        let events = EventBus::from_config(&config.notifications);
        let components = Components {
            transport: Some(Arc::new(mock.clone())),
            launcher: launcher.clone(),
            sink: Arc::new(events.clone()),
            actions: ActionFactory::with_defaults(),
        };
        let orchestrator = Orchestrator::new(&config, components).unwrap();
        Self {
            orchestrator,
            mock,
            launcher,
            events,
            logs_dir,
        }
    }

    pub fn log_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.logs_dir.path())
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}
