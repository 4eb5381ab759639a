use super::common::{ScriptedLauncher, TestHerd, init_test_logging};
use herd_common::ErrorKind;
use herdd::pipeline::NO_ACTIONS_MESSAGE;
use herdd::session::MockTransport;

#[tokio::test]
async fn test_zero_actions_is_success() {
    init_test_logging();
    crate::test_log!("TEST START: test_zero_actions_is_success");

    let herd = TestHerd::new("", ScriptedLauncher::new(&[], 0), MockTransport::new(), false);
    let outcome = herd.orchestrator.pipeline.run("Game").await;
    assert!(outcome.success);
    assert_eq!(outcome.kind, None);
    assert_eq!(outcome.message, NO_ACTIONS_MESSAGE);

    crate::test_log!("TEST PASS: test_zero_actions_is_success");
}

#[tokio::test]
async fn test_second_action_failure_stops_chain() {
    init_test_logging();
    crate::test_log!("TEST START: test_second_action_failure_stops_chain");

    let tail = r#"
[[projects.deployment]]
kind = "remote-command"
command = "systemctl stop game"

[[projects.deployment]]
kind = "remote-command"
command = "cp -r /staging/{projectName} /srv/game"

[[projects.deployment]]
kind = "remote-command"
command = "systemctl start game"
"#;
    let mock = MockTransport::new().failing_command("cp -r", "cp: cannot stat '/staging/Game'");
    let herd = TestHerd::new(tail, ScriptedLauncher::new(&[], 0), mock, true);

    let outcome = herd.orchestrator.builds.request_deployment("Game").await;
    assert!(!outcome.success);

    let direct = herd
        .orchestrator
        .session
        .as_ref()
        .unwrap()
        .run_command("cp -r /staging/Game /srv/game")
        .await;
    assert_eq!(outcome.message, direct.message);

    let failed = outcome.failed_action.unwrap();
    assert_eq!(failed.index, 1);
    assert_eq!(failed.action, "remote-command");
    assert_eq!(failed.cause, Some(ErrorKind::RemoteCommandFailed));

    let commands = herd.mock.commands();
    assert!(!commands.iter().any(|c| c == "systemctl start game"));
    assert_eq!(commands[0], "systemctl stop game");
    assert_eq!(commands[1], "cp -r /staging/Game /srv/game");

    crate::test_log!("TEST PASS: test_second_action_failure_stops_chain");
}

#[tokio::test]
async fn test_unknown_action_kind_fails_when_reached() {
    init_test_logging();
    crate::test_log!("TEST START: test_unknown_action_kind_fails_when_reached");

    let tail = r#"
[[projects.deployment]]
kind = "cdn-invalidate"
distribution = "E2ABC"
"#;
    let herd = TestHerd::new(tail, ScriptedLauncher::new(&[], 0), MockTransport::new(), true);
    let outcome = herd.orchestrator.pipeline.run("Game").await;
    assert_eq!(outcome.kind, Some(ErrorKind::DeploymentActionFailed));
    assert_eq!(
        outcome.failed_action.unwrap().cause,
        Some(ErrorKind::UnsupportedOperation)
    );

    crate::test_log!("TEST PASS: test_unknown_action_kind_fails_when_reached");
}

#[tokio::test]
async fn test_remote_action_without_session_fails() {
    init_test_logging();
    crate::test_log!("TEST START: test_remote_action_without_session_fails");

    let tail = r#"
[[projects.deployment]]
kind = "remote-command"
command = "uptime"
"#;
    let herd = TestHerd::new(tail, ScriptedLauncher::new(&[], 0), MockTransport::new(), false);
    let outcome = herd.orchestrator.pipeline.run("Game").await;
    assert_eq!(
        outcome.failed_action.unwrap().cause,
        Some(ErrorKind::SessionConnectFailed)
    );
    assert!(herd.mock.commands().is_empty());

    crate::test_log!("TEST PASS: test_remote_action_without_session_fails");
}
