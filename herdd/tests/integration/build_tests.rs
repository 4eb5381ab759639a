use super::common::{ScriptedLauncher, TestHerd, init_test_logging};
use herd_common::{BuildTarget, ErrorKind};
use herdd::session::MockTransport;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_game_windows64_exit_zero_succeeds() {
    init_test_logging();
    crate::test_log!("TEST START: test_game_windows64_exit_zero_succeeds");

    let herd = TestHerd::new(
        "",
        ScriptedLauncher::new(&["Building player", "Build succeeded"], 0),
        MockTransport::new(),
        false,
    );
    let mut events = herd.events.subscribe();

    let outcome = herd
        .orchestrator
        .builds
        .request_build("Game", BuildTarget::Windows64)
        .await;
    assert!(outcome.success, "{outcome}");

    let launched = herd.launcher.launched();
    assert_eq!(launched.len(), 1);
    let args = &launched[0].args;
    assert!(args.contains(&"-buildWindows64Player".to_string()));
    assert!(args.last().unwrap().ends_with("Game.exe"));
    assert!(args.windows(2).any(|w| w[0] == "-projectPath" && w[1] == "/work/game"));

    let files = herd.log_files();
    assert_eq!(files.len(), 1, "{files:?}");
    assert!(files[0].starts_with("Game_Windows64_PlayerBuild_"));
    assert!(files[0].ends_with(".log"));

    let mut log_lines = Vec::new();
    let mut notifications = Vec::new();
    while let Ok(raw) = events.try_recv() {
        let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
        match event["event"].as_str() {
            Some("log_line") => {
                assert_eq!(event["data"]["target"], "build-log");
                log_lines.push(event["data"]["line"].as_str().unwrap().to_string())
            }
            Some("notification") => notifications.push(event["data"].clone()),
            _ => {}
        }
    }
    assert_eq!(log_lines.len(), 2);
    assert!(log_lines[0].starts_with("[1]["));
    assert!(log_lines[1].starts_with("[2]["));
    assert!(log_lines[1].ends_with("[Game]: Build succeeded"));
    assert!(notifications.iter().all(|n| n["target"] == "game-builds"));
    assert!(notifications.iter().any(|n| n["severity"] == "success"));

    crate::test_log!("TEST PASS: test_game_windows64_exit_zero_succeeds");
}

#[tokio::test]
async fn test_game_windows64_exit_one_fails() {
    init_test_logging();
    crate::test_log!("TEST START: test_game_windows64_exit_one_fails");

    let herd = TestHerd::new(
        "",
        ScriptedLauncher::new(&["Scripts have compiler errors."], 1),
        MockTransport::new(),
        false,
    );
    let outcome = herd
        .orchestrator
        .builds
        .request_build("Game", BuildTarget::Windows64)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.kind, Some(ErrorKind::NonZeroExitCode));
    assert!(outcome.message.contains("exit code 1"), "{}", outcome.message);
    // The log is written whatever the exit code.
    assert_eq!(herd.log_files().len(), 1);

    crate::test_log!("TEST PASS: test_game_windows64_exit_one_fails");
}

#[tokio::test]
async fn test_at_most_one_build_per_project() {
    init_test_logging();
    crate::test_log!("TEST START: test_at_most_one_build_per_project");

    let launcher = ScriptedLauncher::new(&["compiling"], 0).held();
    let herd = Arc::new(TestHerd::new("", launcher, MockTransport::new(), false));

    let first = {
        let herd = herd.clone();
        tokio::spawn(async move {
            herd.orchestrator
                .builds
                .request_build("Game", BuildTarget::Linux)
                .await
        })
    };
    for _ in 0..500 {
        if herd.orchestrator.builds.is_busy("Game") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(herd.orchestrator.builds.is_busy("Game"));

    for target in [BuildTarget::Linux, BuildTarget::Windows64] {
        let rejected = herd
            .orchestrator
            .builds
            .request_build("Game", target)
            .await;
        assert_eq!(rejected.kind, Some(ErrorKind::ProjectBusy));
    }
    let rejected = herd
        .orchestrator
        .builds
        .request_hot_update_build("Game", BuildTarget::Linux)
        .await;
    assert_eq!(rejected.kind, Some(ErrorKind::ProjectBusy));
    assert_eq!(herd.launcher.launched().len(), 1);

    herd.launcher.release();
    assert!(first.await.unwrap().success);
    assert!(!herd.orchestrator.builds.is_busy("Game"));

    let again = herd
        .orchestrator
        .builds
        .request_build("Game", BuildTarget::Linux)
        .await;
    assert!(again.success, "{again}");

    crate::test_log!("TEST PASS: test_at_most_one_build_per_project");
}

#[tokio::test]
async fn test_unknown_project_is_rejected() {
    init_test_logging();
    crate::test_log!("TEST START: test_unknown_project_is_rejected");

    let herd = TestHerd::new("", ScriptedLauncher::new(&[], 0), MockTransport::new(), false);
    let outcome = herd
        .orchestrator
        .builds
        .request_build("Missing", BuildTarget::Mac)
        .await;
    assert_eq!(outcome.kind, Some(ErrorKind::UnknownProject));
    assert!(herd.launcher.launched().is_empty());

    crate::test_log!("TEST PASS: test_unknown_project_is_rejected");
}

#[tokio::test]
async fn test_hot_update_uploads_addressables() {
    init_test_logging();
    crate::test_log!("TEST START: test_hot_update_uploads_addressables");

    let content = tempfile::tempdir().unwrap();
    let server_data = content.path().join("ServerData");
    std::fs::create_dir_all(&server_data).unwrap();
    std::fs::write(server_data.join("catalog.json"), "{}").unwrap();

    let tail = format!(
        r#"addressable_build_output = "{}"

[[projects.deployment]]
kind = "SftpUploadAction"
local_path = "{{addressableBuildOutput}}"
remote_path = "/srv/cdn/{{projectName}}"
"#,
        server_data.display()
    );
    let herd = TestHerd::new(&tail, ScriptedLauncher::new(&["ok"], 0), MockTransport::new(), true);

    let outcome = herd
        .orchestrator
        .builds
        .request_hot_update_build("Game", BuildTarget::Android)
        .await;
    assert!(outcome.success, "{outcome}");

    let args = &herd.launcher.launched()[0].args;
    assert!(args.contains(&"JenkinsBuild.BuildHotUpdateForAndroid".to_string()));
    let uploads = herd.mock.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].remote, "/srv/cdn/Game/ServerData.zip");
    assert!(
        herd.mock
            .commands()
            .iter()
            .any(|c| c.starts_with("unzip -o /srv/cdn/Game/ServerData.zip"))
    );

    crate::test_log!("TEST PASS: test_hot_update_uploads_addressables");
}
