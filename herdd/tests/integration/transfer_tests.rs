use super::common::init_test_logging;
use herd_common::{ErrorKind, SessionConfig};
use herdd::session::{HostKey, MockTransport, SecureSession};
use herdd::transfer::TransferChannel;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

fn session(mock: &MockTransport, fingerprints: Vec<String>) -> Arc<SecureSession> {
    let mut config = SessionConfig::new("deploy.example.com", "deploy");
    config.expected_fingerprints = fingerprints;
    Arc::new(SecureSession::new(config, Arc::new(mock.clone())))
}

fn trusted(mock: &MockTransport) -> Arc<SecureSession> {
    session(mock, vec![mock.fingerprint()])
}

#[tokio::test]
async fn test_directory_upload_round_trip() {
    init_test_logging();
    crate::test_log!("TEST START: test_directory_upload_round_trip");

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("ServerData");
    std::fs::create_dir_all(dir.join("Android/bundles")).unwrap();
    std::fs::create_dir_all(dir.join("empty")).unwrap();
    std::fs::write(dir.join("catalog.json"), "{}").unwrap();
    std::fs::write(dir.join("catalog.hash"), "abc").unwrap();
    std::fs::write(dir.join("Android/bundles/a.bundle"), [1u8, 2, 3]).unwrap();

    let mock = MockTransport::new();
    let channel = TransferChannel::new(Some(trusted(&mock)));
    let outcome = channel.upload(&dir, "/srv/cdn/Game").await;
    assert!(outcome.success, "{outcome}");
    assert!(outcome.message.contains("3 files"), "{}", outcome.message);

    let uploads = mock.uploads();
    assert_eq!(uploads.len(), 1);
    let archive = zip::ZipArchive::new(Cursor::new(uploads[0].contents.clone())).unwrap();
    let files = archive.file_names().filter(|n| !n.ends_with('/')).count();
    assert_eq!(files, 3);

    let commands = mock.commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].starts_with("unzip -o /srv/cdn/Game/ServerData.zip -d /srv/cdn/Game"));
    assert!(channel.pending_uploads().is_empty());

    crate::test_log!("TEST PASS: test_directory_upload_round_trip");
}

#[tokio::test]
async fn test_extraction_failure_message_is_kept() {
    init_test_logging();
    crate::test_log!("TEST START: test_extraction_failure_message_is_kept");

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("bundle");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("a.txt"), "a").unwrap();

    let mock = MockTransport::new().failing_command("unzip", "unzip: command not found");
    let channel = TransferChannel::new(Some(trusted(&mock)));
    let outcome = channel.upload(&dir, "/srv/cdn").await;

    assert_eq!(outcome.kind, Some(ErrorKind::RemoteExtractionFailed));
    assert!(
        outcome.message.contains("unzip: command not found"),
        "{}",
        outcome.message
    );
    assert_eq!(mock.uploads().len(), 1);

    crate::test_log!("TEST PASS: test_extraction_failure_message_is_kept");
}

#[tokio::test]
async fn test_untrusted_host_is_refused() {
    init_test_logging();
    crate::test_log!("TEST START: test_untrusted_host_is_refused");

    let mock = MockTransport::new();
    let other = HostKey::new("ssh-ed25519", "c29tZSBvdGhlciBob3N0IGtleQ==").unwrap();
    let wrong = other.fingerprint;
    assert_ne!(wrong, mock.fingerprint());

    for allow_list in [Vec::new(), vec![wrong]] {
        let session = session(&mock, allow_list);
        let outcome = session.login().await;
        assert_eq!(outcome.kind, Some(ErrorKind::UntrustedRemoteIdentity));
        assert!(!session.is_logged_in());

        let command = session.run_command("uptime").await;
        assert!(!command.success);
    }
    assert_eq!(mock.connect_count(), 0);
    assert!(mock.commands().is_empty());

    crate::test_log!("TEST PASS: test_untrusted_host_is_refused");
}

#[tokio::test]
async fn test_pending_upload_is_exclusive_and_released() {
    init_test_logging();
    crate::test_log!("TEST START: test_pending_upload_is_exclusive_and_released");

    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("Game.apk");
    std::fs::write(&file, "apk").unwrap();

    let mock = MockTransport::new();
    mock.hold_uploads();
    let channel = Arc::new(TransferChannel::new(Some(trusted(&mock))));

    let first = {
        let channel = channel.clone();
        let file = file.clone();
        tokio::spawn(async move { channel.upload_file(&file, "/srv/apk/Game.apk").await })
    };
    for _ in 0..500 {
        if !channel.pending_uploads().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(channel.pending_uploads().len(), 1);

    let second = channel.upload_file(&file, "/srv/apk/Game.apk").await;
    assert_eq!(second.kind, Some(ErrorKind::TransferAlreadyInFlight));

    mock.release_uploads();
    assert!(first.await.unwrap().success);
    assert!(channel.pending_uploads().is_empty());

    let third = channel.upload_file(&file, "/srv/apk/Game.apk").await;
    assert!(third.success, "{third}");

    crate::test_log!("TEST PASS: test_pending_upload_is_exclusive_and_released");
}

#[tokio::test]
async fn test_failed_upload_releases_path() {
    init_test_logging();
    crate::test_log!("TEST START: test_failed_upload_releases_path");

    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("Game.apk");
    std::fs::write(&file, "apk").unwrap();

    let mock = MockTransport::new().failing_upload("connection reset");
    let channel = TransferChannel::new(Some(trusted(&mock)));
    let failed = channel.upload_file(&file, "/srv/apk/Game.apk").await;
    assert_eq!(failed.kind, Some(ErrorKind::TransferFailed));
    assert!(channel.pending_uploads().is_empty());

    let retry = channel.upload_file(&file, "/srv/apk/Game.apk").await;
    assert_eq!(retry.kind, Some(ErrorKind::TransferFailed));
    assert_ne!(retry.kind, Some(ErrorKind::TransferAlreadyInFlight));

    crate::test_log!("TEST PASS: test_failed_upload_releases_path");
}

#[tokio::test]
async fn test_downloads_are_unsupported() {
    init_test_logging();
    crate::test_log!("TEST START: test_downloads_are_unsupported");

    let channel = TransferChannel::new(None);
    let outcome = channel
        .download_file("/srv/apk/Game.apk", std::path::Path::new("Game.apk"))
        .await;
    assert_eq!(outcome.kind, Some(ErrorKind::UnsupportedOperation));
    assert_eq!(channel.cancel_all_downloads(), 0);

    crate::test_log!("TEST PASS: test_downloads_are_unsupported");
}
