//! In-memory SSH transport for tests.
//!
//! It opens no sockets. Commands are answered from configured responses by
//! prefix, uploads are read from disk and recorded, and a gate can hold
//! uploads open to exercise in-flight and cancellation paths.

use super::{ConnectParams, HostKey, SessionError, SshConnection, SshTransport};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Semaphore, oneshot};

const MOCK_KEY_BLOB: &[u8] = b"\x00\x00\x00\x0bssh-ed25519\x00\x00\x00\x20herd-mock-host-key-0123456789ab";

/// One file received by a mock connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub local: PathBuf,
    pub remote: String,
    pub contents: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    host_keys: Vec<HostKey>,
    connect_error: Option<String>,
    responses: Vec<(String, Result<String, String>)>,
    upload_error: Option<String>,
    upload_gate: Option<Arc<Semaphore>>,
    connect_count: usize,
    last_params: Option<ConnectParams>,
    commands: Vec<String>,
    created_dirs: Vec<String>,
    uploads: Vec<UploadRecord>,
    connections: Vec<Arc<AtomicBool>>,
}

/// Scriptable [`SshTransport`].
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A host presenting a single ed25519 key.
    pub fn new() -> Self {
        let key = HostKey::new("ssh-ed25519", STANDARD.encode(MOCK_KEY_BLOB));
        let state = MockState {
            host_keys: key.into_iter().collect(),
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_host_keys(self, keys: Vec<HostKey>) -> Self {
        self.lock().host_keys = keys;
        self
    }

    pub fn failing_connect(self, message: impl Into<String>) -> Self {
        self.lock().connect_error = Some(message.into());
        self
    }

    /// Answer commands starting with `prefix` with `output`.
    pub fn with_response(self, prefix: impl Into<String>, output: impl Into<String>) -> Self {
        self.lock()
            .responses
            .push((prefix.into(), Ok(output.into())));
        self
    }

    /// Fail commands starting with `prefix`.
    pub fn failing_command(self, prefix: impl Into<String>, message: impl Into<String>) -> Self {
        self.lock()
            .responses
            .push((prefix.into(), Err(message.into())));
        self
    }

    pub fn failing_upload(self, message: impl Into<String>) -> Self {
        self.lock().upload_error = Some(message.into());
        self
    }

    /// Block uploads until [`release_uploads`](Self::release_uploads).
    pub fn hold_uploads(&self) {
        self.lock().upload_gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_uploads(&self) {
        if let Some(gate) = self.lock().upload_gate.take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Fingerprint of the first presented host key.
    pub fn fingerprint(&self) -> String {
        self.lock()
            .host_keys
            .first()
            .map(|k| k.fingerprint.clone())
            .unwrap_or_default()
    }

    /// Mark every open connection dead.
    pub fn drop_connections(&self) {
        for alive in &self.lock().connections {
            alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connect_count
    }

    pub fn last_params(&self) -> Option<ConnectParams> {
        self.lock().last_params.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn created_dirs(&self) -> Vec<String> {
        self.lock().created_dirs.clone()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.lock().uploads.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SshTransport for MockTransport {
    async fn scan_host_keys(&self, _address: &str, _port: u16) -> Result<Vec<HostKey>, SessionError> {
        Ok(self.lock().host_keys.clone())
    }

    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn SshConnection>, SessionError> {
        let mut state = self.lock();
        state.last_params = Some(params.clone());
        if let Some(message) = &state.connect_error {
            return Err(SessionError::Connect(message.clone()));
        }
        state.connect_count += 1;
        let alive = Arc::new(AtomicBool::new(true));
        state.connections.push(alive.clone());
        Ok(Arc::new(MockConnection {
            transport: self.clone(),
            alive,
        }))
    }
}

struct MockConnection {
    transport: MockTransport,
    alive: Arc<AtomicBool>,
}

impl MockConnection {
    fn check_alive(&self) -> Result<(), SessionError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SessionError::Connect("connection closed".to_string()))
        }
    }
}

#[async_trait]
impl SshConnection for MockConnection {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn execute(&self, command: &str) -> Result<String, SessionError> {
        self.check_alive()?;
        let mut state = self.transport.lock();
        state.commands.push(command.to_string());
        let response = state
            .responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, response)| response.clone());
        match response {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(SessionError::Command(message)),
            None => Ok(String::new()),
        }
    }

    async fn create_dir_all(&self, dir: &str) -> Result<(), SessionError> {
        self.check_alive()?;
        self.transport.lock().created_dirs.push(dir.to_string());
        Ok(())
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<u64, SessionError> {
        self.check_alive()?;
        let gate = self.transport.lock().upload_gate.clone();
        if let Some(gate) = gate {
            tokio::select! {
                permit = gate.acquire() => {
                    drop(permit);
                }
                _ = &mut cancel => return Err(SessionError::Cancelled),
            }
        }

        let upload_error = self.transport.lock().upload_error.clone();
        if let Some(message) = upload_error {
            return Err(SessionError::Upload(message));
        }

        let contents = tokio::fs::read(local).await?;
        let bytes = contents.len() as u64;
        self.transport.lock().uploads.push(UploadRecord {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            contents,
        });
        Ok(bytes)
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_host_key_has_fingerprint() {
        let mock = MockTransport::new();
        assert!(mock.fingerprint().starts_with("SHA256:"));
    }

    #[tokio::test]
    async fn responses_match_by_prefix() {
        let mock = MockTransport::new()
            .with_response("unzip", "inflating: a.txt")
            .failing_command("rm", "permission denied");
        let params = ConnectParams {
            address: "host".to_string(),
            port: 22,
            user: "u".to_string(),
            key_path: None,
            keep_alive: None,
            connect_timeout: std::time::Duration::from_secs(1),
            trusted_keys: Vec::new(),
        };
        let connection = mock.connect(&params).await.unwrap();

        assert_eq!(
            connection.execute("unzip -o a.zip -d /srv").await.unwrap(),
            "inflating: a.txt"
        );
        assert!(connection.execute("rm -rf /srv").await.is_err());
        assert_eq!(connection.execute("ls").await.unwrap(), "");
        assert_eq!(mock.commands().len(), 3);

        connection.close().await.unwrap();
        assert!(!connection.is_alive().await);
        assert!(connection.execute("ls").await.is_err());
    }
}
