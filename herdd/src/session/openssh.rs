//! Transport backed by the system ssh client through the `openssh` crate.
//!
//! Host keys come from `ssh-keyscan`. Each connection gets its own
//! known-hosts file holding only the trusted keys, and strict host-key
//! checking against that file.

use super::{ConnectParams, HostKey, SessionError, SshConnection, SshTransport};
use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct OpensshTransport {
    keyscan: PathBuf,
    known_hosts_dir: PathBuf,
}

impl OpensshTransport {
    /// `known_hosts_dir` receives the pinned known-hosts files.
    pub fn new(known_hosts_dir: impl Into<PathBuf>) -> Self {
        Self {
            keyscan: PathBuf::from("ssh-keyscan"),
            known_hosts_dir: known_hosts_dir.into(),
        }
    }

    pub fn with_keyscan(mut self, program: impl Into<PathBuf>) -> Self {
        self.keyscan = program.into();
        self
    }

    fn write_pinned_hosts(&self, params: &ConnectParams) -> Result<PathBuf, SessionError> {
        std::fs::create_dir_all(&self.known_hosts_dir)?;
        let path = self
            .known_hosts_dir
            .join(format!("known_hosts_{}_{}", sanitize(&params.address), params.port));
        std::fs::write(&path, pinned_known_hosts(params))?;
        Ok(path)
    }
}

/// Known-hosts entries for exactly the trusted keys.
fn pinned_known_hosts(params: &ConnectParams) -> String {
    let host = if params.port == 22 {
        params.address.clone()
    } else {
        format!("[{}]:{}", params.address, params.port)
    };
    params
        .trusted_keys
        .iter()
        .map(|k| format!("{} {} {}\n", host, k.algorithm, k.key))
        .collect()
}

fn sanitize(address: &str) -> String {
    address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[async_trait]
impl SshTransport for OpensshTransport {
    async fn scan_host_keys(&self, address: &str, port: u16) -> Result<Vec<HostKey>, SessionError> {
        let output = Command::new(&self.keyscan)
            .arg("-p")
            .arg(port.to_string())
            .arg(address)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SessionError::Scan(format!("{}: {e}", self.keyscan.display())))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let keys: Vec<HostKey> = stdout
            .lines()
            .filter_map(HostKey::from_known_hosts_line)
            .collect();
        if keys.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::Scan(format!(
                "no host keys received from {address}:{port}: {}",
                stderr.trim()
            )));
        }
        Ok(keys)
    }

    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn SshConnection>, SessionError> {
        let known_hosts = self.write_pinned_hosts(params)?;

        let mut builder = SessionBuilder::default();
        builder
            .user(params.user.clone())
            .port(params.port)
            .known_hosts_check(KnownHosts::Strict)
            .user_known_hosts_file(&known_hosts)
            .connect_timeout(params.connect_timeout);
        if let Some(key) = &params.key_path {
            builder.keyfile(key);
        }
        if let Some(interval) = params.keep_alive {
            builder.server_alive_interval(interval);
        }

        debug!("Connecting to {}@{}:{}", params.user, params.address, params.port);
        let session = builder
            .connect(&params.address)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        Ok(Arc::new(OpensshConnection {
            session: RwLock::new(Some(session)),
        }))
    }
}

struct OpensshConnection {
    session: RwLock<Option<Session>>,
}

fn closed() -> SessionError {
    SessionError::Connect("session is closed".to_string())
}

#[async_trait]
impl SshConnection for OpensshConnection {
    async fn is_alive(&self) -> bool {
        match self.session.read().await.as_ref() {
            Some(session) => session.check().await.is_ok(),
            None => false,
        }
    }

    async fn execute(&self, command: &str) -> Result<String, SessionError> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or_else(closed)?;
        let output = session
            .raw_command(command)
            .output()
            .await
            .map_err(|e| SessionError::Command(e.to_string()))?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn create_dir_all(&self, dir: &str) -> Result<(), SessionError> {
        let command = format!("mkdir -p {}", shell_escape::escape(dir.into()));
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or_else(closed)?;
        let output = session
            .raw_command(&command)
            .output()
            .await
            .map_err(|e| SessionError::Command(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SessionError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<u64, SessionError> {
        let mut file = tokio::fs::File::open(local).await?;
        let command = format!("cat > {}", shell_escape::escape(remote.into()));

        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or_else(closed)?;
        let mut child = session
            .raw_command(&command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .map_err(|e| SessionError::Upload(e.to_string()))?;
        let mut stdin = child
            .stdin()
            .take()
            .ok_or_else(|| SessionError::Upload("remote stdin unavailable".to_string()))?;

        let bytes = tokio::select! {
            copied = tokio::io::copy(&mut file, &mut stdin) => copied?,
            _ = &mut cancel => {
                warn!("Upload to {} cancelled", remote);
                return Err(SessionError::Cancelled);
            }
        };
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SessionError::Upload(e.to_string()))?;
        if !output.status.success() {
            return Err(SessionError::Upload(format!(
                "remote write to {remote} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(bytes)
    }

    async fn close(&self) -> Result<(), SessionError> {
        let session = self.session.write().await.take();
        match session {
            Some(session) => session
                .close()
                .await
                .map_err(|e| SessionError::Connect(e.to_string())),
            None => Ok(()),
        }
    }
}
