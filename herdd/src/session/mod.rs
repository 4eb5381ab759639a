//! Trust-verified remote session.
//!
//! A login scans the host's public keys, fingerprints them and connects
//! only if at least one fingerprint is on the configured allow-list. The
//! connection is then pinned to exactly those keys, so a host that presents
//! anything else during the handshake is refused by the transport.

mod mock;
#[cfg(unix)]
mod openssh;

pub use mock::{MockTransport, UploadRecord};
#[cfg(unix)]
pub use self::openssh::OpensshTransport;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use herd_common::{ErrorKind, Outcome, SessionConfig, parse_duration};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, info, warn};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Host key scan failed: {0}")]
    Scan(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Remote command failed: {0}")]
    Command(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A public host key as reported by the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    /// e.g. `ssh-ed25519`.
    pub algorithm: String,
    /// Base64 key blob.
    pub key: String,
    /// `SHA256:<unpadded base64>` of the decoded blob.
    pub fingerprint: String,
}

impl HostKey {
    pub fn new(algorithm: impl Into<String>, key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        let fingerprint = fingerprint_of(&key)?;
        Some(Self {
            algorithm: algorithm.into(),
            key,
            fingerprint,
        })
    }

    /// Parse one `host algorithm key` line as printed by `ssh-keyscan`.
    pub fn from_known_hosts_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut fields = line.split_whitespace();
        let _host = fields.next()?;
        let algorithm = fields.next()?;
        let key = fields.next()?;
        Self::new(algorithm, key)
    }
}

/// OpenSSH-style fingerprint of a base64 key blob.
pub fn fingerprint_of(key_b64: &str) -> Option<String> {
    let blob = STANDARD.decode(key_b64.trim()).ok()?;
    let digest = Sha256::digest(&blob);
    Some(format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)))
}

/// Strip the optional `SHA256:` prefix and base64 padding.
pub fn normalize_fingerprint(fingerprint: &str) -> String {
    let trimmed = fingerprint.trim();
    let body = trimmed
        .strip_prefix("SHA256:")
        .or_else(|| trimmed.strip_prefix("sha256:"))
        .unwrap_or(trimmed);
    body.trim_end_matches('=').to_string()
}

/// Everything a transport needs to open a pinned connection.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub address: String,
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
    pub keep_alive: Option<Duration>,
    pub connect_timeout: Duration,
    /// Only these keys may be accepted during the handshake.
    pub trusted_keys: Vec<HostKey>,
}

/// Opens connections to a remote host.
#[async_trait]
pub trait SshTransport: Send + Sync {
    async fn scan_host_keys(&self, address: &str, port: u16) -> Result<Vec<HostKey>, SessionError>;

    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn SshConnection>, SessionError>;
}

/// An established connection.
#[async_trait]
pub trait SshConnection: Send + Sync {
    async fn is_alive(&self) -> bool;

    /// Run a shell command and return its combined output.
    async fn execute(&self, command: &str) -> Result<String, SessionError>;

    async fn create_dir_all(&self, dir: &str) -> Result<(), SessionError>;

    /// Stream a local file to `remote`, returning the bytes written.
    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        cancel: oneshot::Receiver<()>,
    ) -> Result<u64, SessionError>;

    async fn close(&self) -> Result<(), SessionError>;
}

/// The single remote session deployment actions share.
pub struct SecureSession {
    config: SessionConfig,
    transport: Arc<dyn SshTransport>,
    connection: Mutex<Option<Arc<dyn SshConnection>>>,
    login_lock: tokio::sync::Mutex<()>,
    cancel_login: Notify,
}

impl SecureSession {
    pub fn new(config: SessionConfig, transport: Arc<dyn SshTransport>) -> Self {
        Self {
            config,
            transport,
            connection: Mutex::new(None),
            login_lock: tokio::sync::Mutex::new(()),
            cancel_login: Notify::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_logged_in(&self) -> bool {
        self.current().is_some()
    }

    /// Verify the host's identity and connect.
    pub async fn login(&self) -> Outcome {
        let _login = self.login_lock.lock().await;
        if let Some(connection) = self.current() {
            if connection.is_alive().await {
                return Outcome::ok_with("Already logged in.");
            }
            self.take_current();
        }

        let cancelled = self.cancel_login.notified();
        tokio::select! {
            result = self.establish() => match result {
                Ok(connection) => {
                    self.set_current(connection);
                    info!("Logged in to {}", self.config.display_target());
                    Outcome::ok_with(format!("Logged in to {}", self.config.address))
                }
                Err(outcome) => outcome,
            },
            _ = cancelled => {
                warn!("Login to {} cancelled", self.config.display_target());
                Outcome::fail(ErrorKind::SessionConnectFailed, "Login cancelled.")
            }
        }
    }

    /// Cancel a pending login and close the connection. Idempotent.
    pub async fn logout(&self) -> Outcome {
        self.cancel_login.notify_waiters();
        match self.take_current() {
            Some(connection) => {
                if let Err(e) = connection.close().await {
                    warn!("Error while closing session: {}", e);
                }
                info!("Logged out of {}", self.config.display_target());
                Outcome::ok_with("Logged out.")
            }
            None => Outcome::ok_with("Already logged out."),
        }
    }

    /// Run `command` remotely, logging in first if needed.
    ///
    /// Success means the command ran; its exit status is not inspected.
    pub async fn run_command(&self, command: &str) -> Outcome {
        let connection = match self.connection().await {
            Ok(connection) => connection,
            Err(outcome) => return outcome,
        };
        let command = if self.config.need_sudo {
            format!("sudo {command}")
        } else {
            command.to_string()
        };
        debug!("Running remote command: {}", command);
        match connection.execute(&command).await {
            Ok(output) => Outcome::ok_with(output.trim_end().to_string()),
            Err(e) => {
                self.drop_if_dead(&connection).await;
                Outcome::fail(ErrorKind::RemoteCommandFailed, e.to_string())
            }
        }
    }

    pub async fn ensure_remote_dir(&self, dir: &str) -> Outcome {
        let connection = match self.connection().await {
            Ok(connection) => connection,
            Err(outcome) => return outcome,
        };
        match connection.create_dir_all(dir).await {
            Ok(()) => Outcome::ok(),
            Err(e) => Outcome::fail(
                ErrorKind::TransferFailed,
                format!("Could not create remote directory {dir}: {e}"),
            ),
        }
    }

    pub async fn upload(
        &self,
        local: &Path,
        remote: &str,
        cancel: oneshot::Receiver<()>,
    ) -> Outcome {
        let connection = match self.connection().await {
            Ok(connection) => connection,
            Err(outcome) => return outcome,
        };
        match connection.upload(local, remote, cancel).await {
            Ok(bytes) => Outcome::ok_with(format!("Uploaded {bytes} bytes to {remote}")),
            Err(SessionError::Cancelled) => {
                Outcome::fail(ErrorKind::TransferFailed, format!("Upload to {remote} cancelled"))
            }
            Err(e) => {
                self.drop_if_dead(&connection).await;
                Outcome::fail(ErrorKind::TransferFailed, e.to_string())
            }
        }
    }

    async fn establish(&self) -> Result<Arc<dyn SshConnection>, Outcome> {
        let target = self.config.display_target();
        let allowed: HashSet<String> = self
            .config
            .expected_fingerprints
            .iter()
            .map(|f| normalize_fingerprint(f))
            .filter(|f| !f.is_empty())
            .collect();
        if allowed.is_empty() {
            warn!("No trusted host fingerprints configured; refusing {}", target);
            return Err(Outcome::fail(
                ErrorKind::UntrustedRemoteIdentity,
                format!(
                    "No trusted host fingerprints are configured; refusing to connect to {}",
                    self.config.address
                ),
            ));
        }

        let keys = self
            .transport
            .scan_host_keys(&self.config.address, self.config.port)
            .await
            .map_err(|e| Outcome::fail(ErrorKind::SessionConnectFailed, e.to_string()))?;
        for key in &keys {
            warn!("{} presents {} key {}", target, key.algorithm, key.fingerprint);
        }

        let trusted: Vec<HostKey> = keys
            .iter()
            .filter(|k| allowed.contains(&normalize_fingerprint(&k.fingerprint)))
            .cloned()
            .collect();
        if trusted.is_empty() {
            let presented = keys
                .iter()
                .map(|k| k.fingerprint.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Outcome::fail(
                ErrorKind::UntrustedRemoteIdentity,
                format!(
                    "Host key for {} is not trusted (presented: {})",
                    self.config.address,
                    if presented.is_empty() { "none" } else { &presented }
                ),
            ));
        }

        let params = ConnectParams {
            address: self.config.address.clone(),
            port: self.config.port,
            user: self.config.user.clone(),
            key_path: self.config.expanded_key_path(),
            keep_alive: self.keep_alive(),
            connect_timeout: parse_duration(&self.config.connect_timeout)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            trusted_keys: trusted,
        };
        self.transport
            .connect(&params)
            .await
            .map_err(|e| Outcome::fail(ErrorKind::SessionConnectFailed, e.to_string()))
    }

    fn keep_alive(&self) -> Option<Duration> {
        let raw = self.config.keep_alive_interval.as_deref()?;
        match parse_duration(raw) {
            Some(interval) if !interval.is_zero() => Some(interval),
            Some(_) => None,
            None => {
                warn!("Keep-alive interval '{}' is not a duration; keep-alive disabled", raw);
                None
            }
        }
    }

    async fn connection(&self) -> Result<Arc<dyn SshConnection>, Outcome> {
        if let Some(connection) = self.current() {
            if connection.is_alive().await {
                return Ok(connection);
            }
            info!("Session to {} dropped; reconnecting", self.config.address);
            self.take_current();
        }
        let outcome = self.login().await;
        if !outcome.success {
            return Err(outcome);
        }
        self.current().ok_or_else(|| {
            Outcome::fail(ErrorKind::SessionConnectFailed, "Session closed during login.")
        })
    }

    async fn drop_if_dead(&self, connection: &Arc<dyn SshConnection>) {
        if connection.is_alive().await {
            return;
        }
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, connection)) {
            *slot = None;
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn SshConnection>>> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self) -> Option<Arc<dyn SshConnection>> {
        self.slot().clone()
    }

    fn set_current(&self, connection: Arc<dyn SshConnection>) {
        *self.slot() = Some(connection);
    }

    fn take_current(&self) -> Option<Arc<dyn SshConnection>> {
        self.slot().take()
    }
}
