//! File and directory uploads over the secure session.
//!
//! At most one upload per remote path is outstanding; a second request for
//! the same path is rejected, never queued. Directories travel as a single
//! zip archive and are extracted on the remote host.

use crate::archive::{ArchiveSummary, archive_directory};
use crate::session::SecureSession;
use chrono::{DateTime, Utc};
use herd_common::{ErrorKind, Outcome};
use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Convert separators to `/` and drop a trailing slash.
pub fn normalize_remote_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let trimmed = normalized.trim_end_matches('/');
    if trimmed.is_empty() && normalized.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn join_remote(base: &str, name: &str) -> String {
    let base = normalize_remote_path(base);
    if base == "/" {
        format!("/{name}")
    } else if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

fn remote_parent(path: &str) -> Option<&str> {
    let (parent, _) = path.rsplit_once('/')?;
    if parent.is_empty() { None } else { Some(parent) }
}

struct PendingTransfer {
    id: u64,
    started_at: DateTime<Utc>,
    cancel: oneshot::Sender<()>,
}

/// Snapshot of an in-flight upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingUpload {
    pub id: u64,
    pub remote_path: String,
    pub started_at: DateTime<Utc>,
}

type PendingMap = Mutex<HashMap<String, PendingTransfer>>;

/// Removes the tracking entry, but only while it still belongs to this transfer.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    remote: String,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = lock(self.pending);
        if pending.get(&self.remote).is_some_and(|p| p.id == self.id) {
            pending.remove(&self.remote);
        }
    }
}

fn lock(map: &PendingMap) -> MutexGuard<'_, HashMap<String, PendingTransfer>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct TransferChannel {
    session: Option<Arc<SecureSession>>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl TransferChannel {
    /// `None` means no remote host is configured; every transfer fails.
    pub fn new(session: Option<Arc<SecureSession>>) -> Self {
        Self {
            session,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Upload a file or a whole directory.
    pub async fn upload(&self, local: &Path, remote: &str) -> Outcome {
        if local.is_file() {
            self.upload_file(local, remote).await
        } else if local.is_dir() {
            self.upload_directory(local, remote).await
        } else {
            Outcome::fail(
                ErrorKind::InvalidLocalPath,
                format!("Invalid local path: {}", local.display()),
            )
        }
    }

    pub async fn upload_file(&self, local: &Path, remote: &str) -> Outcome {
        let remote = normalize_remote_path(remote);
        if !local.is_file() {
            return Outcome::fail(
                ErrorKind::InvalidLocalPath,
                format!("Invalid local path: {}", local.display()),
            );
        }
        let session = match self.session() {
            Ok(session) => session,
            Err(outcome) => return outcome,
        };
        let (_guard, cancel_rx) = match self.reserve(&remote) {
            Ok(reserved) => reserved,
            Err(outcome) => return outcome,
        };
        send_file(&session, local, &remote, cancel_rx).await
    }

    /// Archive `local_dir`, upload the archive into `remote_dir` and extract it there.
    ///
    /// The remote archive path stays reserved until extraction finishes.
    pub async fn upload_directory(&self, local_dir: &Path, remote_dir: &str) -> Outcome {
        let remote_dir = normalize_remote_path(remote_dir);
        let Some(name) = local_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Outcome::fail(
                ErrorKind::InvalidLocalPath,
                format!("Invalid local path: {}", local_dir.display()),
            );
        };
        let session = match self.session() {
            Ok(session) => session,
            Err(outcome) => return outcome,
        };

        let archive_name = format!("{name}.zip");
        let remote_archive = join_remote(&remote_dir, &archive_name);
        let (_guard, cancel_rx) = match self.reserve(&remote_archive) {
            Ok(reserved) => reserved,
            Err(outcome) => return outcome,
        };

        let staging = match tempfile::Builder::new().prefix("herd-archive-").tempdir() {
            Ok(staging) => staging,
            Err(e) => {
                return Outcome::fail(
                    ErrorKind::ArchiveCreationFailed,
                    format!("Could not create a staging directory: {e}"),
                );
            }
        };
        let archive_path = staging.path().join(&archive_name);
        let summary = match build_archive(local_dir, &archive_path).await {
            Ok(summary) => summary,
            Err(outcome) => return outcome,
        };
        info!(
            "Archived {} ({} files, {} links skipped)",
            local_dir.display(),
            summary.files,
            summary.skipped_links
        );

        let uploaded = send_file(&session, &archive_path, &remote_archive, cancel_rx).await;
        if !uploaded.success {
            return uploaded;
        }

        let extract = format!(
            "unzip -o {} -d {}",
            shell_escape::escape(remote_archive.as_str().into()),
            shell_escape::escape(remote_dir.as_str().into())
        );
        let extracted = session.run_command(&extract).await;
        if !extracted.success {
            return Outcome::fail(ErrorKind::RemoteExtractionFailed, extracted.message);
        }
        debug!("Extraction output: {}", extracted.message);

        Outcome::ok_with(format!(
            "Uploaded {} files from {} to {}",
            summary.files,
            local_dir.display(),
            remote_dir
        ))
    }

    pub async fn download_file(&self, remote: &str, _local: &Path) -> Outcome {
        Outcome::fail(
            ErrorKind::UnsupportedOperation,
            format!("Downloading {remote} is not supported."),
        )
    }

    /// Cancel every in-flight upload. Returns how many were signalled.
    pub fn cancel_all_uploads(&self) -> usize {
        let drained: Vec<(String, PendingTransfer)> = lock(&self.pending).drain().collect();
        for (remote, transfer) in &drained {
            info!("Cancelling upload {} to {}", transfer.id, remote);
        }
        let count = drained.len();
        for (_, transfer) in drained {
            // The upload may have finished already.
            let _ = transfer.cancel.send(());
        }
        count
    }

    /// Downloads are never started, so there is nothing to cancel.
    pub fn cancel_all_downloads(&self) -> usize {
        0
    }

    pub fn pending_uploads(&self) -> Vec<PendingUpload> {
        let mut uploads: Vec<PendingUpload> = lock(&self.pending)
            .iter()
            .map(|(remote, transfer)| PendingUpload {
                id: transfer.id,
                remote_path: remote.clone(),
                started_at: transfer.started_at,
            })
            .collect();
        uploads.sort_by_key(|u| u.id);
        uploads
    }

    /// Claim `remote` for one transfer; the claim lasts as long as the guard.
    fn reserve(
        &self,
        remote: &str,
    ) -> Result<(PendingGuard<'_>, oneshot::Receiver<()>), Outcome> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        match lock(&self.pending).entry(remote.to_string()) {
            Entry::Occupied(_) => {
                warn!("Rejected upload to {}: already in flight", remote);
                return Err(Outcome::fail(
                    ErrorKind::TransferAlreadyInFlight,
                    format!("An upload to {remote} is already in progress."),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingTransfer {
                    id,
                    started_at: Utc::now(),
                    cancel: cancel_tx,
                });
            }
        }
        let guard = PendingGuard {
            pending: &self.pending,
            remote: remote.to_string(),
            id,
        };
        Ok((guard, cancel_rx))
    }

    fn session(&self) -> Result<Arc<SecureSession>, Outcome> {
        self.session.clone().ok_or_else(|| {
            Outcome::fail(
                ErrorKind::SessionConnectFailed,
                "No remote session is configured.",
            )
        })
    }
}

async fn send_file(
    session: &SecureSession,
    local: &Path,
    remote: &str,
    cancel: oneshot::Receiver<()>,
) -> Outcome {
    if let Some(parent) = remote_parent(remote) {
        let created = session.ensure_remote_dir(parent).await;
        if !created.success {
            return created;
        }
    }

    info!("Uploading {} to {}", local.display(), remote);
    let outcome = session.upload(local, remote, cancel).await;
    if outcome.success {
        info!("{}", outcome.message);
    } else {
        warn!("Upload to {} failed: {}", remote, outcome.message);
    }
    outcome
}

async fn build_archive(dir: &Path, dest: &Path) -> Result<ArchiveSummary, Outcome> {
    let dir = dir.to_path_buf();
    let dest = dest.to_path_buf();
    match tokio::task::spawn_blocking(move || archive_directory(&dir, &dest)).await {
        Ok(Ok(summary)) => Ok(summary),
        Ok(Err(e)) => Err(Outcome::fail(ErrorKind::ArchiveCreationFailed, e.to_string())),
        Err(e) => Err(Outcome::fail(
            ErrorKind::ArchiveCreationFailed,
            format!("Archive task failed: {e}"),
        )),
    }
}
