//! Wiring of every component from a loaded configuration.
//!
//! Each component is constructed once here and handed to the components
//! that use it. There are no globals.

use crate::build::{BuildCoordinator, BuildSettings, ProcessLauncher, TokioLauncher};
use crate::events::NotificationSink;
use crate::pipeline::{ActionFactory, DeploymentPipeline, PipelineError};
use crate::registry::{ProjectRegistry, RegistryError};
use crate::session::{SecureSession, SshTransport};
use crate::source_control::SourceControlRegistry;
use crate::transfer::TransferChannel;
use herd_common::HerdConfig;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid deployment configuration: {0}")]
    Pipeline(#[from] PipelineError),
}

/// The replaceable edges of the system.
pub struct Components {
    /// `None` leaves the session unconfigured even if the config has one.
    pub transport: Option<Arc<dyn SshTransport>>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub sink: Arc<dyn NotificationSink>,
    pub actions: ActionFactory,
}

impl Components {
    /// Real processes and, on unix, the system ssh client.
    pub fn system(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            transport: system_transport(),
            launcher: Arc::new(TokioLauncher),
            sink,
            actions: ActionFactory::with_defaults(),
        }
    }
}

#[cfg(unix)]
fn system_transport() -> Option<Arc<dyn SshTransport>> {
    let known_hosts_dir = std::env::temp_dir().join("herd-known-hosts");
    Some(Arc::new(crate::session::OpensshTransport::new(known_hosts_dir)))
}

#[cfg(not(unix))]
fn system_transport() -> Option<Arc<dyn SshTransport>> {
    warn!("Remote sessions need the system ssh client and are unavailable on this platform");
    None
}

pub struct Orchestrator {
    pub registry: Arc<ProjectRegistry>,
    pub source_control: Arc<SourceControlRegistry>,
    pub session: Option<Arc<SecureSession>>,
    pub transfer: Arc<TransferChannel>,
    pub pipeline: Arc<DeploymentPipeline>,
    pub builds: Arc<BuildCoordinator>,
}

impl Orchestrator {
    pub fn new(config: &HerdConfig, components: Components) -> Result<Self, StartupError> {
        let registry = Arc::new(ProjectRegistry::initialize(config)?);
        let source_control = Arc::new(SourceControlRegistry::from_projects(
            &registry.projects(),
            &config.source_control,
        ));

        let session = match (&config.session, components.transport) {
            (Some(session_config), Some(transport)) => {
                info!("Remote session target: {}", session_config.display_target());
                Some(Arc::new(SecureSession::new(session_config.clone(), transport)))
            }
            (Some(_), None) => {
                warn!("A session is configured but no transport is available");
                None
            }
            (None, _) => {
                info!("No remote session configured; remote deployment actions will fail");
                None
            }
        };

        let transfer = Arc::new(TransferChannel::new(session.clone()));
        let pipeline = Arc::new(DeploymentPipeline::build(
            &registry,
            &components.actions,
            transfer.clone(),
            session.clone(),
            components.sink.clone(),
        )?);
        let builds = Arc::new(BuildCoordinator::new(
            registry.clone(),
            source_control.clone(),
            pipeline.clone(),
            components.launcher,
            components.sink,
            BuildSettings::from_config(config),
        ));

        Ok(Self {
            registry,
            source_control,
            session,
            transfer,
            pipeline,
            builds,
        })
    }

    /// Kill running builds, cancel uploads and close the session.
    pub async fn shutdown(&self) {
        let builds = self.builds.shutdown();
        let uploads = self.transfer.cancel_all_uploads();
        if builds > 0 || uploads > 0 {
            info!(
                "Shutdown stopped {} build(s) and cancelled {} upload(s)",
                builds, uploads
            );
        }
        if let Some(session) = &self.session {
            let outcome = session.logout().await;
            info!("Session: {}", outcome.message);
        }
    }
}
