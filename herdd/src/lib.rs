//! Herd orchestrator core.
//!
//! Builds named projects with an external build tool, one request per
//! project at a time, and pushes the results to a remote host through a
//! pinned SSH session. [`orchestrator::Orchestrator`] wires the pieces
//! together from a [`herd_common::HerdConfig`].

pub mod archive;
pub mod build;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod source_control;
pub mod transfer;

pub use build::{BuildCoordinator, BuildPhase, BuildSettings, BuildStatus};
pub use events::{EventBus, Notification, NotificationSink, Severity, TracingSink};
pub use orchestrator::{Components, Orchestrator, StartupError};
pub use pipeline::{ActionFactory, DeploymentAction, DeploymentPipeline};
pub use registry::{ProjectRegistry, RegistryError};
pub use session::SecureSession;
pub use transfer::TransferChannel;
