//! Shared types and utilities for Herd.
//!
//! Everything the orchestrator daemon and its front ends agree on lives here:
//! project/target types, the uniform [`Outcome`], the error catalog, the TOML
//! configuration model and logging setup.

pub mod config;
pub mod errors;
pub mod logging;
pub mod outcome;
pub mod template;
pub mod testing;
pub mod types;

pub use config::{
    ActionSpec, ConfigError, ConfigWarning, GeneralConfig, HerdConfig, NotificationConfig,
    ProjectConfig, SessionConfig, SourceControlConfig, load_config, parse_duration,
};
pub use errors::{ErrorCategory, ErrorKind, SyncStep};
pub use logging::{LogConfig, LogGuards, init_logging};
pub use outcome::{Diagnosis, FailedAction, Outcome};
pub use template::PathTemplate;
pub use types::{BuildKind, BuildTarget, ProjectDescriptor, SourceControlKind};
