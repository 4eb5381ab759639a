//! Error catalog for Herd.
//!
//! Every failed [`Outcome`](crate::Outcome) is tagged with an [`ErrorKind`]
//! from this catalog. Each kind has a stable code and a remediation hint so
//! front ends can render failures without parsing messages.
//!
//! # Error Code Ranges
//!
//! | Range      | Category       | Description                              |
//! |------------|----------------|------------------------------------------|
//! | E001-E099  | Config         | Configuration and project lookup         |
//! | E100-E199  | Session        | Remote session and host trust            |
//! | E200-E299  | Build          | Build admission and the build tool       |
//! | E300-E399  | SourceControl  | Repository synchronization               |
//! | E400-E499  | Transfer       | Uploads, archives and remote extraction  |
//! | E500-E599  | Deployment     | Deployment chains and unsupported paths  |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorKind, SyncStep};
