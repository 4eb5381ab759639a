#![allow(dead_code)]
pub mod fixtures;
pub mod logging;
pub use fixtures::{TestHerd, herd_config};
pub use herdd::build::ScriptedLauncher;
pub use logging::init_test_logging;
