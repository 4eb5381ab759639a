//! Test helpers shared by Herd crates.

mod log;

pub use log::init_test_logging;
