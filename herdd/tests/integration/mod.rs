//! End-to-end tests over the public API with a mock transport and a
//! scripted build tool.

#[path = "../common/mod.rs"]
mod common;

mod build_tests;
mod pipeline_tests;
mod transfer_tests;
