//! Workspace-level acceptance tests.
//!
//! Everything here runs on simulated hardware; the long soak is ignored by
//! default.

mod common;
mod config_test;
mod run_test;
mod soak_test;
mod voltage_test;
