#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Host bootstrap: layered configuration and logging initialization for BundleKit hosts.

pub mod config;
pub mod logging;

pub use config::*;
pub use logging::*;
