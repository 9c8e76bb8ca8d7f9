#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Standalone bundle that announces its own start and stop.

pub mod module;

pub use module::{BUNDLE_NAME, HelloWorld};
