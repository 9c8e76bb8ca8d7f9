#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Greeter provider bundle: publishes a [`greeter_sdk::Greeter`] implementation.

pub use greeter_sdk::*;

pub mod config;
pub mod domain;
pub mod module;

pub use module::{BUNDLE_NAME, GreeterProvider};
