#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Greeter client bundle: waits for a [`greeter_sdk::Greeter`] to appear and greets through it.

pub mod config;
mod listener;
pub mod module;

pub use module::{BUNDLE_NAME, GreeterClient};
