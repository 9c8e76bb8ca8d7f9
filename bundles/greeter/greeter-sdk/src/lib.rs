#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Greeter SDK.
//!
//! The contract shared by the `greeter-provider` and `greeter-client` bundles. Providers
//! publish an `Arc<dyn Greeter>`; consumers discover it through the service registry.

pub mod api;

pub use api::{GREETING_PREFIX, Greeter};
