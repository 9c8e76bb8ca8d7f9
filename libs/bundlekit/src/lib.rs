#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! BundleKit - a small in-process bundle framework.
//!
//! Bundles implement [`Bundle`] and are driven through an explicit lifecycle by a
//! [`Framework`]. They cooperate only through the typed [`ServiceRegistry`]: providers
//! publish `Arc<dyn Trait>` implementations with properties, consumers look them up or
//! subscribe a [`ServiceListener`] with an LDAP-style [`Filter`].
//!
//! ```ignore
//! #[derive(Default)]
//! pub struct MyBundle;
//!
//! #[async_trait::async_trait]
//! impl bundlekit::Bundle for MyBundle {
//!     fn manifest(&self) -> bundlekit::BundleManifest {
//!         bundlekit::BundleManifest::new("my-bundle", env!("CARGO_PKG_VERSION"))
//!     }
//!     async fn start(&self, ctx: &bundlekit::BundleCtx) -> anyhow::Result<()> { Ok(()) }
//!     async fn stop(&self, ctx: &bundlekit::BundleCtx) -> anyhow::Result<()> { Ok(()) }
//! }
//!
//! bundlekit::register_bundle!("my-bundle", MyBundle);
//! ```

pub mod catalog;
pub mod config;
pub mod context;
pub mod contracts;
pub mod events;
pub mod filter;
pub mod framework;
pub mod lifecycle;
pub mod runtime;
pub mod service_registry;

pub use catalog::{BundleCatalog, BundleRegistrator};
pub use config::{ConfigError, ConfigProvider, EmptyConfig};
pub use context::{BundleContextBuilder, BundleCtx};
pub use contracts::{Bundle, BundleId, BundleManifest};
pub use events::{ListenerId, ServiceEvent, ServiceEventKind, ServiceListener};
pub use filter::{Filter, FilterError};
pub use framework::{BundleInfo, Framework, FrameworkError};
pub use lifecycle::{BundleState, LifecycleError};
pub use service_registry::{
    OBJECTCLASS, Properties, RegistryError, SERVICE_BUNDLEID, SERVICE_ID, SERVICE_RANKING,
    ServiceId, ServiceReference, ServiceRegistration, ServiceRegistry, type_identity,
};

// Used by `register_bundle!`.
#[doc(hidden)]
pub use inventory;
