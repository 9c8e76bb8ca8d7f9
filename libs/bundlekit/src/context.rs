use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ConfigProvider, bundle_config_or_default};
use crate::contracts::BundleId;
use crate::events::{ListenerId, ServiceListener};
use crate::filter::FilterError;
use crate::service_registry::{
    Properties, RegistryError, ServiceReference, ServiceRegistration, ServiceRegistry,
};

/// Bundle execution context - the interface bundles use to reach the framework.
///
/// Every registry call made through the context is attributed to the bundle, so the
/// framework can withdraw its registrations, uses and listeners when it stops.
///
/// ```ignore
/// async fn start(&self, ctx: &BundleCtx) -> anyhow::Result<()> {
///     let cfg: MyConfig = ctx.config()?;
///     let reg = ctx
///         .register_service::<dyn MyApi>(Arc::new(MyService::new(cfg)), Properties::new())
///         .await?;
///     self.registration.lock().replace(reg);
///     Ok(())
/// }
/// ```
///
/// The context is cheap to clone; listeners keep a clone to resolve services from
/// the event thread.
#[derive(Clone)]
pub struct BundleCtx {
    bundle_id: BundleId,
    symbolic_name: Arc<str>,
    config_provider: Arc<dyn ConfigProvider>,
    registry: ServiceRegistry,
    cancellation_token: CancellationToken,
}

/// Factory for per-bundle contexts.
///
/// **Internal use only** - owned by the `Framework`, which creates one context per
/// installed bundle with a child of its root cancellation token.
pub struct BundleContextBuilder {
    config_provider: Arc<dyn ConfigProvider>,
    registry: ServiceRegistry,
    root_token: CancellationToken,
}

impl BundleContextBuilder {
    #[must_use]
    pub fn new(
        config_provider: Arc<dyn ConfigProvider>,
        registry: ServiceRegistry,
        root_token: CancellationToken,
    ) -> Self {
        Self {
            config_provider,
            registry,
            root_token,
        }
    }

    #[must_use]
    pub fn for_bundle(&self, bundle_id: BundleId, symbolic_name: &str) -> BundleCtx {
        BundleCtx::new(
            bundle_id,
            symbolic_name,
            self.config_provider.clone(),
            self.registry.clone(),
            self.root_token.child_token(),
        )
    }
}

impl BundleCtx {
    #[must_use]
    pub fn new(
        bundle_id: BundleId,
        symbolic_name: impl Into<Arc<str>>,
        config_provider: Arc<dyn ConfigProvider>,
        registry: ServiceRegistry,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            bundle_id,
            symbolic_name: symbolic_name.into(),
            config_provider,
            registry,
            cancellation_token,
        }
    }

    // ---- identity ----

    #[inline]
    #[must_use]
    pub fn bundle_id(&self) -> BundleId {
        self.bundle_id
    }

    #[inline]
    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Cancelled when the framework shuts down.
    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    // ---- registry, attributed to this bundle ----

    /// Publish `service` under the interface type `T`.
    ///
    /// # Errors
    /// See [`ServiceRegistry::register`].
    pub async fn register_service<T>(
        &self,
        service: Arc<T>,
        properties: Properties,
    ) -> Result<ServiceRegistration, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry
            .register::<T>(self.bundle_id, service, properties)
            .await
    }

    #[must_use]
    pub fn get_service_reference<T>(&self) -> Option<ServiceReference>
    where
        T: ?Sized + 'static,
    {
        self.registry.get_service_reference::<T>()
    }

    /// # Errors
    /// Returns `RegistryError::Filter` if `filter` is malformed.
    pub fn get_service_references<T>(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<ServiceReference>, RegistryError>
    where
        T: ?Sized + 'static,
    {
        self.registry.get_service_references::<T>(filter)
    }

    /// Resolve a reference, counting one use for this bundle.
    ///
    /// # Errors
    /// Returns `RegistryError::TypeMismatch` if the service was not registered as `T`.
    pub fn get_service<T>(
        &self,
        reference: &ServiceReference,
    ) -> Result<Option<Arc<T>>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry.get_service::<T>(self.bundle_id, reference)
    }

    pub fn unget_service(&self, reference: &ServiceReference) -> bool {
        self.registry.unget_service(self.bundle_id, reference)
    }

    /// # Errors
    /// Returns `FilterError` if `filter` is malformed.
    pub fn add_service_listener(
        &self,
        listener: Arc<dyn ServiceListener>,
        filter: Option<&str>,
    ) -> Result<ListenerId, FilterError> {
        self.registry.add_listener(self.bundle_id, listener, filter)
    }

    pub fn remove_service_listener(&self, id: ListenerId) -> bool {
        self.registry.remove_listener(id)
    }

    // ---- configuration ----

    #[inline]
    #[must_use]
    pub fn config_provider(&self) -> &dyn ConfigProvider {
        &*self.config_provider
    }

    /// Deserialize the bundle's config section into T, or use defaults if missing.
    ///
    /// It extracts the 'config' field from: `bundles.<name> = { enabled: ..., config: ... }`
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidConfig` if the section exists but does not deserialize.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, ConfigError> {
        bundle_config_or_default(self.config_provider.as_ref(), &self.symbolic_name)
    }

    /// Get the raw JSON value of the bundle's config section (an empty object if absent).
    #[must_use]
    pub fn raw_config(&self) -> &serde_json::Value {
        use std::sync::LazyLock;

        static EMPTY: LazyLock<serde_json::Value> =
            LazyLock::new(|| serde_json::Value::Object(serde_json::Map::new()));

        self.config_provider
            .get_bundle_config(&self.symbolic_name)
            .and_then(serde_json::Value::as_object)
            .and_then(|obj| obj.get("config"))
            .unwrap_or(&EMPTY)
    }
}

impl std::fmt::Debug for BundleCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleCtx")
            .field("bundle_id", &self.bundle_id)
            .field("symbolic_name", &self.symbolic_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Deserialize, Default)]
    struct TestConfig {
        #[serde(default)]
        name: String,
    }

    struct MockConfigProvider {
        bundles: HashMap<String, serde_json::Value>,
    }

    impl ConfigProvider for MockConfigProvider {
        fn get_bundle_config(&self, bundle: &str) -> Option<&serde_json::Value> {
            self.bundles.get(bundle)
        }
    }

    fn builder() -> BundleContextBuilder {
        let bundles = HashMap::from([(
            "configured".to_owned(),
            json!({ "config": { "name": "Jane" } }),
        )]);
        BundleContextBuilder::new(
            Arc::new(MockConfigProvider { bundles }),
            ServiceRegistry::new(),
            CancellationToken::new(),
        )
    }

    trait Echo: Send + Sync {
        fn echo(&self) -> u8;
    }
    struct EchoImpl;
    impl Echo for EchoImpl {
        fn echo(&self) -> u8 {
            5
        }
    }

    #[test]
    fn config_is_read_from_bundle_section() {
        let b = builder();
        let ctx = b.for_bundle(BundleId::new(1), "configured");
        let cfg: TestConfig = ctx.config().unwrap();
        assert_eq!(cfg.name, "Jane");
        assert_eq!(ctx.raw_config(), &json!({ "name": "Jane" }));
    }

    #[test]
    fn missing_config_uses_defaults() {
        let b = builder();
        let ctx = b.for_bundle(BundleId::new(2), "plain");
        let cfg: TestConfig = ctx.config().unwrap();
        assert_eq!(cfg, TestConfig::default());
        assert_eq!(ctx.raw_config(), &json!({}));
    }

    #[test]
    fn child_tokens_follow_the_root() {
        let root = CancellationToken::new();
        let b = BundleContextBuilder::new(
            Arc::new(crate::config::EmptyConfig),
            ServiceRegistry::new(),
            root.clone(),
        );
        let ctx = b.for_bundle(BundleId::new(3), "x");
        assert!(!ctx.cancellation_token().is_cancelled());
        root.cancel();
        assert!(ctx.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn registry_calls_are_attributed_to_the_bundle() {
        let b = builder();
        let provider = b.for_bundle(BundleId::new(10), "provider");
        let consumer = b.for_bundle(BundleId::new(11), "consumer");

        let reg = provider
            .register_service::<dyn Echo>(Arc::new(EchoImpl), Properties::new())
            .await
            .unwrap();
        assert_eq!(reg.reference().bundle_id(), provider.bundle_id());

        let reference = consumer.get_service_reference::<dyn Echo>().unwrap();
        let svc = consumer.get_service::<dyn Echo>(&reference).unwrap().unwrap();
        assert_eq!(svc.echo(), 5);
        assert_eq!(
            consumer
                .registry()
                .use_count(consumer.bundle_id(), &reference),
            1
        );
        assert!(consumer.unget_service(&reference));
        assert!(!consumer.unget_service(&reference));
    }
}
