//! The supervisor owning bundle states and the shared service registry.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigProvider;
use crate::context::{BundleContextBuilder, BundleCtx};
use crate::contracts::{Bundle, BundleId, BundleManifest};
use crate::lifecycle::{BundleState, LifecycleError};
use crate::service_registry::ServiceRegistry;

#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("bundle '{name}' is already installed")]
    DuplicateBundle { name: &'static str },

    #[error("bundle {id} is not installed")]
    NotFound { id: BundleId },

    #[error("bundle '{bundle}' requires '{missing}', which is not installed")]
    Unresolved {
        bundle: &'static str,
        missing: &'static str,
    },

    #[error("dependency cycle among bundles: {}", bundles.join(", "))]
    DependencyCycle { bundles: Vec<&'static str> },

    #[error("bundle '{bundle}': {source}")]
    Lifecycle {
        bundle: &'static str,
        #[source]
        source: LifecycleError,
    },

    #[error("bundle '{bundle}' failed to start: {source}")]
    Start {
        bundle: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("bundle '{bundle}' failed to stop: {source}")]
    Stop {
        bundle: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Snapshot of one installed bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    pub id: BundleId,
    pub symbolic_name: &'static str,
    pub version: &'static str,
    pub state: BundleState,
}

struct BundleRecord {
    id: BundleId,
    manifest: BundleManifest,
    bundle: Arc<dyn Bundle>,
    ctx: BundleCtx,
    state: Mutex<BundleState>,
    /// Serializes start/stop/uninstall of this bundle; held across the bundle's own hooks.
    transitions: tokio::sync::Mutex<()>,
}

impl BundleRecord {
    fn name(&self) -> &'static str {
        self.manifest.symbolic_name
    }

    fn state(&self) -> BundleState {
        *self.state.lock()
    }

    fn transition(&self, to: BundleState) -> Result<(), FrameworkError> {
        let mut state = self.state.lock();
        let from = *state;
        *state = from
            .transition(to)
            .map_err(|source| FrameworkError::Lifecycle {
                bundle: self.name(),
                source,
            })?;
        tracing::debug!(bundle = self.name(), id = %self.id, %from, %to, "bundle state changed");
        Ok(())
    }
}

/// Installs bundles, drives their lifecycle and cleans up after them.
pub struct Framework {
    registry: ServiceRegistry,
    contexts: BundleContextBuilder,
    cancel: CancellationToken,
    bundles: RwLock<BTreeMap<BundleId, Arc<BundleRecord>>>,
    next_id: AtomicU64,
}

impl Framework {
    #[must_use]
    pub fn new(config_provider: Arc<dyn ConfigProvider>) -> Self {
        Self::with_cancellation(config_provider, CancellationToken::new())
    }

    /// Bundle contexts receive child tokens of `cancel`.
    #[must_use]
    pub fn with_cancellation(
        config_provider: Arc<dyn ConfigProvider>,
        cancel: CancellationToken,
    ) -> Self {
        let registry = ServiceRegistry::new();
        Self {
            contexts: BundleContextBuilder::new(config_provider, registry.clone(), cancel.clone()),
            registry,
            cancel,
            bundles: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Install a bundle in the `Installed` state.
    ///
    /// # Errors
    /// Returns `FrameworkError::DuplicateBundle` if the symbolic name is taken.
    pub fn install(&self, bundle: Arc<dyn Bundle>) -> Result<BundleId, FrameworkError> {
        let manifest = bundle.manifest();
        let mut bundles = self.bundles.write();
        if bundles
            .values()
            .any(|r| r.manifest.symbolic_name == manifest.symbolic_name)
        {
            return Err(FrameworkError::DuplicateBundle {
                name: manifest.symbolic_name,
            });
        }

        let id = BundleId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = BundleRecord {
            id,
            ctx: self.contexts.for_bundle(id, manifest.symbolic_name),
            manifest,
            bundle,
            state: Mutex::new(BundleState::Installed),
            transitions: tokio::sync::Mutex::new(()),
        };
        bundles.insert(id, Arc::new(record));
        tracing::info!(
            bundle = manifest.symbolic_name,
            version = manifest.version,
            %id,
            "Installed bundle"
        );
        Ok(id)
    }

    /// Move an `Installed` bundle to `Resolved` once everything it requires is installed.
    /// Bundles past `Installed` are left as they are.
    ///
    /// # Errors
    /// `NotFound`, `Unresolved`, or `Lifecycle` for an uninstalled bundle.
    pub async fn resolve(&self, id: BundleId) -> Result<(), FrameworkError> {
        let record = self.record(id)?;
        let _guard = record.transitions.lock().await;
        self.resolve_locked(&record)
    }

    /// Start a bundle, resolving it first if needed. No-op when it is already `Active`.
    ///
    /// If `Bundle::start` fails, whatever the bundle registered is withdrawn and it is left
    /// `Failed`; nothing is retried.
    ///
    /// # Errors
    /// `NotFound`, `Unresolved`, `Lifecycle`, or `Start` carrying the bundle's error.
    pub async fn start(&self, id: BundleId) -> Result<(), FrameworkError> {
        let record = self.record(id)?;
        let _guard = record.transitions.lock().await;

        if record.state() == BundleState::Active {
            tracing::debug!(bundle = record.name(), "bundle already active");
            return Ok(());
        }
        self.resolve_locked(&record)?;
        record.transition(BundleState::Starting)?;

        match record.bundle.start(&record.ctx).await {
            Ok(()) => {
                record.transition(BundleState::Active)?;
                tracing::info!(bundle = record.name(), %id, "Started bundle");
                Ok(())
            }
            Err(source) => {
                self.registry.release_bundle(id).await;
                record.transition(BundleState::Failed)?;
                tracing::error!(bundle = record.name(), %id, error = %source, "Failed to start bundle");
                Err(FrameworkError::Start {
                    bundle: record.name(),
                    source,
                })
            }
        }
    }

    /// Stop an `Active` bundle; no-op in any other state.
    ///
    /// Registrations, service uses and listeners the bundle still holds afterwards are
    /// released, also when `Bundle::stop` fails (the bundle is then left `Failed`).
    ///
    /// # Errors
    /// `NotFound`, or `Stop` carrying the bundle's error.
    pub async fn stop(&self, id: BundleId) -> Result<(), FrameworkError> {
        let record = self.record(id)?;
        let _guard = record.transitions.lock().await;
        self.stop_locked(&record).await
    }

    /// Stop the bundle if needed, then remove it. A failing stop is logged and does not
    /// prevent uninstallation.
    ///
    /// # Errors
    /// `NotFound`, or `Lifecycle` if the bundle is mid-transition.
    pub async fn uninstall(&self, id: BundleId) -> Result<(), FrameworkError> {
        let record = self.record(id)?;
        let _guard = record.transitions.lock().await;

        if let Err(e) = self.stop_locked(&record).await {
            tracing::warn!(bundle = record.name(), error = %e, "Stop failed during uninstall");
        }
        record.transition(BundleState::Uninstalled)?;
        record.ctx.cancellation_token().cancel();
        self.bundles.write().remove(&id);
        tracing::info!(bundle = record.name(), %id, "Uninstalled bundle");
        Ok(())
    }

    /// Current state, or `None` when no such bundle is installed.
    #[must_use]
    pub fn state(&self, id: BundleId) -> Option<BundleState> {
        self.bundles.read().get(&id).map(|r| r.state())
    }

    #[must_use]
    pub fn bundle_id(&self, symbolic_name: &str) -> Option<BundleId> {
        self.bundles
            .read()
            .values()
            .find(|r| r.manifest.symbolic_name == symbolic_name)
            .map(|r| r.id)
    }

    /// Installed bundles in installation order.
    #[must_use]
    pub fn bundles(&self) -> Vec<BundleInfo> {
        self.bundles
            .read()
            .values()
            .map(|r| BundleInfo {
                id: r.id,
                symbolic_name: r.manifest.symbolic_name,
                version: r.manifest.version,
                state: r.state(),
            })
            .collect()
    }

    /// Dependency order of the installed bundles: requirements first, ties by install order.
    ///
    /// # Errors
    /// `Unresolved` for a requirement that is not installed, `DependencyCycle` otherwise.
    pub fn start_order(&self) -> Result<Vec<BundleId>, FrameworkError> {
        let bundles = self.bundles.read();
        let by_name: BTreeMap<&str, BundleId> = bundles
            .values()
            .map(|r| (r.manifest.symbolic_name, r.id))
            .collect();

        // id -> ids it waits for
        let mut pending: BTreeMap<BundleId, BTreeSet<BundleId>> = BTreeMap::new();
        for r in bundles.values() {
            let mut deps = BTreeSet::new();
            for &req in r.manifest.requires {
                let dep = by_name.get(req).ok_or(FrameworkError::Unresolved {
                    bundle: r.manifest.symbolic_name,
                    missing: req,
                })?;
                deps.insert(*dep);
            }
            pending.insert(r.id, deps);
        }

        let mut order = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let Some(next) = pending
                .iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id)
            else {
                return Err(FrameworkError::DependencyCycle {
                    bundles: pending
                        .keys()
                        .filter_map(|id| bundles.get(id).map(|r| r.manifest.symbolic_name))
                        .collect(),
                });
            };
            pending.remove(&next);
            for deps in pending.values_mut() {
                deps.remove(&next);
            }
            order.push(next);
        }
        Ok(order)
    }

    /// Start every installed bundle in dependency order, stopping at the first failure.
    ///
    /// # Errors
    /// Ordering errors from [`Framework::start_order`], or the first start failure.
    pub async fn start_all(&self) -> Result<(), FrameworkError> {
        tracing::info!("Phase: start");
        for id in self.start_order()? {
            self.start(id).await?;
        }
        Ok(())
    }

    /// Stop every bundle in reverse dependency order.
    ///
    /// Failures are logged and do not interrupt the pass; the first one is returned.
    ///
    /// # Errors
    /// The first `Stop` error encountered.
    pub async fn stop_all(&self) -> Result<(), FrameworkError> {
        tracing::info!("Phase: stop");
        let order = self.start_order().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "No dependency order; stopping in reverse install order");
            self.bundles.read().keys().copied().collect()
        });

        let mut first_error = None;
        for id in order.into_iter().rev() {
            if let Err(e) = self.stop(id).await {
                tracing::warn!(error = %e, "Failed to stop bundle");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn record(&self, id: BundleId) -> Result<Arc<BundleRecord>, FrameworkError> {
        self.bundles
            .read()
            .get(&id)
            .cloned()
            .ok_or(FrameworkError::NotFound { id })
    }

    fn resolve_locked(&self, record: &BundleRecord) -> Result<(), FrameworkError> {
        if record.state() != BundleState::Installed {
            return Ok(());
        }
        {
            let bundles = self.bundles.read();
            for &req in record.manifest.requires {
                if !bundles.values().any(|r| r.manifest.symbolic_name == req) {
                    return Err(FrameworkError::Unresolved {
                        bundle: record.name(),
                        missing: req,
                    });
                }
            }
        }
        record.transition(BundleState::Resolved)
    }

    async fn stop_locked(&self, record: &BundleRecord) -> Result<(), FrameworkError> {
        if record.state() != BundleState::Active {
            tracing::debug!(bundle = record.name(), state = %record.state(), "bundle not active; nothing to stop");
            return Ok(());
        }
        record.transition(BundleState::Stopping)?;

        let result = record.bundle.stop(&record.ctx).await;
        self.registry.release_bundle(record.id).await;

        match result {
            Ok(()) => {
                record.transition(BundleState::Resolved)?;
                tracing::info!(bundle = record.name(), id = %record.id, "Stopped bundle");
                Ok(())
            }
            Err(source) => {
                record.transition(BundleState::Failed)?;
                Err(FrameworkError::Stop {
                    bundle: record.name(),
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("bundles", &self.bundles())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Drop for Framework {
    /// Bundles still running are not stopped; their listeners and registrations are dropped
    /// so the registry and its event thread can be freed.
    fn drop(&mut self) {
        let running: Vec<&'static str> = self
            .bundles
            .get_mut()
            .values()
            .filter(|r| r.state().is_running())
            .map(|r| r.name())
            .collect();
        if !running.is_empty() {
            tracing::warn!(bundles = ?running, "Framework dropped with running bundles");
        }
        self.registry.clear();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::EmptyConfig;
    use async_trait::async_trait;

    struct Named(BundleManifest);

    #[async_trait]
    impl Bundle for Named {
        fn manifest(&self) -> BundleManifest {
            self.0
        }
        async fn start(&self, _ctx: &BundleCtx) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self, _ctx: &BundleCtx) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn named(name: &'static str, requires: &'static [&'static str]) -> Arc<dyn Bundle> {
        Arc::new(Named(BundleManifest::new(name, "1.0.0").requires(requires)))
    }

    fn framework() -> Framework {
        Framework::new(Arc::new(EmptyConfig))
    }

    #[test]
    fn install_assigns_increasing_ids_and_rejects_duplicates() {
        let fw = framework();
        let a = fw.install(named("a", &[])).unwrap();
        let b = fw.install(named("b", &[])).unwrap();
        assert!(a < b);
        assert_ne!(a, BundleId::SYSTEM);
        assert_eq!(fw.state(a), Some(BundleState::Installed));

        let err = fw.install(named("a", &[])).unwrap_err();
        assert!(matches!(err, FrameworkError::DuplicateBundle { name: "a" }));
    }

    #[test]
    fn start_order_puts_requirements_first() {
        let fw = framework();
        let c = fw.install(named("c", &["b"])).unwrap();
        let a = fw.install(named("a", &[])).unwrap();
        let b = fw.install(named("b", &["a"])).unwrap();
        assert_eq!(fw.start_order().unwrap(), vec![a, b, c]);
    }

    #[test]
    fn start_order_reports_cycles() {
        let fw = framework();
        fw.install(named("free", &[])).unwrap();
        fw.install(named("x", &["y"])).unwrap();
        fw.install(named("y", &["x"])).unwrap();

        match fw.start_order().unwrap_err() {
            FrameworkError::DependencyCycle { bundles } => assert_eq!(bundles, vec!["x", "y"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn start_order_reports_missing_requirements() {
        let fw = framework();
        fw.install(named("client", &["provider"])).unwrap();
        assert!(matches!(
            fw.start_order().unwrap_err(),
            FrameworkError::Unresolved {
                bundle: "client",
                missing: "provider"
            }
        ));
    }

    #[tokio::test]
    async fn resolve_requires_installed_dependencies() {
        let fw = framework();
        let client = fw.install(named("client", &["provider"])).unwrap();
        assert!(fw.resolve(client).await.is_err());
        assert_eq!(fw.state(client), Some(BundleState::Installed));

        fw.install(named("provider", &[])).unwrap();
        fw.resolve(client).await.unwrap();
        assert_eq!(fw.state(client), Some(BundleState::Resolved));
    }

    #[tokio::test]
    async fn unknown_bundle_is_not_found() {
        let fw = framework();
        let ghost = BundleId::new(99);
        assert!(matches!(
            fw.start(ghost).await,
            Err(FrameworkError::NotFound { .. })
        ));
        assert!(fw.state(ghost).is_none());
    }
}
