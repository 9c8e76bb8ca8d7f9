//! Typed service registry.
//!
//! Design goals:
//! - Providers publish an implementation under its *interface type* (`dyn Trait`) together
//!   with a property map, and keep an exclusive [`ServiceRegistration`] handle.
//! - Consumers look services up by interface type, resolve a [`ServiceReference`] to an
//!   `Arc<T>`, and release it again; the registry tracks per-bundle use counts.
//! - Listeners subscribe with an optional [`Filter`] and are told about every
//!   registration, property change and withdrawal that matches.
//!
//! Implementation details:
//! - Type identity = `type_name::<T>()`, which works for `T = dyn Trait`; it is also published
//!   as the `objectclass` property so filters can select by contract.
//! - Value = `Arc<T>` stored as `Box<dyn Any + Send + Sync>` (downcast on read).
//! - The state lock is never held across `.await` or while listeners run.
//!
//! Notes:
//! - `Unregistering` is delivered before the entry is discarded, so listeners can still
//!   resolve the service during their cleanup.
//! - Lookups return the best match by highest `service.ranking`, then lowest service id.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::contracts::BundleId;
use crate::events::{
    EventDispatcher, ListenerEntry, ListenerId, ServiceEvent, ServiceEventKind, ServiceListener,
};
use crate::filter::{Filter, FilterError};

/// Contract type identity of a registration.
pub const OBJECTCLASS: &str = "objectclass";
/// Registry-assigned service id.
pub const SERVICE_ID: &str = "service.id";
/// Id of the bundle that published the service.
pub const SERVICE_BUNDLEID: &str = "service.bundleid";
/// Integer ranking; higher wins on lookup. Defaults to 0.
pub const SERVICE_RANKING: &str = "service.ranking";

/// Registration properties.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Type identity used for `objectclass` and lookups.
#[inline]
#[must_use]
pub fn type_identity<T: ?Sized + 'static>() -> &'static str {
    std::any::type_name::<T>()
}

/// Stable type key for trait objects: the fully-qualified `type_name::<T>()`.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(type_identity::<T>())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Registry-assigned id; never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(u64);

impl ServiceId {
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token naming one registration. Cheap to clone and compare.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServiceReference {
    id: ServiceId,
    bundle: BundleId,
    type_key: TypeKey,
}

impl ServiceReference {
    #[inline]
    #[must_use]
    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// Bundle that published the service.
    #[inline]
    #[must_use]
    pub fn bundle_id(&self) -> BundleId {
        self.bundle
    }

    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_key.as_str()
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.id)
            .field("bundle", &self.bundle)
            .field("objectclass", &self.type_key)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("type mismatch for service {id}: requested {requested:?}, registered {registered:?}")]
    TypeMismatch {
        id: ServiceId,
        requested: TypeKey,
        registered: TypeKey,
    },

    #[error("service {id} is not registered")]
    NotRegistered { id: ServiceId },

    #[error("invalid property '{key}': {reason}")]
    InvalidProperty { key: String, reason: &'static str },

    #[error(transparent)]
    Filter(#[from] FilterError),
}

type Boxed = Box<dyn Any + Send + Sync>;

struct Entry {
    reference: ServiceReference,
    properties: Arc<Properties>,
    ranking: i64,
    instance: Boxed,
    uses: HashMap<BundleId, usize>,
    unregistering: bool,
}

#[derive(Default)]
struct State {
    services: BTreeMap<ServiceId, Entry>,
    listeners: Vec<Arc<ListenerEntry>>,
}

impl State {
    fn listeners_for(&self, props: &Properties) -> Vec<Arc<ListenerEntry>> {
        self.listeners
            .iter()
            .filter(|l| l.accepts(props))
            .cloned()
            .collect()
    }

    /// Live registrations of one type, best first.
    fn ranked(&self, type_key: TypeKey, filter: Option<&Filter>) -> Vec<ServiceReference> {
        let mut found: Vec<&Entry> = self
            .services
            .values()
            .filter(|e| e.reference.type_key == type_key && !e.unregistering)
            .filter(|e| filter.is_none_or(|f| f.matches(&e.properties)))
            .collect();
        found.sort_by(|a, b| {
            b.ranking
                .cmp(&a.ranking)
                .then_with(|| a.reference.id.cmp(&b.reference.id))
        });
        found.into_iter().map(|e| e.reference.clone()).collect()
    }
}

struct Inner {
    state: RwLock<State>,
    next_service_id: AtomicU64,
    next_listener_id: AtomicU64,
    dispatcher: EventDispatcher,
}

/// Shared, cloneable handle to a registry.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.read();
        f.debug_struct("ServiceRegistry")
            .field("services", &st.services.len())
            .field("listeners", &st.listeners.len())
            .finish()
    }
}

impl ServiceRegistry {
    /// Create an empty registry and its event dispatcher thread.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                next_service_id: AtomicU64::new(1),
                next_listener_id: AtomicU64::new(1),
                dispatcher: EventDispatcher::spawn(),
            }),
        }
    }

    /// Publish `service` under the interface type `T`.
    ///
    /// `T` can be a trait object like `dyn my_bundle::api::MyApi`. Framework keys
    /// (`objectclass`, `service.id`, `service.bundleid`) in `properties` are overwritten.
    /// Returns after `Registered` has been delivered to every matching listener.
    ///
    /// # Errors
    /// Returns `RegistryError::InvalidProperty` if `service.ranking` is not an integer.
    pub async fn register<T>(
        &self,
        bundle: BundleId,
        service: Arc<T>,
        properties: Properties,
    ) -> Result<ServiceRegistration, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        let ranking = ranking_of(&properties)?;
        let id = ServiceId(self.inner.next_service_id.fetch_add(1, Ordering::SeqCst));
        let reference = ServiceReference {
            id,
            bundle,
            type_key,
        };
        let properties = Arc::new(with_framework_keys(properties, &reference));

        let targets = {
            let mut st = self.inner.state.write();
            st.services.insert(
                id,
                Entry {
                    reference: reference.clone(),
                    properties: properties.clone(),
                    ranking,
                    instance: Box::new(service),
                    uses: HashMap::new(),
                    unregistering: false,
                },
            );
            st.listeners_for(&properties)
        };

        tracing::debug!(
            service_id = %id,
            %bundle,
            objectclass = type_key.as_str(),
            "service registered"
        );
        self.inner
            .dispatcher
            .deliver(
                ServiceEvent::new(ServiceEventKind::Registered, reference.clone(), properties),
                targets,
            )
            .await;

        Ok(ServiceRegistration {
            registry: self.clone(),
            reference,
        })
    }

    /// Best live registration of `T`, if any.
    #[must_use]
    pub fn get_service_reference<T>(&self) -> Option<ServiceReference>
    where
        T: ?Sized + 'static,
    {
        self.inner
            .state
            .read()
            .ranked(TypeKey::of::<T>(), None)
            .into_iter()
            .next()
    }

    /// All live registrations of `T`, best first, optionally narrowed by a filter.
    ///
    /// # Errors
    /// Returns `RegistryError::Filter` if `filter` is malformed.
    pub fn get_service_references<T>(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<ServiceReference>, RegistryError>
    where
        T: ?Sized + 'static,
    {
        let filter = filter.map(Filter::parse).transpose()?;
        Ok(self
            .inner
            .state
            .read()
            .ranked(TypeKey::of::<T>(), filter.as_ref()))
    }

    /// Resolve a reference on behalf of `bundle`, counting one use.
    ///
    /// Returns `Ok(None)` once the registration is gone. A service that is being
    /// unregistered can still be resolved while `Unregistering` is delivered.
    ///
    /// # Errors
    /// Returns `RegistryError::TypeMismatch` if the service was not registered as `T`.
    pub fn get_service<T>(
        &self,
        bundle: BundleId,
        reference: &ServiceReference,
    ) -> Result<Option<Arc<T>>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let mut st = self.inner.state.write();
        let Some(entry) = st.services.get_mut(&reference.id) else {
            return Ok(None);
        };

        // Stored value is exactly `Arc<T>` when the type keys agree.
        let Some(service) = entry.instance.downcast_ref::<Arc<T>>() else {
            return Err(RegistryError::TypeMismatch {
                id: reference.id,
                requested: TypeKey::of::<T>(),
                registered: entry.reference.type_key,
            });
        };
        let service = service.clone();
        *entry.uses.entry(bundle).or_insert(0) += 1;
        Ok(Some(service))
    }

    /// Release one use of a reference held by `bundle`.
    ///
    /// Returns `false` when the bundle holds no use of it (already released, never
    /// acquired, or the registration is gone). Never fails.
    pub fn unget_service(&self, bundle: BundleId, reference: &ServiceReference) -> bool {
        let mut st = self.inner.state.write();
        let Some(entry) = st.services.get_mut(&reference.id) else {
            return false;
        };
        match entry.uses.get_mut(&bundle) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                entry.uses.remove(&bundle);
                true
            }
            None => false,
        }
    }

    /// Number of outstanding uses `bundle` holds on a reference.
    #[must_use]
    pub fn use_count(&self, bundle: BundleId, reference: &ServiceReference) -> usize {
        self.inner
            .state
            .read()
            .services
            .get(&reference.id)
            .and_then(|e| e.uses.get(&bundle).copied())
            .unwrap_or(0)
    }

    /// Properties of a registration, if it still exists.
    #[must_use]
    pub fn properties(&self, reference: &ServiceReference) -> Option<Arc<Properties>> {
        self.inner
            .state
            .read()
            .services
            .get(&reference.id)
            .map(|e| e.properties.clone())
    }

    /// Subscribe a listener on behalf of `bundle`.
    ///
    /// # Errors
    /// Returns `FilterError` if `filter` is malformed; nothing is subscribed then.
    pub fn add_listener(
        &self,
        bundle: BundleId,
        listener: Arc<dyn ServiceListener>,
        filter: Option<&str>,
    ) -> Result<ListenerId, FilterError> {
        let filter = filter.map(Filter::parse).transpose()?;
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(listener = %id, %bundle, filter = ?filter.as_ref().map(ToString::to_string), "service listener added");
        self.inner
            .state
            .write()
            .listeners
            .push(Arc::new(ListenerEntry::new(id, bundle, filter, listener)));
        Ok(id)
    }

    /// Unsubscribe a listener. Returns `false` if it was not subscribed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut st = self.inner.state.write();
        let Some(pos) = st.listeners.iter().position(|l| l.id == id) else {
            return false;
        };
        st.listeners.remove(pos).deactivate();
        true
    }

    /// Withdraw everything `bundle` still owns in the registry: its listeners, its uses
    /// of other services, and its own registrations (each announced as `Unregistering`).
    pub async fn release_bundle(&self, bundle: BundleId) {
        let (owned, released_uses, removed_listeners) = {
            let mut st = self.inner.state.write();
            let before = st.listeners.len();
            st.listeners.retain(|l| {
                let keep = l.bundle != bundle;
                if !keep {
                    l.deactivate();
                }
                keep
            });
            let removed_listeners = before - st.listeners.len();

            let mut released_uses = 0;
            let mut owned = Vec::new();
            for entry in st.services.values_mut() {
                released_uses += entry.uses.remove(&bundle).unwrap_or(0);
                if entry.reference.bundle == bundle && !entry.unregistering {
                    owned.push(entry.reference.clone());
                }
            }
            (owned, released_uses, removed_listeners)
        };

        for reference in &owned {
            if let Err(e) = self.unregister(reference).await {
                tracing::debug!(error = %e, service_id = %reference.id, "service already withdrawn");
            }
        }

        if !owned.is_empty() || released_uses > 0 || removed_listeners > 0 {
            tracing::debug!(
                %bundle,
                services = owned.len(),
                uses = released_uses,
                listeners = removed_listeners,
                "released bundle registry resources"
            );
        }
    }

    /// Drop every listener and registration without delivering events.
    ///
    /// Listeners commonly hold a `BundleCtx`, which holds this registry; clearing them lets
    /// the registry and its dispatcher thread go away once the last handle is dropped.
    pub fn clear(&self) {
        let (listeners, services) = {
            let mut st = self.inner.state.write();
            for listener in &st.listeners {
                listener.deactivate();
            }
            (
                std::mem::take(&mut st.listeners),
                std::mem::take(&mut st.services),
            )
        };
        if !listeners.is_empty() || !services.is_empty() {
            tracing::debug!(
                listeners = listeners.len(),
                services = services.len(),
                "service registry cleared"
            );
        }
    }

    /// Introspection: number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .state
            .read()
            .services
            .values()
            .filter(|e| !e.unregistering)
            .count()
    }

    /// Check if no service is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Introspection: number of subscribed listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.state.read().listeners.len()
    }

    async fn unregister(&self, reference: &ServiceReference) -> Result<(), RegistryError> {
        let id = reference.id;
        let (properties, targets) = {
            let mut st = self.inner.state.write();
            let entry = st
                .services
                .get_mut(&id)
                .filter(|e| !e.unregistering)
                .ok_or(RegistryError::NotRegistered { id })?;
            entry.unregistering = true;
            let properties = entry.properties.clone();
            let targets = st.listeners_for(&properties);
            (properties, targets)
        };

        self.inner
            .dispatcher
            .deliver(
                ServiceEvent::new(
                    ServiceEventKind::Unregistering,
                    reference.clone(),
                    properties,
                ),
                targets,
            )
            .await;

        let removed = self.inner.state.write().services.remove(&id);
        if let Some(entry) = removed {
            let outstanding: usize = entry.uses.values().sum();
            tracing::debug!(
                service_id = %id,
                bundle = %entry.reference.bundle,
                outstanding_uses = outstanding,
                "service unregistered"
            );
        }
        Ok(())
    }

    async fn set_properties(
        &self,
        reference: &ServiceReference,
        properties: Properties,
    ) -> Result<(), RegistryError> {
        let id = reference.id;
        let ranking = ranking_of(&properties)?;
        let properties = Arc::new(with_framework_keys(properties, reference));

        let (modified, end_match) = {
            let mut st = self.inner.state.write();
            let entry = st
                .services
                .get_mut(&id)
                .filter(|e| !e.unregistering)
                .ok_or(RegistryError::NotRegistered { id })?;
            let previous = std::mem::replace(&mut entry.properties, properties.clone());
            entry.ranking = ranking;

            let mut modified = Vec::new();
            let mut end_match = Vec::new();
            for listener in &st.listeners {
                if listener.accepts(&properties) {
                    modified.push(listener.clone());
                } else if listener.accepts(&previous) {
                    end_match.push(listener.clone());
                }
            }
            (modified, end_match)
        };

        tracing::debug!(service_id = %id, "service properties modified");
        self.inner
            .dispatcher
            .deliver(
                ServiceEvent::new(
                    ServiceEventKind::Modified,
                    reference.clone(),
                    properties.clone(),
                ),
                modified,
            )
            .await;
        self.inner
            .dispatcher
            .deliver(
                ServiceEvent::new(
                    ServiceEventKind::ModifiedEndMatch,
                    reference.clone(),
                    properties,
                ),
                end_match,
            )
            .await;
        Ok(())
    }
}

/// Exclusive handle to a publication. Consumed by [`ServiceRegistration::unregister`].
///
/// Dropping the handle leaves the service published; the framework withdraws it when the
/// owning bundle stops.
#[must_use = "dropping a registration leaves the service published until its bundle stops"]
pub struct ServiceRegistration {
    registry: ServiceRegistry,
    reference: ServiceReference,
}

impl ServiceRegistration {
    #[inline]
    #[must_use]
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Replace the caller-supplied properties and notify listeners.
    ///
    /// # Errors
    /// Returns `RegistryError::NotRegistered` if the framework already withdrew the service,
    /// or `RegistryError::InvalidProperty` for a non-integer `service.ranking`.
    pub async fn set_properties(&self, properties: Properties) -> Result<(), RegistryError> {
        self.registry
            .set_properties(&self.reference, properties)
            .await
    }

    /// Withdraw the service. Listeners see `Unregistering` before it disappears.
    ///
    /// # Errors
    /// Returns `RegistryError::NotRegistered` if the framework already withdrew the service.
    pub async fn unregister(self) -> Result<(), RegistryError> {
        self.registry.unregister(&self.reference).await
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

fn ranking_of(properties: &Properties) -> Result<i64, RegistryError> {
    let value = properties
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(SERVICE_RANKING))
        .map(|(_, v)| v);
    match value {
        None => Ok(0),
        Some(v) => v.as_i64().ok_or_else(|| RegistryError::InvalidProperty {
            key: SERVICE_RANKING.to_owned(),
            reason: "must be an integer",
        }),
    }
}

fn with_framework_keys(mut properties: Properties, reference: &ServiceReference) -> Properties {
    properties.retain(|k, _| {
        ![OBJECTCLASS, SERVICE_ID, SERVICE_BUNDLEID]
            .iter()
            .any(|reserved| k.eq_ignore_ascii_case(reserved))
    });
    properties.insert(OBJECTCLASS.to_owned(), reference.type_name().into());
    properties.insert(SERVICE_ID.to_owned(), reference.id.get().into());
    properties.insert(SERVICE_BUNDLEID.to_owned(), reference.bundle.get().into());
    properties
}
