//! Service events and their delivery.
//!
//! Every registry mutation produces a [`ServiceEvent`] that is handed to a single
//! dispatcher thread over a channel. The dispatcher invokes matching listeners in
//! subscription order and acknowledges the delivery, and the mutating call waits for that
//! acknowledgement. Delivery is therefore synchronous with respect to the mutation while
//! always running on one well-known thread (`bundlekit-events`).

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::contracts::BundleId;
use crate::filter::Filter;
use crate::service_registry::{Properties, ServiceReference};

/// Kind of registry change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
    /// A service has been published.
    Registered,
    /// Properties of a service changed and still match the listener's filter.
    Modified,
    /// Properties of a service changed and no longer match the listener's filter.
    ModifiedEndMatch,
    /// A service is about to be withdrawn; it can still be resolved while this is delivered.
    Unregistering,
}

impl fmt::Display for ServiceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registered => "registered",
            Self::Modified => "modified",
            Self::ModifiedEndMatch => "modified_endmatch",
            Self::Unregistering => "unregistering",
        })
    }
}

/// Immutable notification about one registration.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    kind: ServiceEventKind,
    reference: ServiceReference,
    properties: Arc<Properties>,
}

impl ServiceEvent {
    pub(crate) fn new(
        kind: ServiceEventKind,
        reference: ServiceReference,
        properties: Arc<Properties>,
    ) -> Self {
        Self {
            kind,
            reference,
            properties,
        }
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ServiceEventKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Properties of the registration at the time of the event.
    #[inline]
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

/// Receives registry notifications.
///
/// Called on the dispatcher thread. Implementations may call back into the registry
/// (`get_service`, `unget_service`, lookups) but must not block.
pub trait ServiceListener: Send + Sync + 'static {
    fn service_changed(&self, event: &ServiceEvent);
}

impl<F> ServiceListener for F
where
    F: Fn(&ServiceEvent) + Send + Sync + 'static,
{
    fn service_changed(&self, event: &ServiceEvent) {
        self(event);
    }
}

/// Handle returned when subscribing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

pub(crate) struct ListenerEntry {
    pub(crate) id: ListenerId,
    pub(crate) bundle: BundleId,
    pub(crate) filter: Option<Filter>,
    listener: Arc<dyn ServiceListener>,
    active: AtomicBool,
}

impl ListenerEntry {
    pub(crate) fn new(
        id: ListenerId,
        bundle: BundleId,
        filter: Option<Filter>,
        listener: Arc<dyn ServiceListener>,
    ) -> Self {
        Self {
            id,
            bundle,
            filter,
            listener,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn accepts(&self, props: &Properties) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(props))
    }

    /// Stop delivering to this listener, including deliveries already queued.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

struct Delivery {
    event: ServiceEvent,
    targets: Vec<Arc<ListenerEntry>>,
    span: tracing::Span,
    done: oneshot::Sender<()>,
}

/// Owns the sending side of the delivery channel; the thread exits once it is dropped.
pub(crate) struct EventDispatcher {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl EventDispatcher {
    pub(crate) fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = std::thread::Builder::new()
            .name("bundlekit-events".to_owned())
            .spawn(move || dispatch_loop(rx));
        if let Err(e) = spawned {
            // Without a thread the receiver is dropped and deliveries are skipped with a warning.
            tracing::error!(error = %e, "failed to spawn service event dispatcher");
        }
        Self { tx }
    }

    /// Hand an event to the dispatcher and wait until every target has seen it.
    pub(crate) async fn deliver(&self, event: ServiceEvent, targets: Vec<Arc<ListenerEntry>>) {
        if targets.is_empty() {
            return;
        }
        let kind = event.kind();
        let service_id = event.reference().id();
        let (done, acked) = oneshot::channel();
        let delivery = Delivery {
            event,
            targets,
            span: tracing::Span::current(),
            done,
        };
        if self.tx.send(delivery).is_err() {
            tracing::warn!(%kind, %service_id, "event dispatcher is gone; event dropped");
            return;
        }
        if acked.await.is_err() {
            tracing::warn!(%kind, %service_id, "event delivery was not acknowledged");
        }
    }
}

fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(Delivery {
        event,
        targets,
        span,
        done,
    }) = rx.blocking_recv()
    {
        span.in_scope(|| {
            for target in targets.iter().filter(|t| t.active.load(Ordering::SeqCst)) {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    target.listener.service_changed(&event);
                }));
                if outcome.is_err() {
                    tracing::error!(
                        listener = %target.id,
                        bundle = %target.bundle,
                        kind = %event.kind(),
                        service_id = %event.reference().id(),
                        "service listener panicked"
                    );
                }
            }
        });
        if done.send(()).is_err() {
            tracing::trace!("delivery acknowledgement no longer awaited");
        }
    }
    tracing::debug!("service event dispatcher stopped");
}
