use bundlekit::{BundleCtx, ServiceEvent, ServiceEventKind, ServiceListener, ServiceReference};
use greeter_sdk::Greeter;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// State shared between the bundle and its listener.
#[derive(Default)]
pub struct ClientState {
    /// Reference whose service was last greeted through; holds one registry use.
    pub held: Mutex<Option<ServiceReference>>,
    pub greetings: Mutex<Vec<String>>,
}

impl ClientState {
    /// Resolve `reference`, greet through it and hold it instead of any previous one.
    ///
    /// A reference that is already held is left alone, so a service found by the start-up
    /// lookup and announced again by an event is greeted once.
    pub fn greet_through(&self, ctx: &BundleCtx, reference: &ServiceReference, name: &str) {
        let mut held = self.held.lock();
        if held.as_ref() == Some(reference) {
            debug!(service_id = %reference.id(), "Greeter already held");
            return;
        }

        let greeter = match ctx.get_service::<dyn Greeter>(reference) {
            Ok(Some(greeter)) => greeter,
            Ok(None) => {
                warn!(service_id = %reference.id(), "Greeter was withdrawn before it could be resolved; ignoring");
                return;
            }
            Err(e) => {
                error!(service_id = %reference.id(), error = %e, "Failed to resolve greeter");
                return;
            }
        };

        if let Some(previous) = held.replace(reference.clone()) {
            ctx.unget_service(&previous);
        }
        drop(held);

        let greeting = greeter.say_hi_to(name);
        println!("{greeting}");
        info!(service_id = %reference.id(), %greeting, "Greeted through service");
        self.greetings.lock().push(greeting);
    }

    /// Forget `reference` if held, then release it.
    pub fn release(&self, ctx: &BundleCtx, reference: &ServiceReference) -> bool {
        let was_held = {
            let mut held = self.held.lock();
            if held.as_ref() == Some(reference) {
                held.take();
                true
            } else {
                false
            }
        };
        let released = ctx.unget_service(reference);
        debug!(service_id = %reference.id(), was_held, released, "Released greeter reference");
        released
    }

    /// Release whatever is held. Safe to call repeatedly.
    pub fn release_held(&self, ctx: &BundleCtx) -> bool {
        let held = self.held.lock().take();
        held.is_some_and(|reference| ctx.unget_service(&reference))
    }
}

/// Reacts to `Greeter` registrations on behalf of the client bundle.
pub struct GreetingListener {
    ctx: BundleCtx,
    name: String,
    state: Arc<ClientState>,
}

impl GreetingListener {
    pub fn new(ctx: BundleCtx, name: String, state: Arc<ClientState>) -> Self {
        Self { ctx, name, state }
    }
}

impl ServiceListener for GreetingListener {
    fn service_changed(&self, event: &ServiceEvent) {
        match event.kind() {
            ServiceEventKind::Registered => {
                println!("Notification of service registered.");
                info!(service_id = %event.reference().id(), "Greeter registered");
                self.state
                    .greet_through(&self.ctx, event.reference(), &self.name);
            }
            ServiceEventKind::Unregistering => {
                println!("Notification of service unregistered.");
                info!(service_id = %event.reference().id(), "Greeter unregistering");
                self.state.release(&self.ctx, event.reference());
            }
            ServiceEventKind::Modified | ServiceEventKind::ModifiedEndMatch => {}
        }
    }
}
