use async_trait::async_trait;
use bundlekit::{Bundle, BundleCtx, BundleManifest, Filter, ListenerId, ServiceReference};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info};

use greeter_sdk::Greeter;

use crate::config::GreeterClientConfig;
use crate::listener::{ClientState, GreetingListener};

pub const BUNDLE_NAME: &str = "greeter-client";

/// Subscribes to `Greeter` registrations and greets through each one that appears.
#[derive(Default)]
pub struct GreeterClient {
    state: Arc<ClientState>,
    listener: Mutex<Option<ListenerId>>,
}

impl GreeterClient {
    /// Greetings produced so far, oldest first.
    #[must_use]
    pub fn greetings(&self) -> Vec<String> {
        self.state.greetings.lock().clone()
    }

    /// Reference currently held, if any.
    #[must_use]
    pub fn held_reference(&self) -> Option<ServiceReference> {
        self.state.held.lock().clone()
    }

    /// Whether a listener is subscribed.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.listener.lock().is_some()
    }
}

#[async_trait]
impl Bundle for GreeterClient {
    fn manifest(&self) -> BundleManifest {
        BundleManifest::new(BUNDLE_NAME, env!("CARGO_PKG_VERSION"))
    }

    async fn start(&self, ctx: &BundleCtx) -> anyhow::Result<()> {
        let cfg: GreeterClientConfig = ctx.config()?;
        let filter = cfg
            .filter
            .clone()
            .unwrap_or_else(|| Filter::object_class::<dyn Greeter>().to_string());

        let listener = Arc::new(GreetingListener::new(
            ctx.clone(),
            cfg.name.clone(),
            self.state.clone(),
        ));
        let id = match ctx.add_service_listener(listener, Some(&filter)) {
            Ok(id) => id,
            Err(e) => {
                // Stays active, just deaf.
                error!(%filter, error = %e, "Invalid service filter; greeter client will not be notified");
                return Ok(());
            }
        };
        info!(listener = %id, %filter, "Listening for greeter services");
        *self.listener.lock() = Some(id);

        // A greeter published before we subscribed produced no event.
        match ctx.get_service_references::<dyn Greeter>(Some(&filter)) {
            Ok(found) => {
                if let Some(reference) = found.first() {
                    debug!(service_id = %reference.id(), "Found greeter registered before start");
                    self.state.greet_through(ctx, reference, &cfg.name);
                }
            }
            Err(e) => error!(error = %e, "Greeter lookup failed"),
        }
        Ok(())
    }

    async fn stop(&self, ctx: &BundleCtx) -> anyhow::Result<()> {
        let listener = self.listener.lock().take();
        if let Some(id) = listener {
            ctx.remove_service_listener(id);
        }
        if self.state.release_held(ctx) {
            debug!("Released held greeter");
        }
        Ok(())
    }
}

bundlekit::register_bundle!(BUNDLE_NAME, GreeterClient);
