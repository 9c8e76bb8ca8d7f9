use async_trait::async_trait;
use bundlekit::{Bundle, BundleCtx, BundleManifest, ServiceReference, ServiceRegistration};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use greeter_sdk::Greeter;

use crate::config::GreeterProviderConfig;
use crate::domain::service::GreeterService;

pub const BUNDLE_NAME: &str = "greeter-provider";

/// Publishes one [`GreeterService`] under `dyn Greeter` while active.
#[derive(Default)]
pub struct GreeterProvider {
    registration: Mutex<Option<ServiceRegistration>>,
}

impl GreeterProvider {
    /// Reference of the current publication, if any.
    #[must_use]
    pub fn reference(&self) -> Option<ServiceReference> {
        self.registration
            .lock()
            .as_ref()
            .map(|r| r.reference().clone())
    }
}

#[async_trait]
impl Bundle for GreeterProvider {
    fn manifest(&self) -> BundleManifest {
        BundleManifest::new(BUNDLE_NAME, env!("CARGO_PKG_VERSION"))
    }

    async fn start(&self, ctx: &BundleCtx) -> anyhow::Result<()> {
        let cfg: GreeterProviderConfig = ctx.config()?;
        debug!(ranking = cfg.ranking, extra = cfg.properties.len(), "Loaded greeter-provider config");

        let api: Arc<dyn Greeter> = Arc::new(GreeterService::new());

        println!("Registering service.");
        let registration = ctx
            .register_service::<dyn Greeter>(api, cfg.registration_properties())
            .await?;
        info!(service_id = %registration.reference().id(), "Registered greeter service");

        *self.registration.lock() = Some(registration);
        Ok(())
    }

    async fn stop(&self, _ctx: &BundleCtx) -> anyhow::Result<()> {
        let registration = self.registration.lock().take();
        let Some(registration) = registration else {
            debug!("No greeter registration held; nothing to unregister");
            return Ok(());
        };

        println!("Unregistering service.");
        let id = registration.reference().id();
        registration.unregister().await?;
        info!(service_id = %id, "Unregistered greeter service");
        Ok(())
    }
}

bundlekit::register_bundle!(BUNDLE_NAME, GreeterProvider);
