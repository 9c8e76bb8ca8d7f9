use async_trait::async_trait;
use bundlekit::{Bundle, BundleCtx, BundleManifest};
use tracing::info;

pub const BUNDLE_NAME: &str = "hello-world";

pub const START_MESSAGE: &str = "Hello world.";
pub const STOP_MESSAGE: &str = "Goodbye world.";

/// Prints a line on start and another on stop. Touches nothing else.
#[derive(Default)]
pub struct HelloWorld;

#[async_trait]
impl Bundle for HelloWorld {
    fn manifest(&self) -> BundleManifest {
        BundleManifest::new(BUNDLE_NAME, env!("CARGO_PKG_VERSION"))
    }

    async fn start(&self, ctx: &BundleCtx) -> anyhow::Result<()> {
        println!("{START_MESSAGE}");
        info!(bundle = %ctx.bundle_id(), "{START_MESSAGE}");
        Ok(())
    }

    async fn stop(&self, ctx: &BundleCtx) -> anyhow::Result<()> {
        println!("{STOP_MESSAGE}");
        info!(bundle = %ctx.bundle_id(), "{STOP_MESSAGE}");
        Ok(())
    }
}

bundlekit::register_bundle!(BUNDLE_NAME, HelloWorld);
