//! Bundle runner.
//!
//! Phase order: **install → start → wait → stop**.
//!
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigProvider;
use crate::contracts::Bundle;
use crate::framework::Framework;
use crate::runtime::shutdown;

/// How the runner should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Options for running a set of bundles.
pub struct RunOptions {
    /// Provider of bundle config sections (raw JSON by symbolic name).
    pub bundles_cfg: Arc<dyn ConfigProvider>,
    /// Bundles to install, usually `BundleCatalog::discover().instantiate()`.
    pub bundles: Vec<Arc<dyn Bundle>>,
    /// Shutdown strategy.
    pub shutdown: ShutdownOptions,
}

/// Full cycle: install → start → wait → stop.
///
/// # Errors
/// Returns the first install, ordering, start or stop failure. If starting fails, the
/// bundles already started are stopped before returning.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match shutdown::wait_for_shutdown().await {
                    Ok(()) => {
                        tracing::info!("shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    let framework = Framework::with_cancellation(opts.bundles_cfg.clone(), cancel.clone());

    tracing::info!("Phase: install");
    for bundle in opts.bundles {
        let name = bundle.manifest().symbolic_name;
        if !opts.bundles_cfg.bundle_enabled(name) {
            tracing::info!(bundle = name, "Bundle disabled by configuration; skipping");
            continue;
        }
        framework.install(bundle)?;
    }

    if let Err(e) = framework.start_all().await {
        tracing::error!(error = %e, "Start phase failed; stopping started bundles");
        if let Err(stop_err) = framework.stop_all().await {
            tracing::warn!(error = %stop_err, "Stop phase after failed start reported errors");
        }
        return Err(e.into());
    }

    cancel.cancelled().await;

    framework.stop_all().await?;
    tracing::info!(services = framework.registry().len(), "All bundles stopped");
    Ok(())
}
