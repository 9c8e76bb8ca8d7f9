mod registered_bundles;

use anyhow::Result;
use bundlekit::runtime::{RunOptions, ShutdownOptions, run};
use bundlekit::{BundleCatalog, ConfigProvider, Framework};
use bundlekit_bootstrap::{AppConfig, AppConfigProvider, CliArgs, init_logging};
use clap::{Parser, Subcommand};

use std::path::PathBuf;
use std::sync::Arc;

/// Bundle host - installs the linked bundles and drives them through their lifecycle
#[derive(Parser)]
#[command(name = "bundle-host")]
#[command(about = "Bundle host - installs the linked bundles and drives them through their lifecycle")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start all bundles and run until Ctrl+C / SIGTERM
    Run {
        /// Stop again as soon as every bundle has started
        #[arg(long)]
        once: bool,
    },
    /// Validate configuration and bundle dependencies, then exit
    Check,
    /// List the bundles linked into this host
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // 1) defaults -> 2) YAML (if provided) -> 3) env (BUNDLE_HOST__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    config.apply_cli_overrides(&args);

    init_logging(&config.logging)?;

    if args.print_config {
        println!("Effective configuration:\n{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run { once: false }) {
        Commands::Run { once } => run_host(config, once).await,
        Commands::Check => check_config(config),
        Commands::List => {
            list_bundles(&config);
            Ok(())
        }
    }
}

async fn run_host(config: AppConfig, once: bool) -> Result<()> {
    tracing::info!("Bundle host starting");

    let shutdown = if once {
        ShutdownOptions::Future(Box::pin(async {}))
    } else {
        ShutdownOptions::Signals
    };

    run(RunOptions {
        bundles_cfg: Arc::new(AppConfigProvider::new(config)),
        bundles: BundleCatalog::discover().instantiate(),
        shutdown,
    })
    .await
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    let catalog = BundleCatalog::discover();

    for name in config.configured_bundles() {
        if !catalog.names().any(|known| known == name) {
            tracing::warn!(bundle = name, "Config section for a bundle this host does not link");
        }
    }

    let provider = Arc::new(AppConfigProvider::new(config));
    let framework = Framework::new(provider.clone());
    for bundle in catalog.instantiate() {
        if provider.bundle_enabled(bundle.manifest().symbolic_name) {
            framework.install(bundle)?;
        }
    }
    let order = framework.start_order()?;

    println!("Configuration is valid");
    println!("Start order: {}", start_order_line(&framework, &order));
    Ok(())
}

fn start_order_line(framework: &Framework, order: &[bundlekit::BundleId]) -> String {
    let infos = framework.bundles();
    order
        .iter()
        .filter_map(|id| infos.iter().find(|info| info.id == *id))
        .map(|info| info.symbolic_name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn list_bundles(config: &AppConfig) {
    let provider = AppConfigProvider::new(config.clone());
    for bundle in BundleCatalog::discover().instantiate() {
        let manifest = bundle.manifest();
        let status = if provider.bundle_enabled(manifest.symbolic_name) {
            "enabled"
        } else {
            "disabled"
        };
        println!("{} {} ({status})", manifest.symbolic_name, manifest.version);
    }
}
