//! Layered host configuration.
//!
//! Layers, later ones win:
//! 1. built-in defaults
//! 2. YAML file (if provided)
//! 3. environment variables `BUNDLE_HOST__<SECTION>__<KEY>`
//! 4. CLI overrides
//!
//! ```yaml
//! logging:
//!   level: info
//!   format: pretty
//! bundles:
//!   greeter-client:
//!     config:
//!       name: John
//!   hello-world:
//!     enabled: false
//! ```

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Prefix of environment overrides; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "BUNDLE_HOST__";

#[derive(Debug, thiserror::Error)]
pub enum AppConfigError {
    #[error("config file does not exist: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("failed to load configuration: {0}")]
    Load(#[source] Box<figment::Error>),

    #[error("failed to render configuration: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Pretty,
        }
    }
}

/// Full host configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    /// Raw per-bundle sections: `{ enabled: bool, config: { ... } }`.
    pub bundles: BTreeMap<String, serde_json::Value>,
}

/// CLI arguments that flow into the merge logic.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub print_config: bool,
    /// `-v` count: 1 info, 2 debug, 3+ trace.
    pub verbose: u8,
}

impl AppConfig {
    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Defaults, then the YAML file, then environment overrides.
    ///
    /// # Errors
    /// `MissingFile` if `path` does not exist, `Load` if a layer is malformed.
    pub fn load_layered(path: &Path) -> Result<Self, AppConfigError> {
        if !path.is_file() {
            return Err(AppConfigError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        Self::figment(Some(path))
            .extract()
            .map_err(|e| AppConfigError::Load(Box::new(e)))
    }

    /// Like [`AppConfig::load_layered`], but without a file only defaults and environment apply.
    ///
    /// # Errors
    /// See [`AppConfig::load_layered`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, AppConfigError> {
        match path {
            Some(path) => Self::load_layered(path),
            None => Self::figment(None)
                .extract()
                .map_err(|e| AppConfigError::Load(Box::new(e))),
        }
    }

    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        let level = match args.verbose {
            0 => return,
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        level.clone_into(&mut self.logging.level);
    }

    /// Effective configuration as YAML.
    ///
    /// # Errors
    /// Returns `AppConfigError::Render` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, AppConfigError> {
        serde_saphyr::to_string(self).map_err(|e| AppConfigError::Render(e.to_string()))
    }

    /// Symbolic names of bundles with a config section.
    pub fn configured_bundles(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }
}

/// Serves `bundles.<name>` sections to the framework.
#[derive(Debug, Clone)]
pub struct AppConfigProvider {
    config: AppConfig,
}

impl AppConfigProvider {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl bundlekit::ConfigProvider for AppConfigProvider {
    fn get_bundle_config(&self, bundle: &str) -> Option<&serde_json::Value> {
        self.config.bundles.get(bundle)
    }
}
