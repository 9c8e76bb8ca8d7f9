//! Typed per-bundle configuration access.
//!
//! The host hands the framework a [`ConfigProvider`] exposing one raw JSON section per bundle,
//! shaped as `bundles.<symbolic-name> = { enabled: bool, config: { ... } }`.
//!
//! 1. **Lenient loading** (default): falls back to `T::default()` when configuration is missing.
//!    - Used by `bundle_config_or_default` and `BundleCtx::config`
//! 2. **Strict loading**: requires configuration to be present and valid.
//!    - Used by `bundle_config_required`

use serde::de::DeserializeOwned;

/// Configuration error for typed config operations
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("bundle '{bundle}' not found")]
    BundleNotFound { bundle: String },
    #[error("bundle '{bundle}' config must be an object")]
    InvalidBundleStructure { bundle: String },
    #[error("missing 'config' section in bundle '{bundle}'")]
    MissingConfigSection { bundle: String },
    #[error("invalid config for bundle '{bundle}': {source}")]
    InvalidConfig {
        bundle: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Provider of bundle-specific configuration (raw JSON sections only).
pub trait ConfigProvider: Send + Sync {
    /// Returns raw JSON section for the bundle, if any.
    fn get_bundle_config(&self, bundle: &str) -> Option<&serde_json::Value>;

    /// Whether the host should install the bundle. Defaults to `true` unless the section
    /// carries `enabled: false`.
    #[must_use]
    fn bundle_enabled(&self, bundle: &str) -> bool {
        self.get_bundle_config(bundle)
            .and_then(|raw| raw.get("enabled"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }
}

/// Provider with no sections at all; every bundle runs on defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyConfig;

impl ConfigProvider for EmptyConfig {
    fn get_bundle_config(&self, _bundle: &str) -> Option<&serde_json::Value> {
        None
    }
}

/// Lenient configuration loader that falls back to defaults.
///
/// - If the bundle is not present in config → returns `Ok(T::default())`
/// - If the bundle value is not an object → returns `Ok(T::default())`
/// - If the bundle has no "config" field → returns `Ok(T::default())`
/// - If "config" is present but invalid → returns `Err(ConfigError::InvalidConfig)`
///
/// # Errors
/// Returns `ConfigError::InvalidConfig` if the config section exists but cannot be deserialized.
pub fn bundle_config_or_default<T: DeserializeOwned + Default>(
    provider: &dyn ConfigProvider,
    bundle: &str,
) -> Result<T, ConfigError> {
    let Some(config_section) = provider
        .get_bundle_config(bundle)
        .and_then(serde_json::Value::as_object)
        .and_then(|obj| obj.get("config"))
    else {
        return Ok(T::default());
    };

    serde_json::from_value(config_section.clone()).map_err(|e| ConfigError::InvalidConfig {
        bundle: bundle.to_owned(),
        source: e,
    })
}

/// Strict configuration loader that requires configuration to be present.
///
/// # Errors
/// Returns `ConfigError` if the bundle is not found, has invalid structure, or config is invalid.
pub fn bundle_config_required<T: DeserializeOwned>(
    provider: &dyn ConfigProvider,
    bundle: &str,
) -> Result<T, ConfigError> {
    let bundle_raw =
        provider
            .get_bundle_config(bundle)
            .ok_or_else(|| ConfigError::BundleNotFound {
                bundle: bundle.to_owned(),
            })?;

    let obj = bundle_raw
        .as_object()
        .ok_or_else(|| ConfigError::InvalidBundleStructure {
            bundle: bundle.to_owned(),
        })?;

    let config_section = obj
        .get("config")
        .ok_or_else(|| ConfigError::MissingConfigSection {
            bundle: bundle.to_owned(),
        })?;

    serde_json::from_value(config_section.clone()).map_err(|e| ConfigError::InvalidConfig {
        bundle: bundle.to_owned(),
        source: e,
    })
}
