#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Layering of defaults, YAML and environment for `AppConfig`.

use bundlekit::ConfigProvider;
use bundlekit_bootstrap::{AppConfig, AppConfigError, AppConfigProvider, LogFormat};
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;

fn yaml_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const SAMPLE: &str = r"
logging:
  level: debug
  format: json
bundles:
  greeter-client:
    config:
      name: Jane
  hello-world:
    enabled: false
";

#[test]
fn no_file_yields_defaults() {
    temp_env::with_vars_unset(["BUNDLE_HOST__LOGGING__LEVEL"], || {
        let cfg = AppConfig::load_or_default(None).unwrap();
        assert_eq!(cfg, AppConfig::default());
    });
}

#[test]
fn yaml_file_overrides_defaults() {
    let file = yaml_file(SAMPLE);
    temp_env::with_vars_unset(["BUNDLE_HOST__LOGGING__LEVEL"], || {
        let cfg = AppConfig::load_layered(file.path()).unwrap();
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(
            cfg.bundles["greeter-client"],
            json!({ "config": { "name": "Jane" } })
        );

        let provider = AppConfigProvider::new(cfg);
        assert!(!provider.bundle_enabled("hello-world"));
        assert!(provider.bundle_enabled("greeter-provider"));
    });
}

#[test]
fn environment_overrides_yaml() {
    let file = yaml_file(SAMPLE);
    temp_env::with_vars(
        [
            ("BUNDLE_HOST__LOGGING__LEVEL", Some("trace")),
            ("BUNDLE_HOST__BUNDLES__GREETER__CONFIG__NAME", Some("Ann")),
        ],
        || {
            let cfg = AppConfig::load_layered(file.path()).unwrap();
            assert_eq!(cfg.logging.level, "trace");
            assert_eq!(cfg.logging.format, LogFormat::Json);
            assert_eq!(cfg.bundles["greeter"], json!({ "config": { "name": "Ann" } }));
            // Untouched sections survive.
            assert!(cfg.bundles.contains_key("greeter-client"));
        },
    );
}

#[test]
fn missing_file_is_an_error() {
    let err = AppConfig::load_layered(std::path::Path::new("/definitely/not/here.yaml"))
        .unwrap_err();
    assert!(matches!(err, AppConfigError::MissingFile { .. }));
}

#[test]
fn unknown_fields_are_rejected() {
    let file = yaml_file("logging:\n  level: info\n  colour: true\n");
    temp_env::with_vars_unset(["BUNDLE_HOST__LOGGING__LEVEL"], || {
        let err = AppConfig::load_layered(file.path()).unwrap_err();
        assert!(matches!(err, AppConfigError::Load(_)));
    });
}

#[test]
fn rendered_yaml_round_trips_through_the_loader() {
    let file = yaml_file(SAMPLE);
    temp_env::with_vars_unset(["BUNDLE_HOST__LOGGING__LEVEL"], || {
        let cfg = AppConfig::load_layered(file.path()).unwrap();
        let rendered = yaml_file(&cfg.to_yaml().unwrap());
        let reloaded = AppConfig::load_layered(rendered.path()).unwrap();
        assert_eq!(reloaded, cfg);
    });
}
