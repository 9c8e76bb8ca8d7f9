use serde::Deserialize;
use std::collections::BTreeMap;

/// Configuration for the greeter provider.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GreeterProviderConfig {
    /// Published as `service.ranking`; consumers prefer the highest.
    pub ranking: i64,
    /// Extra registration properties.
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl GreeterProviderConfig {
    /// Registration properties, with the ranking applied.
    #[must_use]
    pub fn registration_properties(&self) -> bundlekit::Properties {
        let mut props = self.properties.clone();
        props.insert(bundlekit::SERVICE_RANKING.to_owned(), self.ranking.into());
        props
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_publish_rank_zero_without_extras() {
        let props = GreeterProviderConfig::default().registration_properties();
        assert_eq!(props.len(), 1);
        assert_eq!(props[bundlekit::SERVICE_RANKING], json!(0));
    }

    #[test]
    fn parses_ranking_and_properties() {
        let cfg: GreeterProviderConfig = serde_json::from_value(json!({
            "ranking": 5,
            "properties": { "language": "en" }
        }))
        .unwrap();
        let props = cfg.registration_properties();
        assert_eq!(props["language"], json!("en"));
        assert_eq!(props[bundlekit::SERVICE_RANKING], json!(5));
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: Result<GreeterProviderConfig, _> =
            serde_json::from_value(json!({ "rank": 5 }));
        assert!(result.is_err());
    }
}
