use serde::Deserialize;

/// Configuration for the greeter client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GreeterClientConfig {
    /// Name passed to `say_hi_to`.
    pub name: String,
    /// Subscription filter; defaults to the `Greeter` object class.
    pub filter: Option<String>,
}

impl Default for GreeterClientConfig {
    fn default() -> Self {
        Self {
            name: "John".to_owned(),
            filter: None,
        }
    }
}
