use greeter_sdk::{GREETING_PREFIX, Greeter};

/// The greeting logic published by the provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreeterService;

impl GreeterService {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Greeter for GreeterService {
    fn say_hi_to(&self, name: &str) -> String {
        format!("{GREETING_PREFIX}{name}")
    }
}
