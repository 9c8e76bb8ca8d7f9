/// Prefix every greeting starts with.
pub const GREETING_PREFIX: &str = "Hello ";

/// Produces a greeting for a name.
pub trait Greeter: Send + Sync {
    /// Returns `"Hello "` followed by `name`, unchanged.
    fn say_hi_to(&self, name: &str) -> String;
}
