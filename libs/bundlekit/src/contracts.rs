use async_trait::async_trait;
use std::fmt;

use crate::context::BundleCtx;

/// Framework-assigned bundle identifier. `0` is reserved for the framework itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleId(u64);

impl BundleId {
    /// The framework's own identity, used for host-side registry calls.
    pub const SYSTEM: BundleId = BundleId(0);

    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static description of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleManifest {
    /// Unique name; also the key of the bundle's config section.
    pub symbolic_name: &'static str,
    pub version: &'static str,
    /// Symbolic names that must be installed before this bundle resolves; they are started first.
    pub requires: &'static [&'static str],
}

impl BundleManifest {
    #[must_use]
    pub const fn new(symbolic_name: &'static str, version: &'static str) -> Self {
        Self {
            symbolic_name,
            version,
            requires: &[],
        }
    }

    #[must_use]
    pub const fn requires(mut self, requires: &'static [&'static str]) -> Self {
        self.requires = requires;
        self
    }
}

/// An independently activatable unit driven by the [`Framework`](crate::Framework).
///
/// `start` runs while the bundle is `Starting`; returning an error leaves it `Failed` after the
/// framework withdrew whatever it registered. `stop` runs while `Stopping`; whatever the bundle
/// still holds in the registry afterwards is released by the framework.
#[async_trait]
pub trait Bundle: Send + Sync + 'static {
    fn manifest(&self) -> BundleManifest;

    async fn start(&self, ctx: &BundleCtx) -> anyhow::Result<()>;

    async fn stop(&self, ctx: &BundleCtx) -> anyhow::Result<()>;
}
