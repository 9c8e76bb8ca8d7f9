//! Link-time bundle discovery.
//!
//! Bundle crates submit a [`BundleRegistrator`] with [`register_bundle!`](crate::register_bundle);
//! the host links them (a `use my_bundle as _;` is enough) and discovers them at startup.

use std::sync::Arc;

use crate::contracts::Bundle;

/// Factory entry submitted by a bundle crate.
pub struct BundleRegistrator {
    pub name: &'static str,
    pub factory: fn() -> Arc<dyn Bundle>,
}

impl BundleRegistrator {
    #[must_use]
    pub const fn new(name: &'static str, factory: fn() -> Arc<dyn Bundle>) -> Self {
        Self { name, factory }
    }
}

inventory::collect!(BundleRegistrator);

/// Factory for any `Default` bundle.
#[must_use]
pub fn factory<B: Bundle + Default>() -> Arc<dyn Bundle> {
    Arc::new(B::default())
}

/// Submit a bundle type to the catalog under its symbolic name.
///
/// ```ignore
/// bundlekit::register_bundle!("hello-world", HelloWorld);
/// ```
#[macro_export]
macro_rules! register_bundle {
    ($name:expr, $ty:ty) => {
        $crate::inventory::submit! {
            $crate::catalog::BundleRegistrator::new($name, $crate::catalog::factory::<$ty>)
        }
    };
}

/// Every bundle linked into the binary, sorted by name.
#[derive(Clone)]
pub struct BundleCatalog {
    entries: Vec<&'static BundleRegistrator>,
}

impl BundleCatalog {
    #[must_use]
    pub fn discover() -> Self {
        let mut entries: Vec<_> = inventory::iter::<BundleRegistrator>().collect();
        entries.sort_by_key(|e| e.name);
        Self { entries }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.name)
    }

    /// Fresh instances of every catalogued bundle.
    #[must_use]
    pub fn instantiate(&self) -> Vec<Arc<dyn Bundle>> {
        self.entries.iter().map(|e| (e.factory)()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for BundleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
