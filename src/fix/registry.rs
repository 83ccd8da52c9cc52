//! Runtime selection of a fixer by ecosystem tag.
//!
//! Ecosystem backends are independent types behind one [`Fixer`] trait, not
//! a class hierarchy; the registry is the only place that knows which tag
//! maps to which implementation.

use crate::fix::traits::Fixer;
use std::collections::HashMap;
use std::path::Path;

type FixerFactory = Box<dyn Fn(&Path) -> Box<dyn Fixer> + Send + Sync>;

/// Ecosystem tag (e.g. "npm", "maven", "rpm") → fixer constructor taking the
/// dependency-store root to operate on.
#[derive(Default)]
pub struct FixerRegistry {
    factories: HashMap<String, FixerFactory>,
}

impl FixerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for an ecosystem tag.
    pub fn register<F>(&mut self, package_manager: &str, factory: F)
    where
        F: Fn(&Path) -> Box<dyn Fixer> + Send + Sync + 'static,
    {
        self.factories
            .insert(package_manager.to_string(), Box::new(factory));
    }

    /// Whether a fixer is available for the given ecosystem.
    pub fn supports(&self, package_manager: &str) -> bool {
        self.factories.contains_key(package_manager)
    }

    /// Instantiates a fixer for one dependency-store target, or `None` when
    /// the ecosystem has no registered backend.
    pub fn create(&self, package_manager: &str, store_root: &Path) -> Option<Box<dyn Fixer>> {
        self.factories
            .get(package_manager)
            .map(|factory| factory(store_root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::store::{PathStoreFixer, RawFileInstaller};

    #[test]
    fn test_registry_dispatches_by_tag() {
        let mut registry = FixerRegistry::new();
        registry.register("maven", |root| {
            Box::new(PathStoreFixer::new(root, Box::new(RawFileInstaller)))
        });

        assert!(registry.supports("maven"));
        assert!(!registry.supports("npm"));
        assert!(registry.create("maven", Path::new("/tmp/repo")).is_some());
        assert!(registry.create("npm", Path::new("/tmp/repo")).is_none());
    }
}
