//! Filter registry.
//!
//! An explicit mapping from filter class names to constructor functions,
//! owned by whoever builds it and handed to the graph builder. Entries
//! cache the signature of a default-constructed instance so class
//! information is available without instantiating filters.

use crate::core::filter::{Filter, FilterSignature};
use indexmap::IndexMap;
use std::sync::Arc;

/// Factory function producing filter instances.
pub type FilterFactory = Arc<dyn Fn() -> Box<dyn Filter> + Send + Sync>;

/// Registry entry containing the factory and cached signature.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Factory function to create instances.
    pub factory: FilterFactory,
    /// Signature of a default-constructed instance. Port lists that
    /// depend on parameters are resolved per node at initialization.
    pub signature: FilterSignature,
}

/// Registry of available filter classes.
pub struct FilterRegistry {
    entries: IndexMap<String, RegistryEntry>,
}

impl FilterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Create a registry pre-populated with the base filters.
    pub fn with_base_filters() -> Self {
        let mut registry = Self::new();
        crate::filters::register_base(&mut registry);
        registry
    }

    /// Register a filter class. The class name comes from the signature of
    /// a default-constructed instance.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        let signature = factory().signature();
        let class = signature.class().to_string();
        self.entries.insert(
            class,
            RegistryEntry {
                factory: Arc::new(factory),
                signature,
            },
        );
    }

    /// Create a new instance of a filter class.
    pub fn create(&self, class: &str) -> Option<Box<dyn Filter>> {
        self.entries.get(class).map(|entry| (entry.factory)())
    }

    /// Get the cached signature of a filter class.
    pub fn signature(&self, class: &str) -> Option<&FilterSignature> {
        self.entries.get(class).map(|entry| &entry.signature)
    }

    /// Check if a filter class is registered.
    pub fn contains(&self, class: &str) -> bool {
        self.entries.contains_key(class)
    }

    /// All registered class names.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// All registered entries.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &RegistryEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Remove a filter class.
    pub fn unregister(&mut self, class: &str) -> bool {
        self.entries.shift_remove(class).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_base_filters()
    }
}
