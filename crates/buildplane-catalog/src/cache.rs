//! Per-product build-id cache.
//!
//! Maps `(center, product)` to the set of build ids seen by the last full
//! listing. Entries are only ever replaced as a whole or cleared together;
//! readers get an `Arc` snapshot and never observe a half-updated set.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

type ProductKey = (String, String);

#[derive(Debug, Default)]
pub struct BuildIdCache {
    entries: RwLock<HashMap<ProductKey, Arc<BTreeSet<String>>>>,
}

impl BuildIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the known ids for a product, if it has been listed.
    pub fn get(&self, center: &str, product: &str) -> Option<Arc<BTreeSet<String>>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&(center.to_string(), product.to_string()))
            .cloned()
    }

    /// Replace the whole id set for a product.
    pub fn replace(&self, center: &str, product: &str, ids: BTreeSet<String>) {
        let count = ids.len();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert((center.to_string(), product.to_string()), Arc::new(ids));
        debug!(%center, %product, count, "build id cache replaced");
    }

    /// Drop every cached id set.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        debug!("build id cache cleared");
    }
}
