//! Batch-scoped node result cache.

use ahash::AHashMap;
use linkvec_core::{NodeResultKey, NodeValue};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mirrors node results read from or written to storage during one batch,
/// so repeated loads (the same affecting product across many events, say)
/// hit storage once. Absent results are cached too.
#[derive(Debug, Default)]
pub struct EvaluationCache {
    results: RwLock<AHashMap<NodeResultKey, Option<NodeValue>>>,
    hits: AtomicUsize,
}

impl EvaluationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(None)` means storage is known to hold nothing for `key`.
    pub fn get(&self, key: &NodeResultKey) -> Option<Option<NodeValue>> {
        let cached = self.results.read().get(key).cloned();
        if cached.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        cached
    }

    pub fn insert(&self, key: NodeResultKey, value: Option<NodeValue>) {
        self.results.write().insert(key, value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }

    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkvec_core::{EntityId, Vector};

    #[test]
    fn test_cache_remembers_absence() {
        let cache = EvaluationCache::new();
        let key = NodeResultKey::new(EntityId::new("p1", "product"), "n");
        assert_eq!(cache.get(&key), None);
        cache.insert(key.clone(), None);
        assert_eq!(cache.get(&key), Some(None));
        cache.insert(key.clone(), Some(NodeValue::Vector(Vector::new(vec![1.0]))));
        assert!(matches!(cache.get(&key), Some(Some(NodeValue::Vector(_)))));
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.len(), 1);
    }
}
