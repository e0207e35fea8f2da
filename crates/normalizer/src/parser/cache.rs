use std::sync::Arc;

use dashmap::DashMap;

use crate::pattern::PatternGroup;

/// Per-source candidate order cache.
///
/// On first sight of a source the global group list is partitioned into
/// groups whose source rule matches, followed by the rest, both in declared
/// order. The cached order is then only changed by [`promote`](Self::promote)
/// and discarded by [`clear`](Self::clear).
#[derive(Debug, Default)]
pub struct SourceCache {
    /// source name → ordered candidate groups
    sources: DashMap<String, Vec<Arc<PatternGroup>>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
        }
    }

    /// Ordered candidates for `source`, computing and caching them on a miss.
    /// An empty source name is never cached and gets the global order.
    pub fn candidates_for(&self, source: &str, groups: &[Arc<PatternGroup>]) -> Vec<Arc<PatternGroup>> {
        if source.is_empty() {
            return groups.to_vec();
        }
        if let Some(cached) = self.sources.get(source) {
            return cached.value().clone();
        }

        let (mut ordered, rest): (Vec<_>, Vec<_>) = groups
            .iter()
            .cloned()
            .partition(|g| g.matches_source(source));
        ordered.extend(rest);

        self.sources
            .entry(source.to_string())
            .or_insert(ordered)
            .value()
            .clone()
    }

    /// Swap the group at `position` with the head of the source's order.
    /// Returns true when the order changed.
    pub fn promote(&self, source: &str, position: usize) -> bool {
        if position == 0 {
            return false;
        }
        match self.sources.get_mut(source) {
            Some(mut order) if position < order.len() => {
                order.swap(0, position);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    pub fn clear(&self) {
        self.sources.clear();
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
