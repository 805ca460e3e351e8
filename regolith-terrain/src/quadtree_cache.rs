use std::sync::Arc;

use bevy::utils::HashMap;
use parking_lot::Mutex;

use crate::{quad_key::QuadKey, quadtree::QuadTree};

struct CacheState {
    entries: HashMap<QuadKey, Arc<QuadTree>>,
    capacity: usize,
    clock: u64,
    evictions: usize,
}

impl CacheState {
    fn touch(&mut self, node: &QuadTree) {
        self.clock += 1;
        node.set_timestamp(self.clock);
    }

    /// Removes the least recently used node that is not in use, taking
    /// disabled nodes before enabled ones.
    fn evict_one(&mut self) -> Option<Arc<QuadTree>> {
        let key = self
            .entries
            .values()
            .filter(|node| !node.is_in_use())
            .min_by_key(|node| (node.is_enabled(), node.timestamp()))
            .map(|node| node.key().clone())?;
        self.evictions += 1;
        self.entries.remove(&key)
    }
}

/// Every node of a landscape by key, bounded to the number of tiles that fit
/// in the memory budget.
pub struct QuadTreeCache {
    state: Mutex<CacheState>,
    gc_interval: usize,
}

impl QuadTreeCache {
    pub fn new(max_memory: usize, bytes_per_tile: usize, gc_interval: usize) -> Self {
        let capacity = (max_memory / bytes_per_tile.max(1)).max(1);
        bevy::log::debug!(
            "Tile cache holds {} tiles of {} bytes",
            capacity,
            bytes_per_tile
        );
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::default(),
                capacity,
                clock: 0,
                evictions: 0,
            }),
            gc_interval: gc_interval.max(1),
        }
    }

    /// Looks up a node and marks it recently used.
    pub fn get(&self, key: &QuadKey) -> Option<Arc<QuadTree>> {
        let mut state = self.state.lock();
        let node = state.entries.get(key).cloned()?;
        state.touch(&node);
        Some(node)
    }

    /// Looks up a node without changing its recency.
    pub fn peek(&self, key: &QuadKey) -> Option<Arc<QuadTree>> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &QuadKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Returns the cached node, or inserts the one made by `create`. The
    /// boolean is true when the node was inserted by this call.
    pub fn get_or_insert_with(&self, key: &QuadKey, create: impl FnOnce() -> QuadTree) -> (Arc<QuadTree>, bool) {
        let (node, evicted) = {
            let mut state = self.state.lock();
            if let Some(node) = state.entries.get(key).cloned() {
                state.touch(&node);
                return (node, false);
            }
            let evicted = self.make_room(&mut state);
            let node = Arc::new(create());
            state.touch(&node);
            state.entries.insert(key.clone(), node.clone());
            (node, evicted)
        };
        if let Some(evicted) = evicted {
            evicted.dispose();
        }
        (node, true)
    }

    fn make_room(&self, state: &mut CacheState) -> Option<Arc<QuadTree>> {
        if state.entries.len() < state.capacity {
            return None;
        }
        let evicted = state.evict_one()?;
        if state.evictions % self.gc_interval == 0 {
            state.entries.shrink_to_fit();
            bevy::log::info!(
                "Compacted tile cache after {} evictions, {} tiles cached",
                state.evictions,
                state.entries.len()
            );
        }
        Some(evicted)
    }

    pub fn remove(&self, key: &QuadKey) -> Option<Arc<QuadTree>> {
        self.state.lock().entries.remove(key)
    }

    /// Disposes every node.
    pub fn clear(&self) {
        let nodes: Vec<_> = self.state.lock().entries.drain().map(|(_, node)| node).collect();
        for node in nodes {
            node.dispose();
        }
    }

    /// Disposes the node at `prefix` and everything below it. Returns how
    /// many nodes were removed.
    pub fn clear_prefix(&self, prefix: &QuadKey) -> usize {
        let removed: Vec<_> = {
            let mut state = self.state.lock();
            let keys: Vec<_> = state
                .entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();
            keys.iter().filter_map(|key| state.entries.remove(key)).collect()
        };
        for node in &removed {
            node.dispose();
        }
        removed.len()
    }

    pub fn update_surface_color(&self, color: [f32; 4]) {
        let nodes: Vec<_> = self.state.lock().entries.values().cloned().collect();
        for node in nodes {
            node.update_surface_color(color);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn eviction_count(&self) -> usize {
        self.state.lock().evictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::{DVec2, DVec3};
    use rand::{Rng, SeedableRng};

    fn key(s: &str) -> QuadKey {
        QuadKey::parse(s).unwrap()
    }

    fn create(key: &QuadKey) -> impl FnOnce() -> QuadTree + '_ {
        move || QuadTree::new(key.clone(), DVec3::ZERO, DVec2::ONE, 2, 2, 0.0)
    }

    fn insert(cache: &QuadTreeCache, s: &str) -> Arc<QuadTree> {
        let key = key(s);
        let (node, inserted) = cache.get_or_insert_with(&key, create(&key));
        assert!(inserted);
        node
    }

    #[test]
    fn capacity_from_budget() {
        assert_eq!(QuadTreeCache::new(1000, 300, 100).capacity(), 3);
        assert_eq!(QuadTreeCache::new(10, 300, 100).capacity(), 1);
        assert_eq!(QuadTreeCache::new(10, 0, 100).capacity(), 10);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = QuadTreeCache::new(3, 1, 100);
        let first = insert(&cache, "1");
        insert(&cache, "2");
        insert(&cache, "3");
        insert(&cache, "4");
        assert_eq!(cache.eviction_count(), 1);
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&key("1")));
        assert!(!first.is_pending());
    }

    #[test]
    fn lookups_refresh_recency() {
        let cache = QuadTreeCache::new(3, 1, 100);
        insert(&cache, "1");
        insert(&cache, "2");
        insert(&cache, "3");
        assert!(cache.get(&key("1")).is_some());
        // peek leaves "2" the oldest
        assert!(cache.peek(&key("2")).is_some());
        insert(&cache, "4");
        assert!(cache.contains(&key("1")));
        assert!(!cache.contains(&key("2")));
    }

    #[test]
    fn in_use_and_enabled_nodes_are_kept() {
        let cache = QuadTreeCache::new(3, 1, 100);
        insert(&cache, "1").set_in_use(true);
        insert(&cache, "2").set_enabled(true);
        insert(&cache, "3");
        insert(&cache, "4");
        // "3" is younger than "2" but disabled
        assert!(cache.contains(&key("2")));
        assert!(!cache.contains(&key("3")));
        assert!(cache.contains(&key("1")));
    }

    #[test]
    fn grows_past_capacity_when_everything_is_in_use() {
        let cache = QuadTreeCache::new(2, 1, 100);
        insert(&cache, "1").set_in_use(true);
        insert(&cache, "2").set_in_use(true);
        insert(&cache, "3");
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.eviction_count(), 0);
    }

    #[test]
    fn existing_keys_are_not_rebuilt() {
        let cache = QuadTreeCache::new(3, 1, 100);
        let node = insert(&cache, "1");
        let k = key("1");
        let (again, inserted) = cache.get_or_insert_with(&k, create(&k));
        assert!(!inserted);
        assert!(Arc::ptr_eq(&node, &again));
    }

    #[test]
    fn clear_prefix_drops_subtree() {
        let cache = QuadTreeCache::new(100, 1, 100);
        for s in ["", "1", "1/2", "1/2/3", "2", "2/1"] {
            insert(&cache, s);
        }
        assert_eq!(cache.clear_prefix(&key("1")), 3);
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&key("2/1")));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn occupancy_stays_within_budget() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let cache = QuadTreeCache::new(8, 1, 5);
        let mut in_use = 0;
        for i in 0..400 {
            let k = key(
                &(0..rng.gen_range(1..5))
                    .map(|_| char::from(b'1' + rng.gen_range(0..4u8)).to_string())
                    .collect::<Vec<_>>()
                    .join("/"),
            );
            let (node, inserted) = cache.get_or_insert_with(&k, create(&k));
            if inserted && i % 25 == 0 {
                node.set_in_use(true);
                in_use += 1;
            }
            let live_in_use = in_use.min(cache.len());
            assert!(cache.len() <= cache.capacity().max(live_in_use + 1));
        }
        assert!(cache.eviction_count() > 0);
    }
}
