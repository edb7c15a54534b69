//! Per-layer reference-counted imagery cache.
//!
//! # Single-driver invariant
//!
//! The cache is owned by exactly one [`ImageryLayer`](crate::layer::ImageryLayer)
//! and mutated only by the thread that drives frames. It takes `&mut self`
//! for every mutation and holds no locks; hosts that share a layer between
//! threads must serialise access themselves.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace, warn};

use super::{Imagery, ImageryHandle, ImageryKey, LayerId};
use crate::tiling::TilingScheme;

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Live imagery, including the skeleton placeholder.
    pub live: usize,
}

impl CacheStats {
    /// Fraction of lookups served from the cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} live, {} hits, {} misses ({:.1}% hit rate), {} evicted",
            self.live,
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.evictions
        )
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    imagery: Option<Imagery>,
}

/// Maps `(x, y, level)` to the one shared [`Imagery`] of a layer.
#[derive(Debug)]
pub struct ImageryCache {
    layer: LayerId,
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<ImageryKey, ImageryHandle>,
    evicted: Vec<(ImageryHandle, Imagery)>,
    stats: CacheStats,
}

impl ImageryCache {
    pub fn new(layer: LayerId) -> Self {
        Self {
            layer,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            evicted: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    /// Return the imagery for a tile, creating it (and its ancestors down to
    /// `minimum_level`) on a miss. Adds one reference for the caller.
    pub fn get_or_create(
        &mut self,
        x: u32,
        y: u32,
        level: u32,
        scheme: &dyn TilingScheme,
        minimum_level: u32,
    ) -> ImageryHandle {
        let key = ImageryKey::new(x, y, level);
        if let Some(&handle) = self.index.get(&key) {
            self.stats.hits += 1;
            self.add_reference(handle);
            return handle;
        }
        self.stats.misses += 1;

        let parent = key
            .parent()
            .filter(|parent| parent.level >= minimum_level)
            .map(|parent| {
                self.get_or_create(parent.x, parent.y, parent.level, scheme, minimum_level)
            });

        let rectangle = scheme.tile_xy_to_rectangle(x, y, level);
        let handle = self.allocate(Imagery::new(key, self.layer, rectangle, parent));
        self.index.insert(key, handle);
        self.add_reference(handle);

        trace!(layer = %self.layer, x, y, level, "Created imagery");
        handle
    }

    /// Create the layer's skeleton placeholder. It is not keyed and starts
    /// with one reference held by the layer itself.
    pub fn insert_placeholder(&mut self) -> ImageryHandle {
        let handle = self.allocate(Imagery::placeholder(self.layer));
        self.add_reference(handle);
        handle
    }

    /// Handle of a cached tile without adding a reference.
    pub fn lookup(&self, x: u32, y: u32, level: u32) -> Option<ImageryHandle> {
        self.index.get(&ImageryKey::new(x, y, level)).copied()
    }

    /// Add a reference. Returns the new count, or 0 for a stale handle.
    pub fn add_reference(&mut self, handle: ImageryHandle) -> u32 {
        match self.get_mut(handle) {
            Some(imagery) => imagery.increment(),
            None => {
                warn!(layer = %self.layer, "add_reference on evicted imagery");
                0
            }
        }
    }

    /// Release a reference and return the remaining count.
    ///
    /// At zero the imagery is removed from the cache immediately, its slot
    /// is invalidated, and the reference it held on its parent is released
    /// in turn. Evicted imagery is queued for [`take_evicted`](Self::take_evicted)
    /// so the owner can free its GPU resources.
    pub fn release_reference(&mut self, handle: ImageryHandle) -> u32 {
        let Some(imagery) = self.get_mut(handle) else {
            warn!(layer = %self.layer, "release_reference on evicted imagery");
            return 0;
        };

        let remaining = imagery.decrement();
        if remaining > 0 {
            return remaining;
        }

        let Some(imagery) = self.free_slot(handle) else {
            return 0;
        };
        let key = imagery.key();
        if self.index.get(&key) == Some(&handle) {
            self.index.remove(&key);
        }
        self.stats.evictions += 1;
        debug!(
            layer = %self.layer,
            x = key.x,
            y = key.y,
            level = key.level,
            state = %imagery.state(),
            "Evicted imagery"
        );

        let parent = imagery.parent();
        self.evicted.push((handle, imagery));
        if let Some(parent) = parent {
            self.release_reference(parent);
        }
        0
    }

    pub fn get(&self, handle: ImageryHandle) -> Option<&Imagery> {
        if handle.layer() != self.layer {
            return None;
        }
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.imagery.as_ref())
    }

    pub fn get_mut(&mut self, handle: ImageryHandle) -> Option<&mut Imagery> {
        if handle.layer() != self.layer {
            return None;
        }
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.imagery.as_mut())
    }

    pub fn contains(&self, handle: ImageryHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of keyed imagery tiles.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            live: self.slots.len() - self.free.len(),
            ..self.stats
        }
    }

    /// Drain imagery evicted since the last call.
    pub fn take_evicted(&mut self) -> Vec<(ImageryHandle, Imagery)> {
        std::mem::take(&mut self.evicted)
    }

    /// Remove every imagery, live or already evicted, regardless of its
    /// reference count. Outstanding handles become stale.
    pub fn drain(&mut self) -> Vec<(ImageryHandle, Imagery)> {
        let mut drained = std::mem::take(&mut self.evicted);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(imagery) = slot.imagery.take() {
                drained.push((
                    ImageryHandle::new(self.layer, index as u32, slot.generation),
                    imagery,
                ));
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.index.clear();
        drained
    }

    fn allocate(&mut self, imagery: Imagery) -> ImageryHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.imagery = Some(imagery);
            return ImageryHandle::new(self.layer, index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            imagery: Some(imagery),
        });
        ImageryHandle::new(self.layer, index, 0)
    }

    fn free_slot(&mut self, handle: ImageryHandle) -> Option<Imagery> {
        let slot = self.slots.get_mut(handle.index())?;
        let imagery = slot.imagery.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index() as u32);
        Some(imagery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::ImageryState;
    use crate::tiling::GeographicTilingScheme;

    fn cache() -> (ImageryCache, GeographicTilingScheme) {
        (ImageryCache::new(LayerId::next()), GeographicTilingScheme::new())
    }

    #[test]
    fn test_identity_while_referenced() {
        let (mut cache, scheme) = cache();

        let a = cache.get_or_create(5, 3, 4, &scheme, 0);
        let b = cache.get_or_create(5, 3, 4, &scheme, 0);
        let c = cache.get_or_create(5, 3, 4, &scheme, 0);

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(cache.get(a).unwrap().reference_count(), 3);
    }

    #[test]
    fn test_creates_parent_chain() {
        let (mut cache, scheme) = cache();

        let handle = cache.get_or_create(5, 3, 4, &scheme, 0);
        // levels 4, 3, 2, 1, 0
        assert_eq!(cache.len(), 5);

        let parent = cache.get(handle).unwrap().parent().unwrap();
        assert_eq!(cache.get(parent).unwrap().key(), ImageryKey::new(2, 1, 3));
        assert_eq!(cache.get(parent).unwrap().reference_count(), 1);
    }

    #[test]
    fn test_parent_chain_stops_at_minimum_level() {
        let (mut cache, scheme) = cache();

        let handle = cache.get_or_create(5, 3, 4, &scheme, 3);
        assert_eq!(cache.len(), 2);

        let parent = cache.get(handle).unwrap().parent().unwrap();
        assert!(cache.get(parent).unwrap().parent().is_none());
    }

    #[test]
    fn test_eviction_on_last_release() {
        let (mut cache, scheme) = cache();

        let first = cache.get_or_create(1, 0, 1, &scheme, 0);
        cache.get_or_create(1, 0, 1, &scheme, 0);

        assert_eq!(cache.release_reference(first), 1);
        assert!(cache.lookup(1, 0, 1).is_some());

        assert_eq!(cache.release_reference(first), 0);
        assert!(cache.lookup(1, 0, 1).is_none());
        assert!(cache.get(first).is_none());
        // The parent went with it.
        assert!(cache.is_empty());
        assert_eq!(cache.take_evicted().len(), 2);
    }

    #[test]
    fn test_recreated_after_eviction_is_new_instance() {
        let (mut cache, scheme) = cache();

        let first = cache.get_or_create(0, 0, 0, &scheme, 0);
        cache.release_reference(first);

        let second = cache.get_or_create(0, 0, 0, &scheme, 0);
        assert_ne!(first, second);
        assert!(cache.get(first).is_none());
        assert_eq!(cache.get(second).unwrap().reference_count(), 1);
    }

    #[test]
    fn test_stale_handle_release_is_harmless() {
        let (mut cache, scheme) = cache();

        let handle = cache.get_or_create(0, 0, 0, &scheme, 0);
        cache.release_reference(handle);
        assert_eq!(cache.release_reference(handle), 0);
        assert_eq!(cache.add_reference(handle), 0);
    }

    #[test]
    fn test_handle_from_other_layer_is_rejected() {
        let (mut a, scheme) = cache();
        let (b, _) = cache();

        let handle = a.get_or_create(0, 0, 0, &scheme, 0);
        assert!(b.get(handle).is_none());
    }

    #[test]
    fn test_placeholder_is_not_keyed() {
        let (mut cache, _) = cache();

        let placeholder = cache.insert_placeholder();
        assert_eq!(cache.get(placeholder).unwrap().state(), ImageryState::Placeholder);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().live, 1);
    }

    #[test]
    fn test_stats() {
        let (mut cache, scheme) = cache();

        let handle = cache.get_or_create(0, 0, 1, &scheme, 0);
        cache.get_or_create(0, 0, 1, &scheme, 0);
        cache.release_reference(handle);
        cache.release_reference(handle);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.live, 0);
    }
}
