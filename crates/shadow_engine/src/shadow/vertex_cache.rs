//! Tiered storage for clipped decal geometry
//!
//! Lists of up to 8 or 32 vertices live in fixed-size pooled arrays; anything
//! larger, or anything that does not fit because a pool is full, goes to a
//! heap tier. Persistent entries survive across frames for projectors that
//! cache their vertices; temporary entries are thrown away every render pass.

use slotmap::SlotMap;

use super::clip::ShadowVertex;
use super::ShadowHandle;
use crate::core::config::ShadowConfig;
use crate::foundation::collections::Pool;

/// Vertex count served by the small tier
pub const SMALL_TIER_VERTICES: usize = 8;

/// Vertex count served by the large tier
pub const LARGE_TIER_VERTICES: usize = 32;

slotmap::new_key_type! {
    /// Key of a persistent geometry entry
    pub struct VertexCacheKey;
}

/// Vertex storage exhaustion
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Every tier able to hold the list is full
    #[error("no vertex storage left for {count} vertices")]
    Exhausted {
        /// Requested vertex count
        count: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VertexStorage {
    Small(usize),
    Large(usize),
    Heap(usize),
}

/// Which tier a list ended up in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    /// Up to [`SMALL_TIER_VERTICES`]
    Small,
    /// Up to [`LARGE_TIER_VERTICES`]
    Large,
    /// Heap allocated
    Heap,
}

/// Clipped geometry for one decal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedGeometry {
    /// Projector the geometry was clipped for
    pub shadow: ShadowHandle,
    count: usize,
    storage: VertexStorage,
}

impl CachedGeometry {
    /// Number of vertices, always 3 or more
    pub const fn vertex_count(&self) -> usize {
        self.count
    }

    /// Tier holding the vertices
    pub const fn tier(&self) -> StorageTier {
        match self.storage {
            VertexStorage::Small(_) => StorageTier::Small,
            VertexStorage::Large(_) => StorageTier::Large,
            VertexStorage::Heap(_) => StorageTier::Heap,
        }
    }
}

/// Live allocations per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierUsage {
    /// Small tier lists in use
    pub small: usize,
    /// Large tier lists in use
    pub large: usize,
    /// Heap tier lists in use
    pub heap: usize,
}

impl TierUsage {
    /// Total lists in use
    pub const fn total(&self) -> usize {
        self.small + self.large + self.heap
    }
}

/// Persistent and per-frame geometry storage
#[derive(Debug, Clone)]
pub struct VertexCache {
    small: Pool<[ShadowVertex; SMALL_TIER_VERTICES]>,
    large: Pool<[ShadowVertex; LARGE_TIER_VERTICES]>,
    heap: Pool<Vec<ShadowVertex>>,
    persistent: SlotMap<VertexCacheKey, CachedGeometry>,
    temp: Vec<CachedGeometry>,
}

impl VertexCache {
    /// Create empty tiers sized by the configuration
    pub fn new(config: &ShadowConfig) -> Self {
        Self {
            small: Pool::with_capacity_limit(config.small_tier_capacity),
            large: Pool::with_capacity_limit(config.large_tier_capacity),
            heap: Pool::with_capacity_limit(config.heap_tier_capacity),
            persistent: SlotMap::with_key(),
            temp: Vec::new(),
        }
    }

    fn allocate(&mut self, vertices: &[ShadowVertex]) -> Result<VertexStorage, CacheError> {
        let count = vertices.len();
        if count <= SMALL_TIER_VERTICES {
            let mut block = [ShadowVertex::default(); SMALL_TIER_VERTICES];
            block[..count].copy_from_slice(vertices);
            if let Ok(index) = self.small.insert(block) {
                return Ok(VertexStorage::Small(index));
            }
        }
        if count <= LARGE_TIER_VERTICES {
            let mut block = [ShadowVertex::default(); LARGE_TIER_VERTICES];
            block[..count].copy_from_slice(vertices);
            if let Ok(index) = self.large.insert(block) {
                return Ok(VertexStorage::Large(index));
            }
        }
        self.heap
            .insert(vertices.to_vec())
            .map(VertexStorage::Heap)
            .map_err(|_| CacheError::Exhausted { count })
    }

    fn release(&mut self, storage: VertexStorage) {
        match storage {
            VertexStorage::Small(index) => {
                self.small.remove(index);
            }
            VertexStorage::Large(index) => {
                self.large.remove(index);
            }
            VertexStorage::Heap(index) => {
                self.heap.remove(index);
            }
        }
    }

    fn make_entry(&mut self, shadow: ShadowHandle, vertices: &[ShadowVertex]) -> Result<CachedGeometry, CacheError> {
        let storage = self.allocate(vertices)?;
        Ok(CachedGeometry { shadow, count: vertices.len(), storage })
    }

    /// Store geometry that lives until explicitly removed
    pub fn insert_persistent(
        &mut self,
        shadow: ShadowHandle,
        vertices: &[ShadowVertex],
    ) -> Result<VertexCacheKey, CacheError> {
        let entry = self.make_entry(shadow, vertices)?;
        Ok(self.persistent.insert(entry))
    }

    /// Look up a persistent entry
    pub fn persistent(&self, key: VertexCacheKey) -> Option<&CachedGeometry> {
        self.persistent.get(key)
    }

    /// Free a persistent entry and its storage
    pub fn remove_persistent(&mut self, key: VertexCacheKey) {
        if let Some(entry) = self.persistent.remove(key) {
            self.release(entry.storage);
        }
    }

    /// Store geometry for the current render pass, returning its index
    pub fn push_temp(&mut self, shadow: ShadowHandle, vertices: &[ShadowVertex]) -> Result<usize, CacheError> {
        let entry = self.make_entry(shadow, vertices)?;
        self.temp.push(entry);
        Ok(self.temp.len() - 1)
    }

    /// Look up a temporary entry
    pub fn temp(&self, index: usize) -> Option<&CachedGeometry> {
        self.temp.get(index)
    }

    /// Drop every temporary entry
    pub fn clear_temp(&mut self) {
        let mut entries = std::mem::take(&mut self.temp);
        for entry in entries.drain(..) {
            self.release(entry.storage);
        }
        self.temp = entries;
    }

    /// Vertices of an entry
    pub fn vertices(&self, entry: &CachedGeometry) -> &[ShadowVertex] {
        let stored: Option<&[ShadowVertex]> = match entry.storage {
            VertexStorage::Small(index) => self.small.get(index).map(|b| &b[..]),
            VertexStorage::Large(index) => self.large.get(index).map(|b| &b[..]),
            VertexStorage::Heap(index) => self.heap.get(index).map(Vec::as_slice),
        };
        stored.map_or(&[], |s| &s[..entry.count.min(s.len())])
    }

    /// Live lists per tier, persistent and temporary together
    pub fn usage(&self) -> TierUsage {
        TierUsage {
            small: self.small.len(),
            large: self.large.len(),
            heap: self.heap.len(),
        }
    }

    /// Number of persistent entries
    pub fn persistent_count(&self) -> usize {
        self.persistent.len()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.small.clear();
        self.large.clear();
        self.heap.clear();
        self.persistent.clear();
        self.temp.clear();
    }
}
