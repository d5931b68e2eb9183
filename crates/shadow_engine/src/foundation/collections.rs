//! Specialized collection types

pub use slotmap::{new_key_type, SlotMap};

/// Returned when a fixed-capacity pool has no free slot
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("pool exhausted (capacity {capacity})")]
pub struct PoolExhausted {
    /// Maximum number of live entries
    pub capacity: usize,
}

/// Free list for object pooling with a hard capacity
///
/// Freed slots are reused before the backing vector grows, so indices stay
/// dense and stable while an entry is alive.
#[derive(Debug, Clone)]
pub struct Pool<T> {
    items: Vec<Option<T>>,
    free_indices: Vec<usize>,
    capacity: usize,
}

impl<T> Pool<T> {
    /// Create a pool that holds at most `capacity` live entries
    pub const fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            free_indices: Vec::new(),
            capacity,
        }
    }

    /// Insert an item and return its index
    pub fn insert(&mut self, item: T) -> Result<usize, PoolExhausted> {
        if let Some(index) = self.free_indices.pop() {
            self.items[index] = Some(item);
            Ok(index)
        } else if self.items.len() < self.capacity {
            let index = self.items.len();
            self.items.push(Some(item));
            Ok(index)
        } else {
            Err(PoolExhausted { capacity: self.capacity })
        }
    }

    /// Remove an item by index
    pub fn remove(&mut self, index: usize) -> Option<T> {
        let item = self.items.get_mut(index)?.take()?;
        self.free_indices.push(index);
        Some(item)
    }

    /// Get an item by index
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)?.as_ref()
    }

    /// Get a mutable reference to an item by index
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)?.as_mut()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.items.len() - self.free_indices.len()
    }

    /// True when nothing is allocated
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when another insert would fail
    pub fn is_full(&self) -> bool {
        self.free_indices.is_empty() && self.items.len() >= self.capacity
    }

    /// One past the highest index ever handed out
    pub fn high_water_mark(&self) -> usize {
        self.items.len()
    }

    /// Iterate live entries with their indices
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.as_ref().map(|item| (i, item)))
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.items.clear();
        self.free_indices.clear();
    }
}
