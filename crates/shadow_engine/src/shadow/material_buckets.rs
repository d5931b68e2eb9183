//! Per-material element buckets
//!
//! Flashlights collect the surfaces they light into one bucket per world
//! material sort id so that each material is bound once per flashlight.

/// Elements grouped by sort id, remembering which ids were touched
#[derive(Debug, Clone)]
pub struct MaterialBuckets<T> {
    buckets: Vec<Vec<T>>,
    used: Vec<usize>,
}

impl<T> Default for MaterialBuckets<T> {
    fn default() -> Self {
        Self { buckets: Vec::new(), used: Vec::new() }
    }
}

impl<T> MaterialBuckets<T> {
    /// Resize to `count` sort ids, dropping current contents
    pub fn set_bucket_count(&mut self, count: usize) {
        self.buckets.clear();
        self.buckets.resize_with(count, Vec::new);
        self.used.clear();
    }

    /// Number of sort ids
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Add an element; grows when `sort_id` is beyond the current count
    pub fn add(&mut self, sort_id: usize, element: T) {
        if sort_id >= self.buckets.len() {
            self.buckets.resize_with(sort_id + 1, Vec::new);
        }
        let bucket = &mut self.buckets[sort_id];
        if bucket.is_empty() {
            self.used.push(sort_id);
        }
        bucket.push(element);
    }

    /// Sort ids with at least one element, in first-use order
    pub fn used_sort_ids(&self) -> &[usize] {
        &self.used
    }

    /// Elements of one sort id
    pub fn elements(&self, sort_id: usize) -> &[T] {
        self.buckets.get(sort_id).map_or(&[], Vec::as_slice)
    }

    /// True when no bucket holds anything
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Empty the used buckets, keeping their allocations
    pub fn flush(&mut self) {
        for sort_id in self.used.drain(..) {
            if let Some(bucket) = self.buckets.get_mut(sort_id) {
                bucket.clear();
            }
        }
    }
}
