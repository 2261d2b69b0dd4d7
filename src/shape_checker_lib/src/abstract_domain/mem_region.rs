use super::SizedDomain;
use crate::intermediate_representation::ByteSize;
use crate::prelude::*;
use crate::utils::debug::ToJsonCompact;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A memory region stores the abstract values of the fields of one memory object,
/// indexed by their byte offset inside the object.
///
/// Each stored value knows its own size, so a stored value covers the byte range
/// `offset..offset + value.bytesize()`.
/// Stored values never overlap: inserting a value removes all values intersecting its byte range.
/// Byte ranges without a stored value are *gaps*.
/// What a gap means is decided by the owner of the region (see the fill state of heap objects).
///
/// In contrast to many other abstract domains, *Top* values are saved explicitly,
/// since a known field with unknown content is different from a gap.
///
/// To allow cheap cloning of a `MemRegion`, the actual data is wrapped inside an `Arc`.
#[derive(Serialize, Deserialize, Debug, Hash, Clone, PartialEq, Eq)]
pub struct MemRegion<T: SizedDomain + Clone + Eq + std::fmt::Debug> {
    inner: Arc<BTreeMap<i64, T>>,
}

impl<T> ToJsonCompact for MemRegion<T>
where
    T: ToJsonCompact + SizedDomain + Clone + Eq + std::fmt::Debug,
{
    fn to_json_compact(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.iter()
                .map(|(offset, val)| (offset.to_string(), val.to_json_compact()))
                .collect(),
        )
    }
}

impl<T: SizedDomain + Clone + Eq + std::fmt::Debug> Default for MemRegion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SizedDomain + Clone + Eq + std::fmt::Debug> MemRegion<T> {
    /// Create a new, empty memory region.
    pub fn new() -> MemRegion<T> {
        MemRegion {
            inner: Arc::new(BTreeMap::new()),
        }
    }

    /// Returns true if no value is stored in the region.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove all elements intersecting the byte range `position..position + size`.
    pub fn clear_interval(&mut self, position: i64, size: i64) {
        if size <= 0 {
            return;
        }
        let end = position.saturating_add(size);
        let intersecting: Vec<i64> = self
            .intersecting_positions(position, end)
            .into_iter()
            .collect();
        if intersecting.is_empty() {
            return;
        }
        let inner = Arc::make_mut(&mut self.inner);
        for pos in intersecting {
            inner.remove(&pos);
        }
    }

    /// Return the positions of all values intersecting the byte range `start..end`.
    fn intersecting_positions(&self, start: i64, end: i64) -> Vec<i64> {
        let mut positions = Vec::new();
        // The value directly before `start` may reach into the range.
        if let Some((prev_pos, prev_elem)) = self.inner.range(..start).next_back() {
            if prev_pos.saturating_add(prev_elem.bytesize().as_offset()) > start {
                positions.push(*prev_pos);
            }
        }
        if start < end {
            positions.extend(self.inner.range(start..end).map(|(pos, _)| *pos));
        }
        positions
    }

    /// Insert a value into the memory region at the given byte position.
    /// All values intersecting the byte range of the new value are removed.
    pub fn insert_at_byte_index(&mut self, value: T, position: i64) {
        let size_in_bytes = value.bytesize().as_offset();
        self.clear_interval(position, size_in_bytes.max(1));
        Arc::make_mut(&mut self.inner).insert(position, value);
    }

    /// Get the value at the given position.
    ///
    /// If a value of the given size is stored exactly at the position, return it.
    /// If the byte range only partially overlaps stored values, return `T::new_top(size)`.
    /// If the byte range lies completely inside a gap, return `None`.
    pub fn get(&self, position: i64, size: ByteSize) -> Option<T> {
        if let Some(elem) = self.inner.get(&position) {
            if elem.bytesize() == size {
                return Some(elem.clone());
            }
        }
        if self
            .intersecting_positions(position, position.saturating_add(size.as_offset()))
            .is_empty()
        {
            None
        } else {
            Some(T::new_top(size))
        }
    }

    /// Get the value at the given position regardless of the value size.
    pub fn get_unsized(&self, position: i64) -> Option<&T> {
        self.inner.get(&position)
    }

    /// Remove the value stored exactly at the given position and return it.
    pub fn remove(&mut self, position: i64) -> Option<T> {
        if self.inner.contains_key(&position) {
            Arc::make_mut(&mut self.inner).remove(&position)
        } else {
            None
        }
    }

    /// Emulate a write operation of a value to an unknown offset in the range between `start` and `end`.
    /// All values that the write may touch are removed,
    /// i.e. the whole byte range `start..end + elem_size` is cleared.
    pub fn mark_interval_values_as_top(&mut self, start: i64, end: i64, elem_size: ByteSize) {
        let size = end
            .saturating_sub(start)
            .saturating_add(elem_size.as_offset());
        self.clear_interval(start, size)
    }

    /// Remove all stored values.
    pub fn clear(&mut self) {
        if !self.inner.is_empty() {
            self.inner = Arc::new(BTreeMap::new());
        }
    }

    /// Get an iterator over all elements together with their offset into the memory region.
    pub fn iter(&self) -> std::collections::btree_map::Iter<i64, T> {
        self.inner.iter()
    }

    /// Get an iterator over all values in the memory region.
    pub fn values(&self) -> std::collections::btree_map::Values<i64, T> {
        self.inner.values()
    }

    /// Get an iterator over all values in the memory region for in-place manipulation.
    /// Note that one can changes values to *Top* using the iterator.
    /// These values are not removed from the memory region.
    pub fn values_mut(&mut self) -> std::collections::btree_map::ValuesMut<i64, T> {
        Arc::make_mut(&mut self.inner).values_mut()
    }

    /// Returns true if both regions store values at the same offsets with the same sizes.
    pub fn has_same_layout(&self, other: &Self) -> bool {
        self.inner.len() == other.inner.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((pos, val), (other_pos, other_val))| {
                    pos == other_pos && val.bytesize() == other_val.bytesize()
                })
    }
}

impl<T: SizedDomain + Clone + Eq + std::fmt::Debug> FromIterator<(i64, T)> for MemRegion<T> {
    /// Generate a new memory region from an iterator of offsets and values.
    /// Values overlapping previously inserted values replace them.
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (i64, T)>,
    {
        let mut region = MemRegion::new();
        for (pos, val) in iter {
            region.insert_at_byte_index(val, pos);
        }
        region
    }
}
