//! The array-hash table backing the trie's leaves.
//!
//! This is an implementation of the cache-conscious string hash table from
//! Askitis & Zobel's "Cache-conscious collision resolution in string hash
//! tables" (2005). Instead of one heap allocation per key, every bucket is
//! a single packed byte buffer holding its entries back to back, so a
//! bucket probe is one linear scan over contiguous memory.
//!
//! ## Bucket layout
//!
//! A bucket buffer is a sequence of entries terminated by a sentinel:
//!
//! ```text
//! | len_1 | key_1 bytes | pad | index_1 | ... | len_n | key_n bytes | pad | index_n | SENTINEL |
//! ```
//!
//! - `len` is the key length, stored in the configured key-size width
//!   (1/2/4/8 bytes, little endian). The sentinel is a `len` field holding
//!   the width's maximum value, which is why the maximum key length is one
//!   short of it.
//! - `pad` is a single zero byte present only when null-terminator storage
//!   is enabled, so key bytes can be handed to C APIs in place. Keys still
//!   compare by explicit length; a key may itself contain zero bytes.
//! - `index` points into the table's value vector and is only present in
//!   map mode (index width zero means set mode). Storing indices instead of
//!   values keeps the buffers homogeneous and lets values stay put when
//!   buckets are compacted or rehashed.
//!
//! An empty bucket owns no buffer at all. Buffers are grown exactly to the
//! required size on every append; the workload here is many small buckets,
//! where amortized doubling would waste more than it saves.
//!
//! ## Table
//!
//! The table is a plain vector of buckets plus (in map mode) the value
//! vector. Collisions are resolved inside the bucket by the scan itself.
//! Erasing a map entry tombstones its value slot in place so no index
//! stored in any bucket goes stale; the vector is compacted once live
//! values drop below 60% of its length (and opportunistically at 90% after
//! a rehash), which rewrites the stored indices in iteration order.
//!
//! All integer fields are read and written through `copy_from_slice`, the
//! `memcpy` idiom, since the buffer carries no alignment guarantees.

use core::hash::BuildHasher;

use crate::config::GrowthPolicy;
use crate::config::SizeWidth;
use crate::error::Error;
use crate::hash::hash_key;
use crate::hash::KeyEqual;

/// Byte-level geometry of one bucket entry.
#[derive(Clone, Copy, Debug)]
pub(crate) struct EntryLayout {
    key_size_bytes: usize,
    terminator_bytes: usize,
    index_bytes: usize,
}

impl EntryLayout {
    pub(crate) fn new(
        key_size: SizeWidth,
        index_size: Option<SizeWidth>,
        store_null_terminator: bool,
    ) -> EntryLayout {
        EntryLayout {
            key_size_bytes: key_size.bytes(),
            terminator_bytes: usize::from(store_null_terminator),
            index_bytes: index_size.map_or(0, SizeWidth::bytes),
        }
    }

    /// Sentinel value marking the end of a bucket, the maximum of the
    /// key-size field.
    #[inline]
    fn sentinel(self) -> u64 {
        max_for_width(self.key_size_bytes)
    }

    /// Longest storable key: the sentinel value is reserved and the
    /// optional terminator byte is accounted against the field too.
    #[inline]
    pub(crate) fn max_key_size(self) -> usize {
        let max = self.sentinel() - self.terminator_bytes as u64 - 1;
        usize::try_from(max).unwrap_or(usize::MAX)
    }

    /// Largest value-vector index representable in bucket storage.
    #[inline]
    pub(crate) fn index_capacity(self) -> u64 {
        max_for_width(self.index_bytes)
    }

    #[inline]
    pub(crate) fn has_values(self) -> bool {
        self.index_bytes > 0
    }

    /// Bytes one entry with a key of `key_len` bytes occupies.
    #[inline]
    pub(crate) fn entry_size(self, key_len: usize) -> usize {
        self.key_size_bytes + key_len + self.terminator_bytes + self.index_bytes
    }
}

#[inline]
fn max_for_width(bytes: usize) -> u64 {
    if bytes >= 8 {
        u64::MAX
    } else {
        (1u64 << (bytes * 8)) - 1
    }
}

#[inline]
fn read_uint(buffer: &[u8], offset: usize, width: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(&buffer[offset..offset + width]);
    u64::from_le_bytes(raw)
}

#[inline]
fn write_uint(buffer: &mut [u8], offset: usize, width: usize, value: u64) {
    debug_assert!(width >= 8 || value < (1u64 << (width * 8)));
    buffer[offset..offset + width].copy_from_slice(&value.to_le_bytes()[..width]);
}

#[inline]
fn push_uint(buffer: &mut Vec<u8>, width: usize, value: u64) {
    debug_assert!(width >= 8 || value < (1u64 << (width * 8)));
    buffer.extend_from_slice(&value.to_le_bytes()[..width]);
}

/// One packed bucket. Empty buckets own no allocation.
#[derive(Clone, Default)]
pub(crate) struct ArrayBucket {
    buffer: Vec<u8>,
}

impl ArrayBucket {
    /// Offset of the first entry, or `None` when the bucket holds no
    /// entries (unallocated, or reserved with only the sentinel).
    #[inline]
    pub(crate) fn first_entry_offset(&self, layout: EntryLayout) -> Option<usize> {
        if self.buffer.is_empty() || self.is_sentinel(layout, 0) {
            None
        } else {
            Some(0)
        }
    }

    /// Offset of the entry after the one at `offset`, or `None` at the
    /// end of the bucket.
    #[inline]
    pub(crate) fn next_entry_offset(&self, layout: EntryLayout, offset: usize) -> Option<usize> {
        let next = offset + self.entry_size_at(layout, offset);
        if self.is_sentinel(layout, next) {
            None
        } else {
            Some(next)
        }
    }

    #[inline]
    fn is_sentinel(&self, layout: EntryLayout, offset: usize) -> bool {
        self.read_key_len(layout, offset) == layout.sentinel()
    }

    #[inline]
    fn read_key_len(&self, layout: EntryLayout, offset: usize) -> u64 {
        read_uint(&self.buffer, offset, layout.key_size_bytes)
    }

    #[inline]
    fn entry_size_at(&self, layout: EntryLayout, offset: usize) -> usize {
        layout.entry_size(self.read_key_len(layout, offset) as usize)
    }

    /// Key bytes of the entry at `offset`.
    #[inline]
    pub(crate) fn key_at(&self, layout: EntryLayout, offset: usize) -> &[u8] {
        let len = self.read_key_len(layout, offset) as usize;
        let start = offset + layout.key_size_bytes;
        &self.buffer[start..start + len]
    }

    /// Value-vector index of the entry at `offset`. Map mode only.
    #[inline]
    pub(crate) fn value_index_at(&self, layout: EntryLayout, offset: usize) -> usize {
        debug_assert!(layout.has_values());
        let len = self.read_key_len(layout, offset) as usize;
        let index_offset = offset + layout.key_size_bytes + len + layout.terminator_bytes;
        read_uint(&self.buffer, index_offset, layout.index_bytes) as usize
    }

    #[inline]
    pub(crate) fn set_value_index_at(&mut self, layout: EntryLayout, offset: usize, index: u64) {
        debug_assert!(layout.has_values());
        let len = self.read_key_len(layout, offset) as usize;
        let index_offset = offset + layout.key_size_bytes + len + layout.terminator_bytes;
        write_uint(&mut self.buffer, index_offset, layout.index_bytes, index);
    }

    /// Scans the bucket for `key`. Returns the offset of the matching
    /// entry.
    pub(crate) fn find<E: KeyEqual>(
        &self,
        layout: EntryLayout,
        key_eq: &E,
        key: &[u8],
    ) -> Option<usize> {
        let mut offset = self.first_entry_offset(layout)?;
        loop {
            if key_eq.eq(self.key_at(layout, offset), key) {
                return Some(offset);
            }
            offset = self.next_entry_offset(layout, offset)?;
        }
    }

    /// Appends an entry before the sentinel, allocating or growing the
    /// buffer exactly. The caller has already checked for duplicates and
    /// key length. Returns the offset of the new entry.
    pub(crate) fn append(
        &mut self,
        layout: EntryLayout,
        key: &[u8],
        value_index: u64,
    ) -> usize {
        debug_assert!(key.len() <= layout.max_key_size());

        let entry_size = layout.entry_size(key.len());
        let offset = if self.buffer.is_empty() {
            self.buffer.reserve_exact(entry_size + layout.key_size_bytes);
            0
        } else {
            debug_assert!(self.buffer.len() >= layout.key_size_bytes);
            let sentinel_offset = self.buffer.len() - layout.key_size_bytes;
            self.buffer.reserve_exact(entry_size);
            self.buffer.truncate(sentinel_offset);
            sentinel_offset
        };

        push_uint(&mut self.buffer, layout.key_size_bytes, key.len() as u64);
        self.buffer.extend_from_slice(key);
        for _ in 0..layout.terminator_bytes {
            self.buffer.push(0);
        }
        if layout.has_values() {
            push_uint(&mut self.buffer, layout.index_bytes, value_index);
        }
        push_uint(&mut self.buffer, layout.key_size_bytes, layout.sentinel());

        offset
    }

    /// One-shot sizing used during rehash and deserialization: allocates
    /// `bytes` of entry space (plus the sentinel) up front so the appends
    /// that follow never reallocate. Only valid on an empty bucket.
    pub(crate) fn reserve(&mut self, layout: EntryLayout, bytes: usize) {
        debug_assert!(self.buffer.is_empty());
        self.buffer.reserve_exact(bytes + layout.key_size_bytes);
        push_uint(&mut self.buffer, layout.key_size_bytes, layout.sentinel());
    }

    /// Removes the entry at `offset`, compacting the tail left over it.
    /// Frees the buffer when the last entry goes.
    pub(crate) fn erase_at(&mut self, layout: EntryLayout, offset: usize) {
        debug_assert!(!self.is_sentinel(layout, offset));

        let entry_size = self.entry_size_at(layout, offset);
        self.buffer.drain(offset..offset + entry_size);

        if self.buffer.len() == layout.key_size_bytes {
            // Only the sentinel is left; an empty bucket owns no buffer.
            self.buffer = Vec::new();
        }
    }
}

/// Position of one entry inside an [`ArrayHash`].
///
/// Invalidated by every mutation of the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ArrayCursor {
    pub(crate) bucket: usize,
    pub(crate) offset: usize,
}

/// Open table of packed buckets with a tombstoned value vector.
///
/// In set mode (`index_bytes == 0` in the layout) the value vector stays
/// empty and entries carry no index field; `V` is then `()` by convention
/// of the caller.
#[derive(Clone)]
pub(crate) struct ArrayHash<V> {
    buckets: Vec<ArrayBucket>,
    values: Vec<Option<V>>,
    nb_elements: usize,
    layout: EntryLayout,
    growth_policy: GrowthPolicy,
    max_load_factor: f32,
}

/// Live values must make up at least this fraction of the value vector,
/// otherwise an erase triggers compaction.
const COMPACT_THRESHOLD: f32 = 0.6;

/// Laxer compaction threshold applied opportunistically after a rehash.
const COMPACT_THRESHOLD_REHASH: f32 = 0.9;

/// Compaction is skipped entirely below this element count.
const MIN_ELEMENTS_FOR_COMPACTION: usize = 16;

/// Value-vector reservations grow by this factor.
const VALUES_GROWTH_RATE: f32 = 1.5;

impl<V> ArrayHash<V> {
    pub(crate) fn with_bucket_count(
        min_bucket_count: usize,
        layout: EntryLayout,
        growth_policy: GrowthPolicy,
        max_load_factor: f32,
    ) -> ArrayHash<V> {
        let bucket_count = growth_policy.initial_bucket_count(min_bucket_count);
        let mut buckets = Vec::new();
        buckets.resize_with(bucket_count, ArrayBucket::default);

        ArrayHash {
            buckets,
            values: Vec::new(),
            nb_elements: 0,
            layout,
            growth_policy,
            max_load_factor,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nb_elements
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.nb_elements == 0
    }

    #[inline]
    pub(crate) fn layout(&self) -> EntryLayout {
        self.layout
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn load_factor(&self) -> f32 {
        self.nb_elements as f32 / self.buckets.len() as f32
    }

    #[inline]
    fn bucket_for_hash(&self, hash: u64) -> usize {
        self.growth_policy.bucket_for_hash(hash, self.buckets.len())
    }

    pub(crate) fn find<S: BuildHasher, E: KeyEqual>(
        &self,
        hasher: &S,
        key_eq: &E,
        key: &[u8],
    ) -> Option<ArrayCursor> {
        let bucket = self.bucket_for_hash(hash_key(hasher, key));
        let offset = self.buckets[bucket].find(self.layout, key_eq, key)?;
        Some(ArrayCursor { bucket, offset })
    }

    /// Inserts `key` unless present. Returns the entry cursor and whether
    /// an insertion happened. `value` must be `Some` exactly in map mode.
    pub(crate) fn insert<S: BuildHasher, E: KeyEqual>(
        &mut self,
        hasher: &S,
        key_eq: &E,
        key: &[u8],
        value: Option<V>,
    ) -> Result<(ArrayCursor, bool), Error> {
        debug_assert_eq!(value.is_some(), self.layout.has_values());

        if key.len() > self.layout.max_key_size() {
            return Err(Error::KeyTooLong {
                len: key.len(),
                max_len: self.layout.max_key_size(),
            });
        }

        if self.load_factor() > self.max_load_factor {
            self.rehash_to(self.growth_policy.next_bucket_count(self.buckets.len()), hasher);
        }

        let bucket = self.bucket_for_hash(hash_key(hasher, key));
        if let Some(offset) = self.buckets[bucket].find(self.layout, key_eq, key) {
            return Ok((ArrayCursor { bucket, offset }, false));
        }

        let value_index = if let Some(value) = value {
            // Tombstones count against the index width: stale indices in
            // the buckets must never be reused before compaction.
            if self.values.len() as u64 > self.layout.index_capacity() - 1 {
                return Err(Error::CapacityExceeded);
            }
            if self.values.len() == self.values.capacity() {
                let target = ((self.values.len() as f32 * VALUES_GROWTH_RATE) as usize).max(4);
                let additional = target.saturating_sub(self.values.len()).max(1);
                self.values.reserve_exact(additional);
            }
            self.values.push(Some(value));
            (self.values.len() - 1) as u64
        } else {
            if self.nb_elements == usize::MAX {
                return Err(Error::CapacityExceeded);
            }
            0
        };

        let offset = self.buckets[bucket].append(self.layout, key, value_index);
        self.nb_elements += 1;

        Ok((ArrayCursor { bucket, offset }, true))
    }

    /// Erases `key` if present. The outer `Option` reports whether an
    /// entry was erased; the inner one carries the stored value (always
    /// `None` in set mode).
    pub(crate) fn erase_key<S: BuildHasher, E: KeyEqual>(
        &mut self,
        hasher: &S,
        key_eq: &E,
        key: &[u8],
    ) -> Option<Option<V>> {
        if self.should_compact(COMPACT_THRESHOLD) {
            self.compact_values();
        }

        let cursor = self.find(hasher, key_eq, key)?;
        Some(self.erase_at(cursor))
    }

    /// Erases the entry at `cursor`, tombstoning its value in place.
    pub(crate) fn erase_at(&mut self, cursor: ArrayCursor) -> Option<V> {
        let value = if self.layout.has_values() {
            let index = self.buckets[cursor.bucket].value_index_at(self.layout, cursor.offset);
            self.values[index].take()
        } else {
            None
        };

        self.buckets[cursor.bucket].erase_at(self.layout, cursor.offset);
        self.nb_elements -= 1;

        value
    }

    /// Erases every entry whose key starts with `prefix`. Returns the
    /// number of erased entries.
    pub(crate) fn erase_prefix(&mut self, prefix: &[u8]) -> usize {
        let mut erased = 0;

        for bucket in &mut self.buckets {
            let mut offset = bucket.first_entry_offset(self.layout);
            while let Some(current) = offset {
                if bucket.key_at(self.layout, current).starts_with(prefix) {
                    if self.layout.has_values() {
                        let index = bucket.value_index_at(self.layout, current);
                        self.values[index] = None;
                    }
                    bucket.erase_at(self.layout, current);
                    erased += 1;
                    // The tail moved left; the same offset now addresses
                    // the next entry, the sentinel, or a freed buffer.
                    offset = if bucket.buffer.is_empty() || bucket.is_sentinel(self.layout, current)
                    {
                        None
                    } else {
                        Some(current)
                    };
                } else {
                    offset = bucket.next_entry_offset(self.layout, current);
                }
            }
        }

        self.nb_elements -= erased;
        if self.should_compact(COMPACT_THRESHOLD) {
            self.compact_values();
        }

        erased
    }

    #[inline]
    pub(crate) fn key_at(&self, cursor: ArrayCursor) -> &[u8] {
        self.buckets[cursor.bucket].key_at(self.layout, cursor.offset)
    }

    #[inline]
    pub(crate) fn value_at(&self, cursor: ArrayCursor) -> &V {
        let index = self.buckets[cursor.bucket].value_index_at(self.layout, cursor.offset);
        self.values[index]
            .as_ref()
            .expect("bucket entry points at a tombstoned value")
    }

    #[inline]
    pub(crate) fn value_at_mut(&mut self, cursor: ArrayCursor) -> &mut V {
        let index = self.buckets[cursor.bucket].value_index_at(self.layout, cursor.offset);
        self.values[index]
            .as_mut()
            .expect("bucket entry points at a tombstoned value")
    }

    /// Cursor to the first entry in bucket order.
    pub(crate) fn first_cursor(&self) -> Option<ArrayCursor> {
        self.cursor_from_bucket(0)
    }

    /// Cursor to the entry after `cursor`.
    pub(crate) fn next_cursor(&self, cursor: ArrayCursor) -> Option<ArrayCursor> {
        if let Some(offset) =
            self.buckets[cursor.bucket].next_entry_offset(self.layout, cursor.offset)
        {
            return Some(ArrayCursor {
                bucket: cursor.bucket,
                offset,
            });
        }
        self.cursor_from_bucket(cursor.bucket + 1)
    }

    fn cursor_from_bucket(&self, start: usize) -> Option<ArrayCursor> {
        for bucket in start..self.buckets.len() {
            if let Some(offset) = self.buckets[bucket].first_entry_offset(self.layout) {
                return Some(ArrayCursor { bucket, offset });
            }
        }
        None
    }

    #[inline]
    fn should_compact(&self, threshold: f32) -> bool {
        self.layout.has_values()
            && self.nb_elements >= MIN_ELEMENTS_FOR_COMPACTION
            && self.nb_elements < self.values.len()
            && (self.nb_elements as f32 / self.values.len() as f32) < threshold
    }

    /// Drops tombstones from the value vector and renumbers every bucket
    /// entry in iteration order.
    fn compact_values(&mut self) {
        debug_assert!(self.layout.has_values());

        let mut new_values = Vec::with_capacity(self.nb_elements);
        let layout = self.layout;
        for bucket in &mut self.buckets {
            let mut offset = bucket.first_entry_offset(layout);
            while let Some(current) = offset {
                let old_index = bucket.value_index_at(layout, current);
                bucket.set_value_index_at(layout, current, new_values.len() as u64);
                new_values.push(self.values[old_index].take());
                offset = bucket.next_entry_offset(layout, current);
            }
        }

        debug_assert_eq!(new_values.len(), self.nb_elements);
        self.values = new_values;
    }

    /// Compacts the value vector and shrinks the bucket array to the
    /// smallest count the load factor allows.
    pub(crate) fn shrink_to_fit<S: BuildHasher>(&mut self, hasher: &S) {
        if self.layout.has_values() && self.nb_elements != self.values.len() {
            self.compact_values();
        }
        self.values.shrink_to_fit();

        let min_count = (self.nb_elements as f32 / self.max_load_factor).ceil() as usize;
        self.rehash_to(min_count, hasher);
    }

    /// Rebuilds the bucket array with at least `min_bucket_count` buckets,
    /// reserving each new bucket exactly before moving entries over.
    fn rehash_to<S: BuildHasher>(&mut self, min_bucket_count: usize, hasher: &S) {
        let bucket_count = self.growth_policy.initial_bucket_count(min_bucket_count);
        if bucket_count == self.buckets.len() {
            return;
        }

        let layout = self.layout;
        let mut required = vec![0usize; bucket_count];
        self.for_each_entry(|key, _| {
            let target = self.growth_policy.bucket_for_hash(hash_key(hasher, key), bucket_count);
            required[target] += layout.entry_size(key.len());
        });

        let mut new_buckets = Vec::new();
        new_buckets.resize_with(bucket_count, ArrayBucket::default);
        for (bucket, &bytes) in new_buckets.iter_mut().zip(required.iter()) {
            if bytes > 0 {
                bucket.reserve(layout, bytes);
            }
        }

        self.for_each_entry(|key, value_index| {
            let target = self.growth_policy.bucket_for_hash(hash_key(hasher, key), bucket_count);
            new_buckets[target].append(layout, key, value_index as u64);
        });

        self.buckets = new_buckets;

        if self.should_compact(COMPACT_THRESHOLD_REHASH) {
            self.compact_values();
        }
    }

    /// Calls `visit` with the key bytes and value index of every entry in
    /// iteration order.
    fn for_each_entry(&self, mut visit: impl FnMut(&[u8], usize)) {
        for bucket in &self.buckets {
            let mut offset = bucket.first_entry_offset(self.layout);
            while let Some(current) = offset {
                let value_index = if self.layout.has_values() {
                    bucket.value_index_at(self.layout, current)
                } else {
                    0
                };
                visit(bucket.key_at(self.layout, current), value_index);
                offset = bucket.next_entry_offset(self.layout, current);
            }
        }
    }

    /// Split borrow for burst: buckets stay readable while values are
    /// taken out one by one.
    pub(crate) fn parts_mut(&mut self) -> (&[ArrayBucket], &mut Vec<Option<V>>, EntryLayout) {
        (&self.buckets, &mut self.values, self.layout)
    }

    pub(crate) fn buckets(&self) -> &[ArrayBucket] {
        &self.buckets
    }

    /// Reserves entry space in bucket `bucket` ahead of
    /// [`append_reserved`](Self::append_reserved) calls. Deserialization
    /// only.
    pub(crate) fn reserve_bucket(&mut self, bucket: usize, bytes: usize) {
        self.buckets[bucket].reserve(self.layout, bytes);
    }

    /// Appends an entry into a reserved bucket with no duplicate or load
    /// checks. Deserialization only.
    pub(crate) fn append_reserved(&mut self, bucket: usize, key: &[u8], value: Option<V>) {
        debug_assert_eq!(value.is_some(), self.layout.has_values());

        let value_index = if let Some(value) = value {
            self.values.push(Some(value));
            (self.values.len() - 1) as u64
        } else {
            0
        };
        self.buckets[bucket].append(self.layout, key, value_index);
        self.nb_elements += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::BytesEqual;
    use crate::hash::Fnv1aBuildHasher;

    const HASHER: Fnv1aBuildHasher = Fnv1aBuildHasher;
    const EQ: BytesEqual = BytesEqual;

    fn map_layout() -> EntryLayout {
        EntryLayout::new(SizeWidth::U16, Some(SizeWidth::U16), false)
    }

    fn set_layout() -> EntryLayout {
        EntryLayout::new(SizeWidth::U16, None, false)
    }

    fn new_map(buckets: usize) -> ArrayHash<i64> {
        ArrayHash::with_bucket_count(buckets, map_layout(), GrowthPolicy::default(), 8.0)
    }

    fn key(i: usize) -> Vec<u8> {
        format!("Key {}", i).into_bytes()
    }

    #[test]
    fn test_bucket_append_find_erase() {
        let layout = map_layout();
        let mut bucket = ArrayBucket::default();

        assert!(bucket.first_entry_offset(layout).is_none());
        assert!(bucket.find(layout, &EQ, b"alpha").is_none());

        let off_a = bucket.append(layout, b"alpha", 0);
        let off_b = bucket.append(layout, b"beta", 1);
        let off_c = bucket.append(layout, b"", 2);

        assert_eq!(bucket.find(layout, &EQ, b"alpha"), Some(off_a));
        assert_eq!(bucket.find(layout, &EQ, b"beta"), Some(off_b));
        assert_eq!(bucket.find(layout, &EQ, b""), Some(off_c));
        assert!(bucket.find(layout, &EQ, b"gamma").is_none());

        assert_eq!(bucket.key_at(layout, off_b), b"beta");
        assert_eq!(bucket.value_index_at(layout, off_b), 1);

        bucket.erase_at(layout, off_b);
        assert!(bucket.find(layout, &EQ, b"beta").is_none());
        let off_empty = bucket.find(layout, &EQ, b"").unwrap();
        assert_eq!(bucket.key_at(layout, off_empty), b"");
        assert_eq!(bucket.value_index_at(layout, off_empty), 2);

        bucket.erase_at(layout, bucket.find(layout, &EQ, b"alpha").unwrap());
        bucket.erase_at(layout, bucket.find(layout, &EQ, b"").unwrap());
        assert!(bucket.first_entry_offset(layout).is_none());
        assert_eq!(bucket.buffer.capacity(), 0);
    }

    #[test]
    fn test_bucket_entry_order_is_append_order() {
        let layout = set_layout();
        let mut bucket = ArrayBucket::default();
        bucket.append(layout, b"one", 0);
        bucket.append(layout, b"two", 0);
        bucket.append(layout, b"three", 0);

        let mut keys = Vec::new();
        let mut offset = bucket.first_entry_offset(layout);
        while let Some(current) = offset {
            keys.push(bucket.key_at(layout, current).to_vec());
            offset = bucket.next_entry_offset(layout, current);
        }
        assert_eq!(keys, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn test_insert_find_1000() {
        let mut table = new_map(16);

        for i in 0..1000 {
            let (_, inserted) = table.insert(&HASHER, &EQ, &key(i), Some(i as i64)).unwrap();
            assert!(inserted);
        }
        assert_eq!(table.len(), 1000);

        for i in 0..1000 {
            let (cursor, inserted) = table.insert(&HASHER, &EQ, &key(i), Some(-1)).unwrap();
            assert!(!inserted);
            assert_eq!(*table.value_at(cursor), i as i64);
        }
        assert_eq!(table.len(), 1000);

        for i in 0..1000 {
            let cursor = table.find(&HASHER, &EQ, &key(i)).unwrap();
            assert_eq!(table.key_at(cursor), key(i).as_slice());
            assert_eq!(*table.value_at(cursor), i as i64);
        }
        assert!(table.find(&HASHER, &EQ, b"Key 1000").is_none());
    }

    #[test]
    fn test_erase_all_one_by_one() {
        let mut table = new_map(16);
        for i in 0..1000 {
            table.insert(&HASHER, &EQ, &key(i), Some(i as i64)).unwrap();
        }

        for i in 0..1000 {
            assert_eq!(table.erase_key(&HASHER, &EQ, &key(i)), Some(Some(i as i64)));
            assert!(table.find(&HASHER, &EQ, &key(i)).is_none());
        }
        assert!(table.is_empty());
        assert_eq!(table.erase_key(&HASHER, &EQ, b"Key 3"), None);
    }

    #[test]
    fn test_insert_erase_insert() {
        let mut table = new_map(16);

        for i in 0..200 {
            table.insert(&HASHER, &EQ, &key(i), Some(i as i64)).unwrap();
        }
        for i in (0..200).step_by(2) {
            assert!(table.erase_key(&HASHER, &EQ, &key(i)).is_some());
        }
        assert_eq!(table.len(), 100);

        for i in (0..200).step_by(2) {
            let (_, inserted) = table.insert(&HASHER, &EQ, &key(i), Some(1000 + i as i64)).unwrap();
            assert!(inserted);
        }
        assert_eq!(table.len(), 200);

        for i in 0..200 {
            let cursor = table.find(&HASHER, &EQ, &key(i)).unwrap();
            let expected = if i % 2 == 0 { 1000 + i as i64 } else { i as i64 };
            assert_eq!(*table.value_at(cursor), expected);
        }
    }

    #[test]
    fn test_key_too_long() {
        let layout = EntryLayout::new(SizeWidth::U8, Some(SizeWidth::U16), false);
        let mut table: ArrayHash<i64> =
            ArrayHash::with_bucket_count(16, layout, GrowthPolicy::default(), 8.0);

        let max = table.layout().max_key_size();
        assert_eq!(max, 254);

        let ok = vec![b'a'; max];
        assert!(table.insert(&HASHER, &EQ, &ok, Some(1)).unwrap().1);

        let too_long = vec![b'a'; max + 1];
        assert!(matches!(
            table.insert(&HASHER, &EQ, &too_long, Some(2)),
            Err(Error::KeyTooLong { .. })
        ));
    }

    #[test]
    fn test_null_terminator_layout() {
        let layout = EntryLayout::new(SizeWidth::U8, None, true);
        assert_eq!(layout.max_key_size(), 253);

        let mut bucket = ArrayBucket::default();
        let offset = bucket.append(layout, b"abc", 0);
        assert_eq!(bucket.key_at(layout, offset), b"abc");
        // The byte after the key is the reserved terminator.
        assert_eq!(bucket.buffer[offset + 1 + 3], 0);
    }

    #[test]
    fn test_index_width_caps_capacity() {
        let layout = EntryLayout::new(SizeWidth::U16, Some(SizeWidth::U8), false);
        let mut table: ArrayHash<i64> =
            ArrayHash::with_bucket_count(16, layout, GrowthPolicy::default(), 8.0);

        for i in 0..255 {
            assert!(table.insert(&HASHER, &EQ, &key(i), Some(i as i64)).unwrap().1);
        }
        assert!(matches!(
            table.insert(&HASHER, &EQ, &key(255), Some(255)),
            Err(Error::CapacityExceeded)
        ));
    }

    #[test]
    fn test_erased_values_hold_capacity_until_compaction() {
        let layout = EntryLayout::new(SizeWidth::U16, Some(SizeWidth::U8), false);
        let mut table: ArrayHash<i64> =
            ArrayHash::with_bucket_count(16, layout, GrowthPolicy::default(), 8.0);

        for i in 0..255 {
            table.insert(&HASHER, &EQ, &key(i), Some(i as i64)).unwrap();
        }
        // Erase a handful; live/stored stays above the 0.6 threshold so
        // the tombstones keep occupying index space.
        for i in 0..10 {
            table.erase_key(&HASHER, &EQ, &key(i));
        }
        assert!(matches!(
            table.insert(&HASHER, &EQ, &key(300), Some(300)),
            Err(Error::CapacityExceeded)
        ));

        // Erasing most of the table triggers compaction and frees index
        // space again.
        for i in 10..240 {
            table.erase_key(&HASHER, &EQ, &key(i));
        }
        assert!(table.insert(&HASHER, &EQ, &key(300), Some(300)).unwrap().1);
    }

    #[test]
    fn test_iteration_visits_every_entry_once() {
        let mut table = new_map(4);
        for i in 0..100 {
            table.insert(&HASHER, &EQ, &key(i), Some(i as i64)).unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let mut cursor = table.first_cursor();
        while let Some(current) = cursor {
            assert!(seen.insert(table.key_at(current).to_vec()));
            cursor = table.next_cursor(current);
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn test_rehash_preserves_content() {
        let mut table = new_map(2);
        for i in 0..500 {
            table.insert(&HASHER, &EQ, &key(i), Some(i as i64)).unwrap();
        }
        assert!(table.bucket_count() > 2);

        for i in 0..500 {
            let cursor = table.find(&HASHER, &EQ, &key(i)).unwrap();
            assert_eq!(*table.value_at(cursor), i as i64);
        }
    }

    #[test]
    fn test_shrink_to_fit() {
        let mut table = new_map(1024);
        for i in 0..32 {
            table.insert(&HASHER, &EQ, &key(i), Some(i as i64)).unwrap();
        }
        for i in 16..32 {
            table.erase_key(&HASHER, &EQ, &key(i));
        }

        table.shrink_to_fit(&HASHER);
        assert!(table.bucket_count() <= 16);
        assert_eq!(table.values.len(), table.len());
        for i in 0..16 {
            let cursor = table.find(&HASHER, &EQ, &key(i)).unwrap();
            assert_eq!(*table.value_at(cursor), i as i64);
        }
    }

    #[test]
    fn test_erase_prefix() {
        let mut table = new_map(16);
        for i in 0..100 {
            table.insert(&HASHER, &EQ, &key(i), Some(i as i64)).unwrap();
        }

        // "Key 1", "Key 1x" for x in 0..10
        assert_eq!(table.erase_prefix(b"Key 1"), 11);
        assert_eq!(table.len(), 89);
        assert!(table.find(&HASHER, &EQ, b"Key 1").is_none());
        assert!(table.find(&HASHER, &EQ, b"Key 12").is_none());
        assert!(table.find(&HASHER, &EQ, b"Key 2").is_some());

        assert_eq!(table.erase_prefix(b""), 89);
        assert!(table.is_empty());
    }

    #[test]
    fn test_set_mode() {
        let mut table: ArrayHash<()> =
            ArrayHash::with_bucket_count(16, set_layout(), GrowthPolicy::default(), 8.0);

        for i in 0..100 {
            assert!(table.insert(&HASHER, &EQ, &key(i), None).unwrap().1);
        }
        assert!(!table.insert(&HASHER, &EQ, &key(5), None).unwrap().1);
        assert_eq!(table.len(), 100);
        assert!(table.values.is_empty());

        assert_eq!(table.erase_key(&HASHER, &EQ, &key(5)), Some(None));
        assert_eq!(table.len(), 99);
    }
}
