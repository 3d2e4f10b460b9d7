//! Extendible hash bucket page.
//!
//! A bucket stores up to `max_size` fixed-width key/value entries in
//! insertion order. Insert appends; remove compacts by swapping the victim
//! with the last entry.
//!
//! # Page Layout
//!
//! ```text
//! Offset  Size                 Field
//! ------  -------------------  -----
//!   0     4                    size
//!   4     4                    max_size
//!   8     4                    local_depth
//!  12     max_size * entry     entries (key bytes ++ value bytes)
//! ```

use std::marker::PhantomData;

use oxbow_common::constants::PAGE_SIZE;

use super::codec::FixedCodec;

const SIZE_OFFSET: usize = 0;
const MAX_SIZE_OFFSET: usize = 4;
const LOCAL_DEPTH_OFFSET: usize = 8;

/// Fixed header bytes before the entry array.
pub const BUCKET_HEADER_LEN: usize = 12;

/// The largest `max_size` a bucket of `(K, V)` entries can be configured
/// with on one page.
pub fn bucket_capacity<K: FixedCodec, V: FixedCodec>() -> usize {
    (PAGE_SIZE - BUCKET_HEADER_LEN) / (K::ENCODED_LEN + V::ENCODED_LEN)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().expect("4-byte slice"))
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read-only view of a bucket page.
pub struct BucketPageRef<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: FixedCodec + PartialEq, V: FixedCodec> BucketPageRef<'a, K, V> {
    /// Wraps the page bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn size(&self) -> usize {
        read_u32(self.data, SIZE_OFFSET) as usize
    }

    /// Configured capacity.
    #[inline]
    pub fn max_size(&self) -> usize {
        read_u32(self.data, MAX_SIZE_OFFSET) as usize
    }

    /// Local depth recorded on the bucket.
    #[inline]
    pub fn local_depth(&self) -> u32 {
        read_u32(self.data, LOCAL_DEPTH_OFFSET)
    }

    /// True when no further entry fits.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.size() >= self.max_size()
    }

    /// True when no entry is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn entry_offset(index: usize) -> usize {
        BUCKET_HEADER_LEN + index * (K::ENCODED_LEN + V::ENCODED_LEN)
    }

    /// Decodes the entry at `index`.
    pub fn entry_at(&self, index: usize) -> (K, V) {
        debug_assert!(index < self.size());
        let offset = Self::entry_offset(index);
        let key = K::decode_from(&self.data[offset..offset + K::ENCODED_LEN]);
        let value = V::decode_from(
            &self.data[offset + K::ENCODED_LEN..offset + K::ENCODED_LEN + V::ENCODED_LEN],
        );
        (key, value)
    }

    /// Linearly scans for `key` and returns its value.
    pub fn lookup(&self, key: &K) -> Option<V> {
        for index in 0..self.size() {
            let (stored_key, value) = self.entry_at(index);
            if stored_key == *key {
                return Some(value);
            }
        }
        None
    }

    /// Decodes every live entry.
    pub fn entries(&self) -> Vec<(K, V)> {
        (0..self.size()).map(|index| self.entry_at(index)).collect()
    }
}

/// Mutable view of a bucket page.
pub struct BucketPageMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: FixedCodec + PartialEq, V: FixedCodec> BucketPageMut<'a, K, V> {
    /// Wraps the page bytes.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Read-only view of the same page.
    #[inline]
    pub fn as_ref(&self) -> BucketPageRef<'_, K, V> {
        BucketPageRef {
            data: self.data,
            _marker: PhantomData,
        }
    }

    /// Initializes an empty bucket.
    pub fn init(&mut self, max_size: usize, local_depth: u32) {
        assert!(
            max_size > 0 && max_size <= bucket_capacity::<K, V>(),
            "bucket max_size {max_size} outside 1..={}",
            bucket_capacity::<K, V>()
        );
        write_u32(self.data, SIZE_OFFSET, 0);
        write_u32(self.data, MAX_SIZE_OFFSET, max_size as u32);
        write_u32(self.data, LOCAL_DEPTH_OFFSET, local_depth);
    }

    /// Updates the recorded local depth.
    pub fn set_local_depth(&mut self, local_depth: u32) {
        write_u32(self.data, LOCAL_DEPTH_OFFSET, local_depth);
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        write_u32(self.data, SIZE_OFFSET, 0);
    }

    fn write_entry(&mut self, index: usize, key: &K, value: &V) {
        let offset = BucketPageRef::<K, V>::entry_offset(index);
        key.encode_into(&mut self.data[offset..offset + K::ENCODED_LEN]);
        value.encode_into(
            &mut self.data[offset + K::ENCODED_LEN..offset + K::ENCODED_LEN + V::ENCODED_LEN],
        );
    }

    /// Appends an entry.
    ///
    /// Returns `false` without mutating if the bucket is full or the key is
    /// already present.
    pub fn insert(&mut self, key: &K, value: &V) -> bool {
        if self.as_ref().is_full() || self.as_ref().lookup(key).is_some() {
            return false;
        }
        let size = self.as_ref().size();
        self.write_entry(size, key, value);
        write_u32(self.data, SIZE_OFFSET, (size + 1) as u32);
        true
    }

    /// Removes the entry for `key` by swapping the last entry into its
    /// place. Returns `false` if the key is absent.
    pub fn remove(&mut self, key: &K) -> bool {
        let size = self.as_ref().size();
        for index in 0..size {
            let (stored_key, _) = self.as_ref().entry_at(index);
            if stored_key == *key {
                if index + 1 < size {
                    let (last_key, last_value) = self.as_ref().entry_at(size - 1);
                    self.write_entry(index, &last_key, &last_value);
                }
                write_u32(self.data, SIZE_OFFSET, (size - 1) as u32);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_bucket(max_size: usize) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        BucketPageMut::<u32, u64>::new(&mut page).init(max_size, 0);
        page
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut page = fresh_bucket(4);
        let mut bucket = BucketPageMut::<u32, u64>::new(&mut page);

        assert!(bucket.insert(&1, &100));
        assert!(bucket.insert(&2, &200));
        assert_eq!(bucket.as_ref().size(), 2);
        assert_eq!(bucket.as_ref().lookup(&1), Some(100));
        assert_eq!(bucket.as_ref().lookup(&2), Some(200));
        assert_eq!(bucket.as_ref().lookup(&3), None);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut page = fresh_bucket(4);
        let mut bucket = BucketPageMut::<u32, u64>::new(&mut page);

        assert!(bucket.insert(&1, &100));
        assert!(!bucket.insert(&1, &999));
        assert_eq!(bucket.as_ref().lookup(&1), Some(100));
        assert_eq!(bucket.as_ref().size(), 1);
    }

    #[test]
    fn test_full_bucket_rejects_insert() {
        let mut page = fresh_bucket(2);
        let mut bucket = BucketPageMut::<u32, u64>::new(&mut page);

        assert!(bucket.insert(&1, &1));
        assert!(bucket.insert(&2, &2));
        assert!(bucket.as_ref().is_full());
        assert!(!bucket.insert(&3, &3));
    }

    #[test]
    fn test_remove_swaps_with_last() {
        let mut page = fresh_bucket(4);
        let mut bucket = BucketPageMut::<u32, u64>::new(&mut page);

        bucket.insert(&1, &100);
        bucket.insert(&2, &200);
        bucket.insert(&3, &300);

        assert!(bucket.remove(&1));
        assert_eq!(bucket.as_ref().size(), 2);
        // The last entry moved into slot 0.
        assert_eq!(bucket.as_ref().entry_at(0), (3, 300));
        assert_eq!(bucket.as_ref().lookup(&2), Some(200));
        assert_eq!(bucket.as_ref().lookup(&1), None);

        assert!(!bucket.remove(&1));
    }

    #[test]
    fn test_remove_last_entry_empties_bucket() {
        let mut page = fresh_bucket(4);
        let mut bucket = BucketPageMut::<u32, u64>::new(&mut page);
        bucket.insert(&7, &70);
        assert!(bucket.remove(&7));
        assert!(bucket.as_ref().is_empty());
    }

    #[test]
    fn test_capacity_accounts_for_header() {
        let capacity = bucket_capacity::<u32, u64>();
        assert_eq!(capacity, (PAGE_SIZE - BUCKET_HEADER_LEN) / 12);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_oversized_max_size_panics() {
        let mut page = vec![0u8; PAGE_SIZE];
        BucketPageMut::<u32, u64>::new(&mut page).init(PAGE_SIZE, 0);
    }
}
