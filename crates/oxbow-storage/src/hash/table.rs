//! Disk-resident extendible hash table.
//!
//! Three levels of indirection: a header page routes a hash's high bits to
//! a directory; the directory routes the low bits to a bucket; the bucket
//! stores the entries. Buckets split (possibly doubling the directory) when
//! full and merge with their split image when one of the pair empties.
//!
//! # Latching
//!
//! Latches are always taken top-down (header, then directory, then bucket)
//! and a higher-level latch is never re-acquired while a lower one is held,
//! so the traversal order is a strict tree and cannot deadlock. Lookups
//! release each level as soon as the child pointer has been read. Writers
//! keep the directory latch exclusively for the whole operation, since a
//! split or merge may modify it; bucket latches are only ever acquired
//! under the directory latch.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use oxbow_common::constants::{HASH_DIRECTORY_MAX_DEPTH, HASH_HEADER_MAX_DEPTH};
use oxbow_common::types::PageId;
use tracing::{debug, warn};

use crate::buffer::{BufferError, BufferPoolManager, BufferResult, WritePageGuard};

use super::bucket_page::{bucket_capacity, BucketPageMut, BucketPageRef};
use super::codec::FixedCodec;
use super::directory_page::{DirectoryPageMut, DirectoryPageRef};
use super::header_page::{HeaderPageMut, HeaderPageRef};

/// A user-supplied hash function producing the 32-bit routing value.
///
/// Implemented for any `Fn(&K) -> u32`, so tests can inject degenerate
/// hashers to force collisions.
pub trait KeyHasher<K>: Send + Sync {
    /// Hashes `key` to its 32-bit routing value.
    fn hash_of(&self, key: &K) -> u32;
}

impl<K, F> KeyHasher<K> for F
where
    F: Fn(&K) -> u32 + Send + Sync,
{
    fn hash_of(&self, key: &K) -> u32 {
        self(key)
    }
}

/// Hashes keys through the standard library's `DefaultHasher`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyHasher;

impl<K: Hash> KeyHasher<K> for DefaultKeyHasher {
    fn hash_of(&self, key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}

/// Disk-resident extendible hash table over fixed-width keys and values.
///
/// Key equality uses `K: PartialEq`; routing uses the [`KeyHasher`]. The
/// hash function is assumed pure and deterministic.
pub struct DiskExtendibleHashTable<K, V, H = DefaultKeyHasher> {
    bpm: Arc<BufferPoolManager>,
    hasher: H,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, H> DiskExtendibleHashTable<K, V, H>
where
    K: FixedCodec + PartialEq,
    V: FixedCodec,
    H: KeyHasher<K>,
{
    /// Creates a table, allocating and initializing its header page.
    ///
    /// `header_max_depth` and `directory_max_depth` bound how far the
    /// index can grow; `bucket_max_size` is the per-bucket entry capacity.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        hasher: H,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: usize,
    ) -> BufferResult<Self> {
        if header_max_depth > HASH_HEADER_MAX_DEPTH {
            return Err(BufferError::config(format!(
                "header_max_depth {header_max_depth} exceeds {HASH_HEADER_MAX_DEPTH}"
            )));
        }
        if directory_max_depth > HASH_DIRECTORY_MAX_DEPTH {
            return Err(BufferError::config(format!(
                "directory_max_depth {directory_max_depth} exceeds {HASH_DIRECTORY_MAX_DEPTH}"
            )));
        }
        if bucket_max_size == 0 || bucket_max_size > bucket_capacity::<K, V>() {
            return Err(BufferError::config(format!(
                "bucket_max_size {bucket_max_size} outside 1..={}",
                bucket_capacity::<K, V>()
            )));
        }

        let guard = bpm.new_page()?;
        let header_page_id = guard.page_id();
        let mut header_guard = guard.upgrade_write();
        HeaderPageMut::new(header_guard.data_mut()).init(header_max_depth);
        drop(header_guard);

        Ok(Self {
            bpm,
            hasher,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            _marker: PhantomData,
        })
    }

    /// The fixed id of the table's header page.
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Looks up `key` and returns its value, if present.
    pub fn get(&self, key: &K) -> BufferResult<Option<V>> {
        let hash = self.hasher.hash_of(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let directory_page_id = {
            let header = HeaderPageRef::new(header_guard.data());
            header.directory_page_id(header.hash_to_directory_index(hash))
        };
        drop(header_guard);
        if !directory_page_id.is_valid() {
            return Ok(None);
        }

        let dir_guard = self.bpm.fetch_page_read(directory_page_id)?;
        let bucket_page_id = {
            let dir = DirectoryPageRef::new(dir_guard.data());
            dir.bucket_page_id(dir.hash_to_bucket_index(hash))
        };
        drop(dir_guard);
        if !bucket_page_id.is_valid() {
            return Ok(None);
        }

        let bucket_guard = self.bpm.fetch_page_read(bucket_page_id)?;
        Ok(BucketPageRef::<K, V>::new(bucket_guard.data()).lookup(key))
    }

    /// Inserts `(key, value)`.
    ///
    /// Returns `Ok(false)` if the key is already present, or if a needed
    /// split would push a directory past its depth ceiling (the index is
    /// full along that path). May split buckets and grow the directory.
    pub fn insert(&self, key: &K, value: &V) -> BufferResult<bool> {
        let hash = self.hasher.hash_of(key);

        let mut header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let (directory_slot, directory_page_id) = {
            let header = HeaderPageRef::new(header_guard.data());
            let slot = header.hash_to_directory_index(hash);
            (slot, header.directory_page_id(slot))
        };
        if !directory_page_id.is_valid() {
            return self.insert_to_new_directory(&mut header_guard, directory_slot, hash, key, value);
        }

        // The header is immutable from here on; latch the directory before
        // letting it go.
        let mut dir_guard = self.bpm.fetch_page_write(directory_page_id)?;
        drop(header_guard);
        self.insert_into_directory(&mut dir_guard, hash, key, value)
    }

    /// Removes `key`.
    ///
    /// Returns `Ok(false)` if the key is absent. Empty buckets merge with
    /// their split images and the directory shrinks while it can; the
    /// directory itself is never freed.
    pub fn remove(&self, key: &K) -> BufferResult<bool> {
        let hash = self.hasher.hash_of(key);

        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let directory_page_id = {
            let header = HeaderPageRef::new(header_guard.data());
            header.directory_page_id(header.hash_to_directory_index(hash))
        };
        drop(header_guard);
        if !directory_page_id.is_valid() {
            return Ok(false);
        }

        let mut dir_guard = self.bpm.fetch_page_write(directory_page_id)?;
        let (mut bucket_slot, mut bucket_page_id) = {
            let dir = DirectoryPageRef::new(dir_guard.data());
            let slot = dir.hash_to_bucket_index(hash);
            (slot, dir.bucket_page_id(slot))
        };
        if !bucket_page_id.is_valid() {
            return Ok(false);
        }

        let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
        if !BucketPageMut::<K, V>::new(bucket_guard.data_mut()).remove(key) {
            return Ok(false);
        }

        // Merge loop: a bucket pairs with its split image whenever both
        // halves sit at the same local depth and one of them is empty. The
        // image may be the empty one, so merging continues even when the
        // just-shrunk bucket still holds entries.
        loop {
            let (local_depth, image_slot) = {
                let dir = DirectoryPageRef::new(dir_guard.data());
                let depth = dir.local_depth(bucket_slot);
                if depth == 0 {
                    break;
                }
                (depth, dir.split_image_index(bucket_slot))
            };
            let image_page_id = {
                let dir = DirectoryPageRef::new(dir_guard.data());
                if dir.local_depth(image_slot) != local_depth {
                    break;
                }
                dir.bucket_page_id(image_slot)
            };
            // Distinct classes at equal depth never share a page.
            if !image_page_id.is_valid() || image_page_id == bucket_page_id {
                break;
            }

            let image_guard = self.bpm.fetch_page_write(image_page_id)?;
            let bucket_empty = BucketPageRef::<K, V>::new(bucket_guard.data()).is_empty();
            let image_empty = BucketPageRef::<K, V>::new(image_guard.data()).is_empty();
            if !bucket_empty && !image_empty {
                break;
            }

            // Survivor: the non-empty bucket, or the image when both are
            // empty.
            let (survivor_slot, survivor_page_id, dead_page_id) = if bucket_empty {
                (image_slot, image_page_id, bucket_page_id)
            } else {
                (bucket_slot, bucket_page_id, image_page_id)
            };
            let merged_depth = local_depth - 1;

            {
                let mut dir = DirectoryPageMut::new(dir_guard.data_mut());
                for slot in 0..dir.as_ref().size() {
                    let page_id = dir.as_ref().bucket_page_id(slot);
                    if page_id == bucket_page_id || page_id == image_page_id {
                        dir.set_bucket_page_id(slot, survivor_page_id);
                        dir.set_local_depth(slot, merged_depth as u8);
                    }
                }
            }

            if bucket_empty {
                bucket_guard = image_guard;
            } else {
                drop(image_guard);
            }
            BucketPageMut::<K, V>::new(bucket_guard.data_mut()).set_local_depth(merged_depth);

            debug!(
                survivor = %survivor_page_id,
                freed = %dead_page_id,
                depth = merged_depth,
                "merged hash buckets"
            );
            if !self.bpm.delete_page(dead_page_id) {
                warn!(page_id = %dead_page_id, "merged bucket page still pinned, not freed");
            }

            bucket_slot = survivor_slot;
            bucket_page_id = survivor_page_id;
        }

        while DirectoryPageRef::new(dir_guard.data()).can_shrink() {
            DirectoryPageMut::new(dir_guard.data_mut()).decr_global_depth();
        }

        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Insert internals
    // -------------------------------------------------------------------------

    /// First insert routed to `directory_slot`: allocates the directory and
    /// its first bucket while still holding the header write latch.
    fn insert_to_new_directory(
        &self,
        header_guard: &mut WritePageGuard<'_>,
        directory_slot: usize,
        hash: u32,
        key: &K,
        value: &V,
    ) -> BufferResult<bool> {
        let guard = self.bpm.new_page()?;
        let directory_page_id = guard.page_id();
        let mut dir_guard = guard.upgrade_write();
        DirectoryPageMut::new(dir_guard.data_mut()).init(self.directory_max_depth);
        HeaderPageMut::new(header_guard.data_mut())
            .set_directory_page_id(directory_slot, directory_page_id);
        debug!(slot = directory_slot, page_id = %directory_page_id, "allocated hash directory");

        let bucket_slot = DirectoryPageRef::new(dir_guard.data()).hash_to_bucket_index(hash);
        self.insert_to_new_bucket(&mut dir_guard, bucket_slot, key, value)
    }

    /// Allocates a bucket for an unallocated directory slot and inserts
    /// into it.
    fn insert_to_new_bucket(
        &self,
        dir_guard: &mut WritePageGuard<'_>,
        bucket_slot: usize,
        key: &K,
        value: &V,
    ) -> BufferResult<bool> {
        let guard = self.bpm.new_page()?;
        let bucket_page_id = guard.page_id();
        let mut bucket_guard = guard.upgrade_write();

        let local_depth = DirectoryPageRef::new(dir_guard.data()).local_depth(bucket_slot);
        let mut bucket = BucketPageMut::<K, V>::new(bucket_guard.data_mut());
        bucket.init(self.bucket_max_size, local_depth);
        let inserted = bucket.insert(key, value);
        debug_assert!(inserted, "fresh bucket rejected its first entry");

        DirectoryPageMut::new(dir_guard.data_mut()).set_bucket_page_id(bucket_slot, bucket_page_id);
        Ok(inserted)
    }

    /// Insert under the directory write latch, splitting as needed.
    fn insert_into_directory(
        &self,
        dir_guard: &mut WritePageGuard<'_>,
        hash: u32,
        key: &K,
        value: &V,
    ) -> BufferResult<bool> {
        let (mut bucket_slot, mut bucket_page_id) = {
            let dir = DirectoryPageRef::new(dir_guard.data());
            let slot = dir.hash_to_bucket_index(hash);
            (slot, dir.bucket_page_id(slot))
        };
        if !bucket_page_id.is_valid() {
            return self.insert_to_new_bucket(dir_guard, bucket_slot, key, value);
        }

        let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id)?;
        loop {
            {
                let mut bucket = BucketPageMut::<K, V>::new(bucket_guard.data_mut());
                if bucket.as_ref().lookup(key).is_some() {
                    return Ok(false);
                }
                if !bucket.as_ref().is_full() {
                    return Ok(bucket.insert(key, value));
                }
            }

            // Full bucket: grow the directory if this bucket already uses
            // every global bit, then split it. Splitting may leave the
            // target bucket full again, so retry until the insert lands.
            {
                let (global_depth, local_depth, max_depth) = {
                    let dir = DirectoryPageRef::new(dir_guard.data());
                    (
                        dir.global_depth(),
                        dir.local_depth(bucket_slot),
                        dir.max_depth(),
                    )
                };
                if local_depth == global_depth {
                    if global_depth == max_depth {
                        debug!(
                            page_id = %bucket_page_id,
                            depth = global_depth,
                            "hash directory at depth ceiling, insert rejected"
                        );
                        return Ok(false);
                    }
                    DirectoryPageMut::new(dir_guard.data_mut()).incr_global_depth();
                }
            }
            self.split_bucket(dir_guard, &mut bucket_guard, bucket_slot)?;

            // Re-route: the key may now belong to the new image bucket.
            let (new_slot, new_page_id) = {
                let dir = DirectoryPageRef::new(dir_guard.data());
                let slot = dir.hash_to_bucket_index(hash);
                (slot, dir.bucket_page_id(slot))
            };
            if new_page_id != bucket_page_id {
                bucket_guard = self.bpm.fetch_page_write(new_page_id)?;
                bucket_page_id = new_page_id;
            }
            bucket_slot = new_slot;
        }
    }

    /// Splits the full bucket at `bucket_slot`: allocates its image bucket,
    /// repoints every directory slot in the image's class, and
    /// redistributes the entries by their hash at the deepened prefix.
    fn split_bucket(
        &self,
        dir_guard: &mut WritePageGuard<'_>,
        bucket_guard: &mut WritePageGuard<'_>,
        bucket_slot: usize,
    ) -> BufferResult<()> {
        let guard = self.bpm.new_page()?;
        let image_page_id = guard.page_id();
        let mut image_guard = guard.upgrade_write();

        let new_depth = DirectoryPageRef::new(dir_guard.data()).local_depth(bucket_slot) + 1;
        let image_slot = bucket_slot ^ (1usize << (new_depth - 1));
        let mask = (1usize << new_depth) - 1;

        // Every slot in the image's class moves to the new bucket; every
        // slot in either class records the deepened local depth.
        {
            let mut dir = DirectoryPageMut::new(dir_guard.data_mut());
            for slot in 0..dir.as_ref().size() {
                if slot & mask == image_slot & mask {
                    dir.set_bucket_page_id(slot, image_page_id);
                    dir.set_local_depth(slot, new_depth as u8);
                } else if slot & mask == bucket_slot & mask {
                    dir.set_local_depth(slot, new_depth as u8);
                }
            }
        }

        let entries = BucketPageRef::<K, V>::new(bucket_guard.data()).entries();
        let mut old_bucket = BucketPageMut::<K, V>::new(bucket_guard.data_mut());
        old_bucket.set_local_depth(new_depth);
        old_bucket.clear();
        let mut image_bucket = BucketPageMut::<K, V>::new(image_guard.data_mut());
        image_bucket.init(self.bucket_max_size, new_depth);

        let image_bits = (image_slot & mask) as u32;
        for (entry_key, entry_value) in entries {
            let target = if self.hasher.hash_of(&entry_key) & mask as u32 == image_bits {
                &mut image_bucket
            } else {
                &mut old_bucket
            };
            let inserted = target.insert(&entry_key, &entry_value);
            debug_assert!(inserted, "redistribution overflowed a bucket");
        }

        debug!(
            old = %DirectoryPageRef::new(dir_guard.data()).bucket_page_id(bucket_slot),
            image = %image_page_id,
            depth = new_depth,
            "split hash bucket"
        );
        Ok(())
    }
}

impl<K, V, H> std::fmt::Debug for DiskExtendibleHashTable<K, V, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskExtendibleHashTable")
            .field("header_page_id", &self.header_page_id)
            .field("directory_max_depth", &self.directory_max_depth)
            .field("bucket_max_size", &self.bucket_max_size)
            .finish()
    }
}
