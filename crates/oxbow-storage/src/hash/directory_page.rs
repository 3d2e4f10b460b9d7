//! Extendible hash directory page.
//!
//! A directory routes a hash value to a bucket by its *low* `global_depth`
//! bits. The on-page arrays are sized for the configured `max_depth`; only
//! the first `2^global_depth` slots are active.
//!
//! # Page Layout
//!
//! ```text
//! Offset              Size              Field
//! ------------------  ----------------  -----
//!   0                 4                 max_depth
//!   4                 4                 global_depth
//!   8                 4 * 2^max_depth   bucket_page_ids
//!   8 + 4*2^max       1 * 2^max_depth   local_depths
//! ```
//!
//! Invariants maintained by the table operations and checked by
//! [`verify_integrity`](DirectoryPageRef::verify_integrity):
//!
//! - `local_depths[i] <= global_depth` for every active slot.
//! - Active slots whose low `local_depths[i]` bits agree point to the same
//!   bucket page with equal local depths.

use oxbow_common::constants::HASH_DIRECTORY_MAX_DEPTH;
use oxbow_common::types::PageId;

const MAX_DEPTH_OFFSET: usize = 0;
const GLOBAL_DEPTH_OFFSET: usize = 4;
const BUCKET_IDS_OFFSET: usize = 8;

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().expect("4-byte slice"))
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read-only view of a directory page.
#[derive(Clone, Copy)]
pub struct DirectoryPageRef<'a> {
    data: &'a [u8],
}

impl<'a> DirectoryPageRef<'a> {
    /// Wraps the page bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Depth ceiling this directory was initialized with.
    #[inline]
    pub fn max_depth(&self) -> u32 {
        read_u32(self.data, MAX_DEPTH_OFFSET)
    }

    /// Current global depth.
    #[inline]
    pub fn global_depth(&self) -> u32 {
        read_u32(self.data, GLOBAL_DEPTH_OFFSET)
    }

    /// Number of active slots (`2^global_depth`).
    #[inline]
    pub fn size(&self) -> usize {
        1usize << self.global_depth()
    }

    fn local_depths_offset(&self) -> usize {
        BUCKET_IDS_OFFSET + 4 * (1usize << self.max_depth())
    }

    /// The bucket page id stored in `slot`.
    pub fn bucket_page_id(&self, slot: usize) -> PageId {
        debug_assert!(slot < (1usize << self.max_depth()));
        PageId::new(read_u32(self.data, BUCKET_IDS_OFFSET + slot * 4))
    }

    /// The local depth recorded for `slot`.
    pub fn local_depth(&self, slot: usize) -> u32 {
        debug_assert!(slot < (1usize << self.max_depth()));
        u32::from(self.data[self.local_depths_offset() + slot])
    }

    /// Routes a hash value to its active slot by the low bits.
    pub fn hash_to_bucket_index(&self, hash: u32) -> usize {
        (hash as usize) & (self.size() - 1)
    }

    /// Mask selecting the hash bits that route to `slot`'s bucket.
    pub fn local_depth_mask(&self, slot: usize) -> u32 {
        (1u32 << self.local_depth(slot)) - 1
    }

    /// The slot that pairs with `slot` at its current local depth.
    ///
    /// Only meaningful for `local_depth > 0`.
    pub fn split_image_index(&self, slot: usize) -> usize {
        let depth = self.local_depth(slot);
        debug_assert!(depth > 0);
        slot ^ (1usize << (depth - 1))
    }

    /// True when no active slot uses all `global_depth` bits, i.e. the
    /// directory can be halved.
    pub fn can_shrink(&self) -> bool {
        let global_depth = self.global_depth();
        if global_depth == 0 {
            return false;
        }
        (0..self.size()).all(|slot| self.local_depth(slot) < global_depth)
    }

    /// Panics if the directory invariants do not hold. Debugging aid for
    /// randomized tests.
    pub fn verify_integrity(&self) {
        let global_depth = self.global_depth();
        assert!(global_depth <= self.max_depth(), "global depth above ceiling");
        for slot in 0..self.size() {
            let depth = self.local_depth(slot);
            assert!(
                depth <= global_depth,
                "slot {slot}: local depth {depth} exceeds global depth {global_depth}"
            );
            // Every slot must agree with its class representative: the slot
            // formed by its low `local_depth` bits.
            let representative = slot & ((1usize << depth) - 1);
            assert_eq!(
                self.bucket_page_id(slot),
                self.bucket_page_id(representative),
                "slot {slot} disagrees with representative {representative} on bucket id"
            );
            assert_eq!(
                self.local_depth(representative),
                depth,
                "slot {slot} disagrees with representative {representative} on local depth"
            );
        }
    }
}

/// Mutable view of a directory page.
pub struct DirectoryPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> DirectoryPageMut<'a> {
    /// Wraps the page bytes.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Read-only view of the same page.
    #[inline]
    pub fn as_ref(&self) -> DirectoryPageRef<'_> {
        DirectoryPageRef { data: self.data }
    }

    /// Initializes a fresh directory at `global_depth = 0` with a single
    /// unallocated slot.
    pub fn init(&mut self, max_depth: u32) {
        assert!(
            max_depth <= HASH_DIRECTORY_MAX_DEPTH,
            "directory max_depth {max_depth} exceeds limit {HASH_DIRECTORY_MAX_DEPTH}"
        );
        write_u32(self.data, MAX_DEPTH_OFFSET, max_depth);
        write_u32(self.data, GLOBAL_DEPTH_OFFSET, 0);
        for slot in 0..(1usize << max_depth) {
            self.set_bucket_page_id(slot, PageId::INVALID);
            self.set_local_depth(slot, 0);
        }
    }

    /// Stores a bucket page id in `slot`.
    pub fn set_bucket_page_id(&mut self, slot: usize, page_id: PageId) {
        debug_assert!(slot < (1usize << self.as_ref().max_depth()));
        write_u32(self.data, BUCKET_IDS_OFFSET + slot * 4, page_id.as_u32());
    }

    /// Records the local depth of `slot`.
    pub fn set_local_depth(&mut self, slot: usize, depth: u8) {
        debug_assert!(slot < (1usize << self.as_ref().max_depth()));
        let offset = self.as_ref().local_depths_offset();
        self.data[offset + slot] = depth;
    }

    /// Doubles the active directory by mirroring the existing half.
    ///
    /// Pointers and local depths of the newly revealed slots are copies of
    /// their lower halves.
    pub fn incr_global_depth(&mut self) {
        let old_size = self.as_ref().size();
        let global_depth = self.as_ref().global_depth();
        assert!(
            global_depth < self.as_ref().max_depth(),
            "directory already at max depth"
        );
        for slot in 0..old_size {
            let page_id = self.as_ref().bucket_page_id(slot);
            let depth = self.as_ref().local_depth(slot) as u8;
            self.set_bucket_page_id(old_size + slot, page_id);
            self.set_local_depth(old_size + slot, depth);
        }
        write_u32(self.data, GLOBAL_DEPTH_OFFSET, global_depth + 1);
    }

    /// Halves the active directory.
    pub fn decr_global_depth(&mut self) {
        let global_depth = self.as_ref().global_depth();
        assert!(global_depth > 0, "directory already at depth 0");
        write_u32(self.data, GLOBAL_DEPTH_OFFSET, global_depth - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxbow_common::constants::PAGE_SIZE;

    fn fresh_directory(max_depth: u32) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        DirectoryPageMut::new(&mut page).init(max_depth);
        page
    }

    #[test]
    fn test_init() {
        let page = fresh_directory(3);
        let dir = DirectoryPageRef::new(&page);
        assert_eq!(dir.max_depth(), 3);
        assert_eq!(dir.global_depth(), 0);
        assert_eq!(dir.size(), 1);
        assert_eq!(dir.bucket_page_id(0), PageId::INVALID);
        assert_eq!(dir.local_depth(0), 0);
    }

    #[test]
    fn test_growth_mirrors_lower_half() {
        let mut page = fresh_directory(3);
        let mut dir = DirectoryPageMut::new(&mut page);
        dir.set_bucket_page_id(0, PageId::new(7));
        dir.set_local_depth(0, 0);
        dir.incr_global_depth();

        let view = dir.as_ref();
        assert_eq!(view.global_depth(), 1);
        assert_eq!(view.size(), 2);
        assert_eq!(view.bucket_page_id(1), PageId::new(7));
        assert_eq!(view.local_depth(1), 0);
        view.verify_integrity();
    }

    #[test]
    fn test_hash_routing_uses_low_bits() {
        let mut page = fresh_directory(3);
        let mut dir = DirectoryPageMut::new(&mut page);
        dir.set_bucket_page_id(0, PageId::new(1));
        dir.incr_global_depth();
        dir.incr_global_depth();

        let view = dir.as_ref();
        assert_eq!(view.size(), 4);
        assert_eq!(view.hash_to_bucket_index(0b1011), 0b11);
        assert_eq!(view.hash_to_bucket_index(0b1100), 0b00);
    }

    #[test]
    fn test_split_image_index() {
        let mut page = fresh_directory(3);
        {
            let mut dir = DirectoryPageMut::new(&mut page);
            dir.incr_global_depth();
            dir.incr_global_depth();
            dir.set_local_depth(0b01, 2);
            dir.set_local_depth(0b11, 2);
            dir.set_local_depth(0b10, 1);
            dir.set_local_depth(0b00, 1);
        }
        let dir = DirectoryPageRef::new(&page);
        // Depth-2 slots pair by flipping bit 1, depth-1 slots by flipping bit 0.
        assert_eq!(dir.split_image_index(0b01), 0b11);
        assert_eq!(dir.split_image_index(0b11), 0b01);
        assert_eq!(dir.split_image_index(0b10), 0b11);
        assert_eq!(dir.split_image_index(0b00), 0b01);
    }

    #[test]
    fn test_can_shrink() {
        let mut page = fresh_directory(3);
        let mut dir = DirectoryPageMut::new(&mut page);
        assert!(!dir.as_ref().can_shrink()); // depth 0 can never shrink

        dir.incr_global_depth();
        // Both slots still at local depth 0 < global depth 1.
        assert!(dir.as_ref().can_shrink());

        dir.set_local_depth(0, 1);
        assert!(!dir.as_ref().can_shrink());

        dir.set_local_depth(0, 0);
        dir.decr_global_depth();
        assert_eq!(dir.as_ref().global_depth(), 0);
    }
}
