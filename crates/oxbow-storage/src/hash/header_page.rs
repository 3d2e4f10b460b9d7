//! Extendible hash header page.
//!
//! The header is the root of the index: it routes a hash value to one of
//! up to `2^max_depth` directory pages by the *high* `max_depth` bits.
//!
//! # Page Layout
//!
//! ```text
//! Offset  Size              Field
//! ------  ----------------  -----
//!   0     4                 max_depth
//!   4     4 * 2^max_depth   directory_page_ids (INVALID when unallocated)
//! ```
//!
//! All fields are little-endian and byte-packed.

use oxbow_common::constants::HASH_HEADER_MAX_DEPTH;
use oxbow_common::types::PageId;

const MAX_DEPTH_OFFSET: usize = 0;
const DIRECTORY_IDS_OFFSET: usize = 4;

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().expect("4-byte slice"))
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read-only view of a header page.
#[derive(Clone, Copy)]
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    /// Wraps the page bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Number of high hash bits this header indexes by.
    #[inline]
    pub fn max_depth(&self) -> u32 {
        read_u32(self.data, MAX_DEPTH_OFFSET)
    }

    /// Number of directory slots (`2^max_depth`).
    #[inline]
    pub fn directory_count(&self) -> usize {
        1usize << self.max_depth()
    }

    /// The directory page id stored in `slot`.
    pub fn directory_page_id(&self, slot: usize) -> PageId {
        debug_assert!(slot < self.directory_count());
        PageId::new(read_u32(self.data, DIRECTORY_IDS_OFFSET + slot * 4))
    }

    /// Routes a hash value to its directory slot by the high bits.
    pub fn hash_to_directory_index(&self, hash: u32) -> usize {
        let depth = self.max_depth();
        if depth == 0 {
            0
        } else {
            (hash >> (32 - depth)) as usize
        }
    }
}

/// Mutable view of a header page.
pub struct HeaderPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPageMut<'a> {
    /// Wraps the page bytes.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Read-only view of the same page.
    #[inline]
    pub fn as_ref(&self) -> HeaderPageRef<'_> {
        HeaderPageRef { data: self.data }
    }

    /// Initializes a fresh header: every directory slot starts `INVALID`.
    pub fn init(&mut self, max_depth: u32) {
        assert!(
            max_depth <= HASH_HEADER_MAX_DEPTH,
            "header max_depth {max_depth} exceeds limit {HASH_HEADER_MAX_DEPTH}"
        );
        write_u32(self.data, MAX_DEPTH_OFFSET, max_depth);
        for slot in 0..(1usize << max_depth) {
            self.set_directory_page_id(slot, PageId::INVALID);
        }
    }

    /// Stores a directory page id in `slot`.
    pub fn set_directory_page_id(&mut self, slot: usize, page_id: PageId) {
        debug_assert!(slot < self.as_ref().directory_count());
        write_u32(
            self.data,
            DIRECTORY_IDS_OFFSET + slot * 4,
            page_id.as_u32(),
        );
    }
}
