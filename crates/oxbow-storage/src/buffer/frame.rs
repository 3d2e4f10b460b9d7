//! Buffer frame - a slot in the buffer pool that holds one page.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use oxbow_common::constants::PAGE_SIZE;
use oxbow_common::types::PageId;
use parking_lot::RwLock;

/// Frame identifier - index into the buffer pool's frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    /// Creates a new frame ID.
    #[inline]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for FrameId {
    fn from(id: usize) -> Self {
        Self::new(id)
    }
}

impl From<FrameId> for usize {
    fn from(id: FrameId) -> Self {
        id.0
    }
}

/// A buffer frame holds a single page in memory.
///
/// Each frame has:
/// - The page bytes behind a reader/writer latch. The latch only ever
///   protects the bytes, never pool metadata, and lives in an `Arc` so that
///   page guards can own a held latch.
/// - Metadata (resident page id, pin count, dirty flag) in atomics. The
///   pool's mutex serializes every mutation of the metadata; the atomics
///   just make unlocked reads (guards, `Debug`) well-defined.
pub struct Frame {
    /// Frame ID (index in the frame array).
    frame_id: FrameId,
    /// Page bytes guarded by the page latch.
    data: Arc<RwLock<Box<[u8]>>>,
    /// Page ID resident in this frame (`PageId::INVALID` if empty).
    page_id: AtomicU32,
    /// Pin count (number of live guards on this frame).
    pin_count: AtomicU32,
    /// Whether the in-memory contents differ from disk.
    dirty: AtomicBool,
}

impl Frame {
    /// Creates a new empty frame with zeroed page bytes.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            data: Arc::new(RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice())),
            page_id: AtomicU32::new(PageId::INVALID.as_u32()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID resident in this frame.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    /// Sets the resident page ID.
    #[inline]
    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    /// Returns true if no page is resident.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.page_id().is_valid()
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpinned frame with pin_count = 0");
        old - 1
    }

    /// Returns true if the frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets or clears the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// The page latch. Guards take it shared or exclusive via the
    /// `arc_lock` API so the held latch can be stored.
    #[inline]
    pub fn latch(&self) -> &Arc<RwLock<Box<[u8]>>> {
        &self.data
    }

    /// Momentary shared access to the page bytes.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Momentary exclusive access to the page bytes.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// Resets the frame to the empty state, zeroing the page bytes.
    pub fn reset(&self) {
        self.page_id
            .store(PageId::INVALID.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
