//! RAII page guards.
//!
//! A guard pairs exactly one pin on one frame with an optional page latch
//! and releases both on every exit path. Guards are move-only; moving one
//! transfers the pin (and latch) to the new owner, and dropping one unpins
//! exactly once.
//!
//! The three variants mirror how the page is used:
//!
//! - [`PageGuard`]: pin only. Data access takes the latch momentarily.
//! - [`ReadPageGuard`]: pin + shared latch held for the guard's lifetime.
//! - [`WritePageGuard`]: pin + exclusive latch held for the guard's
//!   lifetime; conservatively flagged dirty on drop.

use std::sync::Arc;

use oxbow_common::types::PageId;
use parking_lot::{
    ArcRwLockReadGuard, ArcRwLockWriteGuard, MappedRwLockReadGuard, MappedRwLockWriteGuard,
    RwLockReadGuard, RwLockWriteGuard,
};

use super::frame::Frame;
use super::pool::BufferPoolManager;

/// The pin a guard owns. Dropping it unpins exactly once, passing along the
/// dirty hint accumulated on this guard.
struct Pin<'a> {
    pool: &'a BufferPoolManager,
    frame: Arc<Frame>,
    page_id: PageId,
    dirty: bool,
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        // A failed unpin means this guard's pin was already released
        // elsewhere - a programming error, not a recoverable condition.
        if !self.pool.unpin_page(self.page_id, self.dirty) {
            panic!("page {} already unpinned", self.page_id);
        }
    }
}

/// Basic page guard: owns one pin, no latch.
///
/// Dropping the guard unpins with the current dirty hint. Use
/// [`upgrade_read`](PageGuard::upgrade_read) /
/// [`upgrade_write`](PageGuard::upgrade_write) to acquire a latch while
/// keeping the same pin.
pub struct PageGuard<'a> {
    pin: Pin<'a>,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPoolManager, frame: Arc<Frame>, page_id: PageId) -> Self {
        Self {
            pin: Pin {
                pool,
                frame,
                page_id,
                dirty: false,
            },
        }
    }

    /// Returns the guarded page's id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    /// Shared access to the page bytes (takes the latch momentarily).
    #[inline]
    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.pin.frame.read_data(), |data| &data[..])
    }

    /// Exclusive access to the page bytes (takes the latch momentarily) and
    /// records the dirty hint.
    #[inline]
    pub fn data_mut(&mut self) -> MappedRwLockWriteGuard<'_, [u8]> {
        self.pin.dirty = true;
        RwLockWriteGuard::map(self.pin.frame.write_data(), |data| &mut data[..])
    }

    /// Records the dirty hint without touching the bytes.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.pin.dirty = true;
    }

    /// Acquires the shared latch and transfers the pin into a read guard.
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        let latch = self.pin.frame.latch().read_arc();
        ReadPageGuard {
            latch,
            pin: self.pin,
        }
    }

    /// Acquires the exclusive latch and transfers the pin into a write
    /// guard.
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        let latch = self.pin.frame.latch().write_arc();
        let mut pin = self.pin;
        // Writable access is conservatively assumed to mutate.
        pin.dirty = true;
        WritePageGuard { latch, pin }
    }
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.pin.page_id)
            .field("dirty", &self.pin.dirty)
            .finish()
    }
}

/// Read guard: pin + shared latch, both held until drop.
///
/// Drop releases the latch first, then the pin.
pub struct ReadPageGuard<'a> {
    // Field order is load-bearing: the latch must be released before the
    // pin is returned to the pool.
    latch: ArcRwLockReadGuard<parking_lot::RawRwLock, Box<[u8]>>,
    pin: Pin<'a>,
}

impl ReadPageGuard<'_> {
    /// Returns the guarded page's id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    /// The page bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.latch
    }
}

impl std::fmt::Debug for ReadPageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPageGuard")
            .field("page_id", &self.pin.page_id)
            .finish()
    }
}

/// Write guard: pin + exclusive latch, both held until drop.
///
/// Created with the dirty hint already set: holding writable access is
/// assumed to mutate whether or not the caller actually did. Drop releases
/// the latch first, then the pin.
pub struct WritePageGuard<'a> {
    latch: ArcRwLockWriteGuard<parking_lot::RawRwLock, Box<[u8]>>,
    pin: Pin<'a>,
}

impl WritePageGuard<'_> {
    /// Returns the guarded page's id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    /// The page bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.latch
    }

    /// The page bytes, writable.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.latch
    }

    /// Withdraws the conservative dirty hint; the next `data_mut` call
    /// restores it.
    #[inline]
    pub fn clear_dirty(&mut self) {
        self.pin.dirty = false;
    }
}

impl std::fmt::Debug for WritePageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePageGuard")
            .field("page_id", &self.pin.page_id)
            .field("dirty", &self.pin.dirty)
            .finish()
    }
}
