//! Buffer pool manager.
//!
//! The pool owns a fixed array of frames and mediates every disk access:
//! it maps page ids to frames, pins pages for callers, evicts cold pages
//! through the LRU-K replacer, and writes dirty victims back before their
//! frame is reused.
//!
//! One pool-wide mutex guards the bookkeeping (page table, free list,
//! replacer, id allocation). Disk I/O is issued while the mutex is held:
//! that serializes the pool around I/O waits, which is a deliberate,
//! correct simplification - it also means concurrent fetches of the same
//! cold page trivially coalesce into a single read.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use oxbow_common::constants::PAGE_SIZE;
use oxbow_common::types::PageId;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::config::BufferPoolConfig;
use super::error::{BufferError, BufferResult};
use super::frame::{Frame, FrameId};
use super::guard::{PageGuard, ReadPageGuard, WritePageGuard};
use super::replacer::LruKReplacer;
use super::BufferPoolStats;
use crate::disk::{Completion, DiskManager, DiskRequest, DiskScheduler};

/// Bookkeeping behind the pool mutex.
struct PoolState {
    /// Maps resident page ids to their frame.
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page. Invariant: frames on this list are zeroed.
    free_frames: VecDeque<FrameId>,
    /// Eviction policy over the frames.
    replacer: LruKReplacer,
    /// Next never-used page id.
    next_page_id: u32,
    /// Ids of deleted pages, reused before `next_page_id` grows.
    reclaimed_ids: VecDeque<PageId>,
}

impl PoolState {
    fn allocate_page_id(&mut self) -> PageId {
        if let Some(id) = self.reclaimed_ids.pop_front() {
            return id;
        }
        let id = PageId::new(self.next_page_id);
        self.next_page_id += 1;
        id
    }
}

/// The buffer pool manager.
///
/// All consumer access goes through guards ([`new_page`], [`fetch_page_basic`]
/// and the latched variants); the raw pin/unpin surface exists for the
/// guards and for tests.
///
/// [`new_page`]: BufferPoolManager::new_page
/// [`fetch_page_basic`]: BufferPoolManager::fetch_page_basic
pub struct BufferPoolManager {
    /// Fixed frame array; frames live for the pool's lifetime.
    frames: Vec<Arc<Frame>>,
    /// Pool-wide mutex over the bookkeeping.
    state: Mutex<PoolState>,
    /// All I/O goes through the scheduler.
    scheduler: DiskScheduler,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
    flush_count: AtomicU64,
}

impl BufferPoolManager {
    /// Creates a pool with `config.num_frames` frames over the given device.
    pub fn new(config: BufferPoolConfig, disk: Arc<dyn DiskManager>) -> BufferResult<Self> {
        config.validate().map_err(BufferError::config)?;

        let frames: Vec<Arc<Frame>> = (0..config.num_frames)
            .map(|i| Arc::new(Frame::new(FrameId::new(i))))
            .collect();
        let free_frames = (0..config.num_frames).map(FrameId::new).collect();

        Ok(Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(config.num_frames),
                free_frames,
                replacer: LruKReplacer::new(config.num_frames, config.replacer_k),
                next_page_id: 0,
                reclaimed_ids: VecDeque::new(),
            }),
            scheduler: DiskScheduler::new(disk),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
        })
    }

    /// Allocates a fresh page, pinned and zeroed, as a basic guard.
    ///
    /// The id comes from the reclamation freelist when one is available,
    /// otherwise from the monotonic counter. Fails with
    /// [`BufferError::PoolExhausted`] when no frame is free or evictable.
    pub fn new_page(&self) -> BufferResult<PageGuard<'_>> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = state.allocate_page_id();
        state.page_table.insert(page_id, frame_id);
        self.track_pinned_access(&mut state, frame_id);

        let frame = Arc::clone(&self.frames[frame_id.index()]);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        debug_assert_eq!(frame.pin_count(), 0);
        frame.pin();
        drop(state);

        Ok(PageGuard::new(self, frame, page_id))
    }

    /// Fetches `page_id`, pinning it, as a basic guard.
    ///
    /// A resident page is returned directly; otherwise a frame is acquired
    /// (free list, else eviction with dirty write-back) and the page is read
    /// from disk synchronously.
    pub fn fetch_page_basic(&self, page_id: PageId) -> BufferResult<PageGuard<'_>> {
        let frame = self.fetch_and_pin(page_id)?;
        Ok(PageGuard::new(self, frame, page_id))
    }

    /// Fetches `page_id` and takes the shared page latch.
    pub fn fetch_page_read(&self, page_id: PageId) -> BufferResult<ReadPageGuard<'_>> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_read())
    }

    /// Fetches `page_id` and takes the exclusive page latch.
    pub fn fetch_page_write(&self, page_id: PageId) -> BufferResult<WritePageGuard<'_>> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_write())
    }

    /// Releases one pin on `page_id`.
    ///
    /// Returns `false` if the page is not resident or its pin count is
    /// already zero. A `true` dirty hint sets the dirty flag; `false` never
    /// clears it. When the last pin goes away the frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.index()];
        if frame.pin_count() == 0 {
            return false;
        }
        let remaining = frame.unpin();
        if dirty {
            frame.set_dirty(true);
        }
        if remaining == 0 {
            state
                .replacer
                .set_evictable(frame_id, true)
                .expect("resident frame is tracked by the replacer");
        }
        true
    }

    /// Writes `page_id` to disk and clears its dirty flag.
    ///
    /// The page is written whether or not it is dirty; after a successful
    /// flush the on-disk contents match the in-memory contents at flush
    /// time. Returns `Ok(false)` if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> BufferResult<bool> {
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.index()];
        self.schedule_write(frame, page_id).wait()?;
        frame.set_dirty(false);
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Flushes every resident page, dirty or not.
    ///
    /// All writes are scheduled first, then every completion is awaited, so
    /// the pages are durable when this returns. Used on shutdown.
    pub fn flush_all_pages(&self) -> BufferResult<()> {
        let state = self.state.lock();
        let mut completions: Vec<Completion> = Vec::with_capacity(state.page_table.len());
        for (&page_id, &frame_id) in &state.page_table {
            let frame = &self.frames[frame_id.index()];
            completions.push(self.schedule_write(frame, page_id));
            frame.set_dirty(false);
        }
        self.flush_count
            .fetch_add(completions.len() as u64, Ordering::Relaxed);
        for completion in completions {
            completion.wait()?;
        }
        Ok(())
    }

    /// Deletes `page_id` from the pool, reclaiming its id.
    ///
    /// Returns `true` if the page is not resident (nothing to do) or was
    /// removed; `false` if it is still pinned. The frame goes back to the
    /// free list zeroed.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };
        let frame = &self.frames[frame_id.index()];
        if frame.pin_count() > 0 {
            return false;
        }
        state.page_table.remove(&page_id);
        state
            .replacer
            .remove(frame_id)
            .expect("unpinned resident frame is evictable");
        frame.reset();
        state.free_frames.push_back(frame_id);
        state.reclaimed_ids.push_back(page_id);
        true
    }

    /// Returns true if `page_id` is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            evictions: self.eviction_count.load(Ordering::Relaxed),
            flushes: self.flush_count.load(Ordering::Relaxed),
        }
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    /// Fetch path shared by the guard constructors: returns the pinned frame.
    fn fetch_and_pin(&self, page_id: PageId) -> BufferResult<Arc<Frame>> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            self.track_pinned_access(&mut state, frame_id);
            let frame = Arc::clone(&self.frames[frame_id.index()]);
            frame.pin();
            return Ok(frame);
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let frame_id = self.acquire_frame(&mut state)?;
        state.page_table.insert(page_id, frame_id);
        self.track_pinned_access(&mut state, frame_id);

        let frame = Arc::clone(&self.frames[frame_id.index()]);
        frame.set_page_id(page_id);
        frame.pin();

        // Synchronous read: the pool treats all I/O as blocking.
        let (promise, completion) = DiskScheduler::create_promise();
        self.scheduler.schedule(DiskRequest {
            is_write: false,
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            page_id,
            promise,
        });
        let data = completion.wait()?;
        frame.write_data().copy_from_slice(&data);
        frame.set_dirty(false);

        Ok(frame)
    }

    /// Obtains a frame for a new resident page: free list first, else a
    /// replacer victim. The eviction sequence (victim, dirty write-back,
    /// page-table erase, frame zeroing) happens atomically under the pool
    /// mutex held by the caller.
    fn acquire_frame(&self, state: &mut PoolState) -> BufferResult<FrameId> {
        if let Some(frame_id) = state.free_frames.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.evict() else {
            warn!("buffer pool exhausted: every frame is pinned");
            return Err(BufferError::PoolExhausted);
        };
        self.eviction_count.fetch_add(1, Ordering::Relaxed);

        let frame = &self.frames[frame_id.index()];
        let old_page_id = frame.page_id();
        debug!(page_id = %old_page_id, frame_id = frame_id.index(), "evicting page");
        state.page_table.remove(&old_page_id);
        if frame.is_dirty() {
            self.schedule_write(frame, old_page_id).wait()?;
        }
        frame.reset();
        Ok(frame_id)
    }

    /// Records an access for a frame about to be handed out pinned.
    fn track_pinned_access(&self, state: &mut PoolState, frame_id: FrameId) {
        state
            .replacer
            .record_access(frame_id)
            .expect("frame id within replacer capacity");
        state
            .replacer
            .set_evictable(frame_id, false)
            .expect("freshly accessed frame is tracked");
    }

    /// Snapshots the frame's bytes and schedules their write-back.
    fn schedule_write(&self, frame: &Frame, page_id: PageId) -> Completion {
        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
        buf.copy_from_slice(&frame.read_data());
        let (promise, completion) = DiskScheduler::create_promise();
        self.scheduler.schedule(DiskRequest {
            is_write: true,
            data: buf,
            page_id,
            promise,
        });
        completion
    }
}

impl std::fmt::Debug for BufferPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPoolManager")
            .field("num_frames", &self.frames.len())
            .field("pages_resident", &self.state.lock().page_table.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemoryDiskManager;

    fn test_pool(frames: usize) -> (Arc<MemoryDiskManager>, BufferPoolManager) {
        let disk = Arc::new(MemoryDiskManager::new());
        let pool = BufferPoolManager::new(
            BufferPoolConfig::new(frames),
            Arc::<MemoryDiskManager>::clone(&disk),
        )
        .unwrap();
        (disk, pool)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let disk = Arc::new(MemoryDiskManager::new());
        assert!(matches!(
            BufferPoolManager::new(BufferPoolConfig::new(0), disk),
            Err(BufferError::Config { .. })
        ));
    }

    #[test]
    fn test_new_pages_get_sequential_ids() {
        let (_, pool) = test_pool(4);
        let p0 = pool.new_page().unwrap();
        let p1 = pool.new_page().unwrap();
        assert_eq!(p0.page_id(), PageId::new(0));
        assert_eq!(p1.page_id(), PageId::new(1));
    }

    #[test]
    fn test_new_page_is_zeroed_after_reuse() {
        let (_, pool) = test_pool(1);
        {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut().fill(0xEE);
        }
        // The single frame is reused for the next allocation.
        let guard = pool.new_page().unwrap();
        assert!(guard.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pool_exhaustion() {
        let (_, pool) = test_pool(2);
        let _a = pool.new_page().unwrap();
        let _b = pool.new_page().unwrap();
        assert!(matches!(pool.new_page(), Err(BufferError::PoolExhausted)));
    }

    #[test]
    fn test_unpin_frees_a_frame() {
        let (_, pool) = test_pool(2);
        let a = pool.new_page().unwrap();
        let _b = pool.new_page().unwrap();
        drop(a);
        assert!(pool.new_page().is_ok());
    }

    #[test]
    fn test_unpin_not_resident() {
        let (_, pool) = test_pool(2);
        assert!(!pool.unpin_page(PageId::new(99), false));
    }

    #[test]
    fn test_unpin_already_zero() {
        let (_, pool) = test_pool(2);
        let page_id = pool.new_page().unwrap().page_id();
        // The guard's drop released the only pin.
        assert!(!pool.unpin_page(page_id, false));
    }

    #[test]
    fn test_evicted_dirty_page_round_trips() {
        let (disk, pool) = test_pool(1);
        let page_id = {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[0..4].copy_from_slice(&[4, 3, 2, 1]);
            guard.page_id()
        };

        // Force eviction, then fetch the page back from disk.
        let other = pool.new_page().unwrap();
        assert_eq!(disk.write_count(page_id), 1);
        drop(other);

        let guard = pool.fetch_page_basic(page_id).unwrap();
        assert_eq!(&guard.data()[0..4], &[4, 3, 2, 1]);
    }

    #[test]
    fn test_clean_page_not_written_on_eviction() {
        let (disk, pool) = test_pool(1);
        let page_id = pool.new_page().unwrap().page_id();
        let _other = pool.new_page().unwrap();
        assert_eq!(disk.write_count(page_id), 0);
    }

    #[test]
    fn test_flush_page_clears_dirty_and_persists() {
        let (disk, pool) = test_pool(2);
        let mut guard = pool.new_page().unwrap();
        let page_id = guard.page_id();
        guard.data_mut()[0] = 0x7F;

        assert!(pool.flush_page(page_id).unwrap());
        let stored = disk.page_contents(page_id).unwrap();
        assert_eq!(stored[0], 0x7F);

        // Not resident -> false.
        assert!(!pool.flush_page(PageId::new(1234)).unwrap());
    }

    #[test]
    fn test_flush_all_pages_waits_for_durability() {
        let (disk, pool) = test_pool(4);
        let mut ids = Vec::new();
        for i in 0..3u8 {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[0] = i;
            ids.push(guard.page_id());
        }
        pool.flush_all_pages().unwrap();
        for (i, &page_id) in ids.iter().enumerate() {
            assert_eq!(disk.page_contents(page_id).unwrap()[0], i as u8);
        }
    }

    #[test]
    fn test_delete_page() {
        let (_, pool) = test_pool(2);
        let guard = pool.new_page().unwrap();
        let page_id = guard.page_id();

        // Pinned -> refused.
        assert!(!pool.delete_page(page_id));
        drop(guard);

        assert!(pool.delete_page(page_id));
        assert!(!pool.contains(page_id));
        // Deleting a non-resident page is the trivial success.
        assert!(pool.delete_page(page_id));
    }

    #[test]
    fn test_deleted_id_is_reclaimed() {
        let (_, pool) = test_pool(2);
        let first = pool.new_page().unwrap().page_id();
        assert!(pool.delete_page(first));
        let next = pool.new_page().unwrap().page_id();
        assert_eq!(next, first);
    }

    #[test]
    fn test_fetch_same_page_shares_frame() {
        let (_, pool) = test_pool(2);
        let page_id = pool.new_page().unwrap().page_id();

        let a = pool.fetch_page_basic(page_id).unwrap();
        let b = pool.fetch_page_basic(page_id).unwrap();
        drop(a);
        // Still pinned by `b`.
        assert!(!pool.delete_page(page_id));
        drop(b);
        assert!(pool.delete_page(page_id));
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let (_, pool) = test_pool(2);
        let page_id = pool.new_page().unwrap().page_id();
        let _guard = pool.fetch_page_basic(page_id).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }
}
