//! LRU-K replacement policy for the buffer pool.
//!
//! LRU-K evicts the frame whose K-th most recent access lies furthest in
//! the past, which distinguishes frames with a genuine re-reference pattern
//! from frames touched once by a scan. Frames with fewer than K recorded
//! accesses have a conceptually infinite K-distance and are evicted first,
//! oldest first (classical LRU over the under-filled set).
//!
//! Time is a logical clock that ticks on every recorded access; no wall
//! clock is involved.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use thiserror::Error;

use super::frame::FrameId;

/// Result type for replacer operations.
pub type ReplacerResult<T> = Result<T, ReplacerError>;

/// Misuse errors raised by the replacer.
///
/// These indicate a caller bug: the buffer pool's own locking makes them
/// unreachable, so it treats them as fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplacerError {
    /// Frame id outside the replacer's capacity.
    #[error("frame {frame_id} is outside replacer capacity {capacity}")]
    InvalidFrame {
        /// The offending frame id.
        frame_id: usize,
        /// Configured capacity.
        capacity: usize,
    },

    /// Frame has no recorded access history.
    #[error("frame {frame_id} has no access history")]
    UnknownFrame {
        /// The offending frame id.
        frame_id: usize,
    },

    /// Frame exists but is pinned (non-evictable).
    #[error("frame {frame_id} is not evictable")]
    NotEvictable {
        /// The offending frame id.
        frame_id: usize,
    },
}

/// Per-frame access history.
struct LruKNode {
    /// Up to K most recent access timestamps, oldest first.
    ///
    /// For a node with full history the front is exactly the K-th most
    /// recent access; for an under-filled node it is the earliest access.
    /// Either way the front is the eviction sort key.
    history: VecDeque<u64>,
    evictable: bool,
}

struct ReplacerState {
    nodes: HashMap<FrameId, LruKNode>,
    /// Logical clock, incremented on every recorded access.
    clock: u64,
    evictable_count: usize,
}

/// LRU-K replacer over a fixed set of frame ids `0..capacity`.
///
/// The replacer has its own mutex so it can be exercised independently in
/// tests; under the buffer pool's mutex its operations are already
/// serialized.
pub struct LruKReplacer {
    capacity: usize,
    k: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a replacer for `capacity` frames with parameter `k`.
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K requires k > 0");
        Self {
            capacity,
            k,
            state: Mutex::new(ReplacerState {
                nodes: HashMap::with_capacity(capacity),
                clock: 0,
                evictable_count: 0,
            }),
        }
    }

    /// Records an access to `frame` at the current logical time.
    ///
    /// A frame seen for the first time gets a fresh node, non-evictable by
    /// default.
    pub fn record_access(&self, frame: FrameId) -> ReplacerResult<()> {
        if frame.index() >= self.capacity {
            return Err(ReplacerError::InvalidFrame {
                frame_id: frame.index(),
                capacity: self.capacity,
            });
        }
        let mut state = self.state.lock();
        state.clock += 1;
        let now = state.clock;
        let node = state.nodes.entry(frame).or_insert_with(|| LruKNode {
            history: VecDeque::new(),
            evictable: false,
        });
        node.history.push_back(now);
        if node.history.len() > self.k {
            node.history.pop_front();
        }
        Ok(())
    }

    /// Marks `frame` evictable or not, adjusting the evictable count.
    pub fn set_evictable(&self, frame: FrameId, evictable: bool) -> ReplacerResult<()> {
        let mut state = self.state.lock();
        let node = state
            .nodes
            .get_mut(&frame)
            .ok_or(ReplacerError::UnknownFrame {
                frame_id: frame.index(),
            })?;
        if node.evictable != evictable {
            node.evictable = evictable;
            if evictable {
                state.evictable_count += 1;
            } else {
                state.evictable_count -= 1;
            }
        }
        Ok(())
    }

    /// Chooses a victim frame, removes its history, and returns it.
    ///
    /// Returns `None` when nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.evictable_count == 0 {
            return None;
        }

        let mut victim: Option<(FrameId, bool, u64)> = None;
        for (&frame, node) in &state.nodes {
            if !node.evictable {
                continue;
            }
            let under_k = node.history.len() < self.k;
            let key = *node
                .history
                .front()
                .expect("a tracked frame always has at least one access");
            let better = match victim {
                None => true,
                // An under-filled node dominates any fully-accessed one.
                Some((_, best_under_k, best_key)) => match (under_k, best_under_k) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => key < best_key,
                },
            };
            if better {
                victim = Some((frame, under_k, key));
            }
        }

        let (frame, _, _) = victim?;
        state.nodes.remove(&frame);
        state.evictable_count -= 1;
        Some(frame)
    }

    /// Drops the history of `frame` entirely.
    ///
    /// Removing a frame the replacer has never seen is a no-op; removing a
    /// non-evictable frame is a caller bug.
    pub fn remove(&self, frame: FrameId) -> ReplacerResult<()> {
        let mut state = self.state.lock();
        let Some(node) = state.nodes.get(&frame) else {
            return Ok(());
        };
        if !node.evictable {
            return Err(ReplacerError::NotEvictable {
                frame_id: frame.index(),
            });
        }
        state.nodes.remove(&frame);
        state.evictable_count -= 1;
        Ok(())
    }

    /// Current number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().evictable_count
    }
}

impl std::fmt::Debug for LruKReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruKReplacer")
            .field("capacity", &self.capacity)
            .field("k", &self.k)
            .field("evictable", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(id: usize) -> FrameId {
        FrameId::new(id)
    }

    #[test]
    fn test_evict_nothing_when_empty() {
        let replacer = LruKReplacer::new(7, 2);
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_new_frames_start_non_evictable() {
        let replacer = LruKReplacer::new(7, 2);
        replacer.record_access(f(1)).unwrap();
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(f(1), true).unwrap();
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(f(1)));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_under_k_frames_evicted_first_lru_order() {
        let replacer = LruKReplacer::new(7, 2);
        // Frame 1 accessed twice (full history), frames 2 and 3 once each.
        replacer.record_access(f(1)).unwrap(); // t=1
        replacer.record_access(f(1)).unwrap(); // t=2
        replacer.record_access(f(2)).unwrap(); // t=3
        replacer.record_access(f(3)).unwrap(); // t=4
        for id in 1..=3 {
            replacer.set_evictable(f(id), true).unwrap();
        }

        // Under-K frames dominate; among them the earliest access wins.
        assert_eq!(replacer.evict(), Some(f(2)));
        assert_eq!(replacer.evict(), Some(f(3)));
        assert_eq!(replacer.evict(), Some(f(1)));
    }

    #[test]
    fn test_largest_k_distance_wins() {
        let replacer = LruKReplacer::new(7, 2);
        // Both frames fully accessed; frame 1's 2nd-most-recent access is
        // older, so its K-distance is larger.
        replacer.record_access(f(1)).unwrap(); // t=1
        replacer.record_access(f(2)).unwrap(); // t=2
        replacer.record_access(f(1)).unwrap(); // t=3
        replacer.record_access(f(2)).unwrap(); // t=4
        replacer.set_evictable(f(1), true).unwrap();
        replacer.set_evictable(f(2), true).unwrap();

        assert_eq!(replacer.evict(), Some(f(1)));
        assert_eq!(replacer.evict(), Some(f(2)));
    }

    #[test]
    fn test_history_is_bounded_by_k() {
        let replacer = LruKReplacer::new(7, 2);
        replacer.record_access(f(1)).unwrap(); // t=1
        replacer.record_access(f(1)).unwrap(); // t=2
        replacer.record_access(f(1)).unwrap(); // t=3, drops t=1
        replacer.record_access(f(2)).unwrap(); // t=4
        replacer.record_access(f(2)).unwrap(); // t=5
        replacer.set_evictable(f(1), true).unwrap();
        replacer.set_evictable(f(2), true).unwrap();

        // K-th most recent: frame 1 -> t=2, frame 2 -> t=4.
        assert_eq!(replacer.evict(), Some(f(1)));
    }

    #[test]
    fn test_set_evictable_unknown_frame() {
        let replacer = LruKReplacer::new(7, 2);
        assert_eq!(
            replacer.set_evictable(f(0), true),
            Err(ReplacerError::UnknownFrame { frame_id: 0 })
        );
    }

    #[test]
    fn test_record_access_out_of_range() {
        let replacer = LruKReplacer::new(7, 2);
        assert_eq!(
            replacer.record_access(f(7)),
            Err(ReplacerError::InvalidFrame {
                frame_id: 7,
                capacity: 7
            })
        );
    }

    #[test]
    fn test_remove() {
        let replacer = LruKReplacer::new(7, 2);
        replacer.record_access(f(1)).unwrap();

        // Removing a pinned frame is a caller bug.
        assert_eq!(
            replacer.remove(f(1)),
            Err(ReplacerError::NotEvictable { frame_id: 1 })
        );

        replacer.set_evictable(f(1), true).unwrap();
        replacer.remove(f(1)).unwrap();
        assert_eq!(replacer.size(), 0);

        // Removing an untracked frame is a no-op.
        replacer.remove(f(4)).unwrap();
    }

    #[test]
    fn test_toggle_does_not_double_count() {
        let replacer = LruKReplacer::new(7, 2);
        replacer.record_access(f(1)).unwrap();
        replacer.set_evictable(f(1), true).unwrap();
        replacer.set_evictable(f(1), true).unwrap();
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(f(1), false).unwrap();
        replacer.set_evictable(f(1), false).unwrap();
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_fresh_under_k_frame_dominates_old_full_frame() {
        let replacer = LruKReplacer::new(7, 2);
        replacer.record_access(f(1)).unwrap(); // t=1
        replacer.record_access(f(1)).unwrap(); // t=2
        replacer.record_access(f(2)).unwrap(); // t=3, single access
        replacer.set_evictable(f(1), true).unwrap();
        replacer.set_evictable(f(2), true).unwrap();

        // Frame 2 has infinite K-distance and goes first even though its
        // only access is the most recent one overall.
        assert_eq!(replacer.evict(), Some(f(2)));
    }
}
