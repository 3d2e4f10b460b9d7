//! Buffer pool configuration.

use oxbow_common::constants::{DEFAULT_POOL_FRAMES, DEFAULT_REPLACER_K};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of page frames in the buffer pool.
    pub num_frames: usize,
    /// K parameter of the LRU-K replacer.
    pub replacer_k: usize,
}

impl BufferPoolConfig {
    /// Creates a configuration with the specified number of frames and the
    /// default replacer K.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            replacer_k: DEFAULT_REPLACER_K,
        }
    }

    /// Sets the replacer K.
    pub fn with_replacer_k(mut self, k: usize) -> Self {
        self.replacer_k = k;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.num_frames == 0 {
            return Err("num_frames must be > 0");
        }
        if self.replacer_k == 0 {
            return Err("replacer_k must be > 0");
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_FRAMES)
    }
}
