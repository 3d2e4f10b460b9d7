//! Block device boundary for OxbowDB.
//!
//! All storage I/O flows through this module:
//!
//! - [`DiskManager`] is the device abstraction: page-sized reads and writes
//!   addressed by page id. [`FileDiskManager`] is the real backend,
//!   [`MemoryDiskManager`] the instrumented test backend.
//! - [`DiskScheduler`] funnels requests onto a background worker and hands
//!   callers a one-shot completion to block on.

mod error;
mod manager;
mod scheduler;

pub use error::{DiskError, DiskResult};
pub use manager::{DiskManager, FileDiskManager, MemoryDiskManager};
pub use scheduler::{Completion, DiskRequest, DiskScheduler, PageData, Promise};
