//! # oxbow-storage
//!
//! The disk-backed storage core of OxbowDB.
//!
//! This crate implements the two tightly-coupled subsystems at the bottom of
//! the engine:
//!
//! - A [`buffer`] pool that mediates all disk I/O by caching fixed-size pages
//!   in a bounded set of frames, with LRU-K eviction, pin accounting, and
//!   RAII page guards.
//! - A [`hash`] index: a disk-resident extendible hash table with three
//!   levels of indirection (header, directory, bucket) built on the buffer
//!   pool.
//!
//! The [`disk`] module provides the block-device boundary: a `DiskManager`
//! trait with file-backed and in-memory implementations, and a scheduler
//! that serializes page I/O onto a background worker.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod disk;
pub mod hash;
