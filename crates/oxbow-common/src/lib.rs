//! # oxbow-common
//!
//! Common types and constants for OxbowDB.
//!
//! This crate provides the foundational pieces shared across the OxbowDB
//! storage engine:
//!
//! - **Types**: the [`PageId`](types::PageId) identifier newtype
//! - **Constants**: page geometry and engine-wide limits
//!
//! ## Example
//!
//! ```rust
//! use oxbow_common::types::PageId;
//! use oxbow_common::constants::PAGE_SIZE;
//!
//! let page = PageId::new(42);
//! assert!(page.is_valid());
//! assert_eq!(PAGE_SIZE, 4096);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::PageId;
