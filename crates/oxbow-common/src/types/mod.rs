//! Core types for OxbowDB.

mod ids;

pub use ids::PageId;
