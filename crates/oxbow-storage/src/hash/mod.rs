//! Disk-resident extendible hash index.
//!
//! The index stores fixed-width key/value pairs across three page kinds,
//! all living in the buffer pool:
//!
//! ```text
//!  header ──high bits──► directory ──low bits──► bucket ──scan──► entry
//! ```
//!
//! - The [header](header_page) routes by the high `max_depth` bits of the
//!   hash to one of up to `2^max_depth` directories.
//! - Each [directory](directory_page) routes by the low `global_depth`
//!   bits to a bucket, growing and shrinking as buckets split and merge.
//! - Each [bucket](bucket_page) holds the entries themselves.
//!
//! [`DiskExtendibleHashTable`] ties the levels together with a strict
//! top-down latching discipline.

mod bucket_page;
mod codec;
mod directory_page;
mod header_page;
mod table;

pub use bucket_page::{bucket_capacity, BucketPageMut, BucketPageRef, BUCKET_HEADER_LEN};
pub use codec::FixedCodec;
pub use directory_page::{DirectoryPageMut, DirectoryPageRef};
pub use header_page::{HeaderPageMut, HeaderPageRef};
pub use table::{DefaultKeyHasher, DiskExtendibleHashTable, KeyHasher};
