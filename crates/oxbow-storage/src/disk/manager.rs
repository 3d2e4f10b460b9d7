//! Block device implementations.
//!
//! The buffer pool talks to storage through the [`DiskManager`] trait: a
//! device that accepts read/write requests for page-sized blocks addressed
//! by [`PageId`]. Two implementations are provided:
//!
//! - [`FileDiskManager`]: positioned I/O on a single data file, pages stored
//!   at `page_id * PAGE_SIZE` offsets.
//! - [`MemoryDiskManager`]: a hash map of pages, used by tests. It counts
//!   writes per page so tests can assert exact write-back behavior.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use oxbow_common::constants::PAGE_SIZE;
use oxbow_common::types::PageId;
use parking_lot::Mutex;

use super::error::{DiskError, DiskResult};

/// A block device that reads and writes page-sized blocks.
///
/// Implementations must be safe to share across threads; the disk scheduler
/// calls them from its worker thread while other threads may be creating
/// further requests.
pub trait DiskManager: Send + Sync {
    /// Reads the page `page_id` into `buf`.
    ///
    /// `buf` must be exactly [`PAGE_SIZE`] bytes. Reading a page that was
    /// never written yields zeroed bytes.
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> DiskResult<()>;

    /// Writes `data` as the new contents of page `page_id`.
    ///
    /// `data` must be exactly [`PAGE_SIZE`] bytes. After this returns, a
    /// subsequent read of the same page observes the written bytes.
    fn write_page(&self, page_id: PageId, data: &[u8]) -> DiskResult<()>;
}

fn check_request(page_id: PageId, len: usize) -> DiskResult<()> {
    if !page_id.is_valid() {
        return Err(DiskError::InvalidPageId);
    }
    if len != PAGE_SIZE {
        return Err(DiskError::BadBufferSize {
            expected: PAGE_SIZE,
            actual: len,
        });
    }
    Ok(())
}

/// File-backed block device.
///
/// Pages live at fixed offsets in one data file. Reads past the current end
/// of file return zeroed pages, so freshly allocated page ids can be read
/// back before their first write.
pub struct FileDiskManager {
    file: Mutex<File>,
}

impl FileDiskManager {
    /// Opens (or creates) the data file at `path`.
    pub fn open(path: impl AsRef<Path>) -> DiskResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Flushes file contents to the OS.
    pub fn sync(&self) -> DiskResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    #[inline]
    fn offset_of(page_id: PageId) -> u64 {
        u64::from(page_id.as_u32()) * PAGE_SIZE as u64
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> DiskResult<()> {
        check_request(page_id, buf.len())?;
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        let offset = Self::offset_of(page_id);
        if offset >= len {
            buf.fill(0);
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        // The tail page of a short file reads as zero-padded.
        let available = ((len - offset) as usize).min(PAGE_SIZE);
        file.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> DiskResult<()> {
        check_request(page_id, data.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }
}

/// In-memory block device for tests.
///
/// Tracks how many times each page has been written, which lets tests pin
/// down the buffer pool's write-back behavior exactly (e.g. "evicting a
/// dirty page issues one write").
#[derive(Default)]
pub struct MemoryDiskManager {
    pages: Mutex<HashMap<PageId, Box<[u8]>>>,
    write_counts: Mutex<HashMap<PageId, u64>>,
}

impl MemoryDiskManager {
    /// Creates an empty in-memory device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes issued against `page_id` so far.
    pub fn write_count(&self, page_id: PageId) -> u64 {
        self.write_counts.lock().get(&page_id).copied().unwrap_or(0)
    }

    /// Total writes issued against the device.
    pub fn total_writes(&self) -> u64 {
        self.write_counts.lock().values().sum()
    }

    /// Returns a copy of the stored contents of `page_id`, if any write
    /// ever reached the device.
    pub fn page_contents(&self, page_id: PageId) -> Option<Box<[u8]>> {
        self.pages.lock().get(&page_id).cloned()
    }
}

impl DiskManager for MemoryDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> DiskResult<()> {
        check_request(page_id, buf.len())?;
        match self.pages.lock().get(&page_id) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> DiskResult<()> {
        check_request(page_id, data.len())?;
        self.pages.lock().insert(page_id, data.into());
        *self.write_counts.lock().entry(page_id).or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_round_trip() {
        let disk = MemoryDiskManager::new();
        let mut page = vec![0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&[1, 2, 3, 4]);

        disk.write_page(PageId::new(3), &page).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        disk.read_page(PageId::new(3), &mut out).unwrap();
        assert_eq!(out, page);
        assert_eq!(disk.write_count(PageId::new(3)), 1);
    }

    #[test]
    fn test_memory_unwritten_page_reads_zero() {
        let disk = MemoryDiskManager::new();
        let mut out = vec![0xFFu8; PAGE_SIZE];
        disk.read_page(PageId::new(9), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bad_buffer_size() {
        let disk = MemoryDiskManager::new();
        let mut small = vec![0u8; 16];
        assert!(matches!(
            disk.read_page(PageId::new(0), &mut small),
            Err(DiskError::BadBufferSize { .. })
        ));
    }

    #[test]
    fn test_invalid_page_id_rejected() {
        let disk = MemoryDiskManager::new();
        let page = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            disk.write_page(PageId::INVALID, &page),
            Err(DiskError::InvalidPageId)
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FileDiskManager::open(dir.path().join("data.db")).unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        page[100] = 0xAB;
        disk.write_page(PageId::new(2), &page).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        disk.read_page(PageId::new(2), &mut out).unwrap();
        assert_eq!(out, page);

        // Page 0 was never written; the file has a hole there.
        disk.read_page(PageId::new(0), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_file_read_past_eof() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FileDiskManager::open(dir.path().join("data.db")).unwrap();

        let mut out = vec![0xFFu8; PAGE_SIZE];
        disk.read_page(PageId::new(40), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }
}
