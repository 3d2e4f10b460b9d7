//! Disk request scheduler.
//!
//! The scheduler serializes page I/O onto a single background worker thread
//! draining a FIFO queue. Requests for the same page id therefore complete
//! in submission order; ordering between different page ids is an artifact
//! of the single queue and not part of the contract.
//!
//! A request moves an owned page buffer into the queue; the buffer comes
//! back through the request's [`Promise`] once the I/O has logically taken
//! effect (a read returns the buffer filled, a write returns it unchanged).
//! Callers block on the paired [`Completion`] before proceeding - the
//! buffer pool treats all I/O as synchronous from its own perspective.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use oxbow_common::types::PageId;

use super::error::{DiskError, DiskResult};
use super::manager::DiskManager;

/// The payload a completed request hands back: the owned page buffer.
pub type PageData = Box<[u8]>;

/// The fulfilling half of a one-shot I/O completion.
///
/// Travels inside a [`DiskRequest`]; the worker calls
/// [`fulfill`](Promise::fulfill) exactly once after performing the I/O.
pub struct Promise {
    tx: Sender<DiskResult<PageData>>,
}

impl Promise {
    /// Completes the request, waking the thread blocked on the paired
    /// [`Completion`]. A vanished waiter is ignored.
    pub fn fulfill(self, result: DiskResult<PageData>) {
        let _ = self.tx.send(result);
    }
}

/// The waiting half of a one-shot I/O completion.
pub struct Completion {
    rx: Receiver<DiskResult<PageData>>,
}

impl Completion {
    /// Blocks until the request has been processed and returns its buffer.
    pub fn wait(self) -> DiskResult<PageData> {
        self.rx.recv().unwrap_or(Err(DiskError::WorkerGone))
    }
}

/// A single read or write request for one page.
pub struct DiskRequest {
    /// `true` for a write, `false` for a read.
    pub is_write: bool,
    /// The page buffer: written from for writes, read into for reads.
    /// Must be exactly one page long.
    pub data: PageData,
    /// Target page.
    pub page_id: PageId,
    /// Fulfilled by the worker once the I/O has taken effect.
    pub promise: Promise,
}

/// Serializes disk requests onto a background worker.
///
/// Dropping the scheduler closes the queue, drains the requests already
/// submitted, and joins the worker.
pub struct DiskScheduler {
    queue: Option<Sender<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawns the worker thread for the given device.
    pub fn new(disk: Arc<dyn DiskManager>) -> Self {
        let (tx, rx) = mpsc::channel::<DiskRequest>();
        let worker = thread::Builder::new()
            .name("oxbow-disk-io".to_string())
            .spawn(move || Self::worker_loop(&*disk, &rx))
            .expect("failed to spawn disk scheduler worker");
        Self {
            queue: Some(tx),
            worker: Some(worker),
        }
    }

    /// Creates a linked promise/completion pair for one request.
    pub fn create_promise() -> (Promise, Completion) {
        let (tx, rx) = mpsc::channel();
        (Promise { tx }, Completion { rx })
    }

    /// Enqueues a request for the worker.
    pub fn schedule(&self, request: DiskRequest) {
        let queue = self.queue.as_ref().expect("scheduler queue closed");
        if let Err(mpsc::SendError(request)) = queue.send(request) {
            request.promise.fulfill(Err(DiskError::WorkerGone));
        }
    }

    fn worker_loop(disk: &dyn DiskManager, queue: &Receiver<DiskRequest>) {
        while let Ok(request) = queue.recv() {
            let DiskRequest {
                is_write,
                mut data,
                page_id,
                promise,
            } = request;
            let result = if is_write {
                disk.write_page(page_id, &data)
            } else {
                disk.read_page(page_id, &mut data)
            };
            promise.fulfill(result.map(|()| data));
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain in-flight requests and exit.
        drop(self.queue.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::manager::MemoryDiskManager;
    use oxbow_common::constants::PAGE_SIZE;

    fn zeroed_page() -> PageData {
        vec![0u8; PAGE_SIZE].into_boxed_slice()
    }

    #[test]
    fn test_write_then_read() {
        let disk = Arc::new(MemoryDiskManager::new());
        let scheduler = DiskScheduler::new(disk);

        let mut page = zeroed_page();
        page[0..4].copy_from_slice(&[9, 8, 7, 6]);

        let (promise, completion) = DiskScheduler::create_promise();
        scheduler.schedule(DiskRequest {
            is_write: true,
            data: page,
            page_id: PageId::new(0),
            promise,
        });
        completion.wait().unwrap();

        let (promise, completion) = DiskScheduler::create_promise();
        scheduler.schedule(DiskRequest {
            is_write: false,
            data: zeroed_page(),
            page_id: PageId::new(0),
            promise,
        });
        let read_back = completion.wait().unwrap();
        assert_eq!(&read_back[0..4], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_per_page_submission_order() {
        let disk = Arc::new(MemoryDiskManager::new());
        let scheduler = DiskScheduler::new(Arc::clone(&disk) as Arc<dyn DiskManager>);

        // Queue several writes to the same page without waiting in between;
        // the last submitted value must win.
        let mut completions = Vec::new();
        for value in 0u8..8 {
            let mut page = zeroed_page();
            page[0] = value;
            let (promise, completion) = DiskScheduler::create_promise();
            scheduler.schedule(DiskRequest {
                is_write: true,
                data: page,
                page_id: PageId::new(5),
                promise,
            });
            completions.push(completion);
        }
        for completion in completions {
            completion.wait().unwrap();
        }

        let contents = disk.page_contents(PageId::new(5)).unwrap();
        assert_eq!(contents[0], 7);
        assert_eq!(disk.write_count(PageId::new(5)), 8);
    }

    #[test]
    fn test_drop_drains_queue() {
        let disk = Arc::new(MemoryDiskManager::new());
        let scheduler = DiskScheduler::new(Arc::clone(&disk) as Arc<dyn DiskManager>);

        let (promise, completion) = DiskScheduler::create_promise();
        let mut page = zeroed_page();
        page[0] = 42;
        scheduler.schedule(DiskRequest {
            is_write: true,
            data: page,
            page_id: PageId::new(1),
            promise,
        });
        drop(scheduler);

        // The in-flight write completed before the worker exited.
        assert_eq!(completion.wait().unwrap()[0], 42);
        assert_eq!(disk.write_count(PageId::new(1)), 1);
    }
}
