//! Worker pool streaming training batches into a bounded queue.

use crate::dataset::ImageDataset;
use crate::types::{DatasetBatch, DatasetError, DatasetResult};
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A small fixed pool of worker threads, each independently pulling
/// batches via `get_train_batch` and pushing them into a bounded channel.
/// Workers run until the feed is explicitly stopped; there is no timeout
/// or per-batch cancellation. An I/O failure is forwarded once and ends
/// that worker.
pub struct BatchFeed {
    receiver: Receiver<DatasetResult<DatasetBatch>>,
    handles: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl BatchFeed {
    pub fn start(dataset: Arc<ImageDataset>, workers: usize, queue_size: usize) -> Self {
        let (tx, rx) = bounded(queue_size.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(workers.max(1));
        for worker in 0..workers.max(1) {
            let dataset = dataset.clone();
            let tx = tx.clone();
            let stop = stop.clone();
            handles.push(std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let batch = dataset.get_train_batch();
                    let failed = batch.is_err();
                    if failed {
                        eprintln!("[feed] worker {worker} batch error, stopping");
                    }
                    if tx.send(batch).is_err() || failed {
                        break;
                    }
                }
            }));
        }
        BatchFeed {
            receiver: rx,
            handles,
            stop,
        }
    }

    /// Blocks for the next batch. A closed channel (all workers gone)
    /// surfaces as an error.
    pub fn next(&self) -> DatasetResult<DatasetBatch> {
        match self.receiver.recv() {
            Ok(batch) => batch,
            Err(_) => Err(DatasetError::Worker("batch queue closed".into())),
        }
    }

    /// Signals workers to stop, drains the queue, and joins the pool.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        // Unblock workers waiting on a full queue.
        drop(self.receiver);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}
