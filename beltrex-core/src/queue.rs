//! Generic bounded work queue: multi-producer, single-consumer, non-blocking
//! enqueue with drop-on-full, and a worker harness with graceful drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beltrex_model::WorkerStatsSnapshot;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;

#[derive(Debug, Default)]
struct WorkerStats {
    queued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Producer handle for a worker's queue. Cheap to clone.
#[derive(Debug)]
pub struct WorkQueue<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    stats: Arc<WorkerStats>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Non-blocking enqueue. On a full queue the item is dropped and the
    /// `dropped` counter increments.
    pub fn enqueue(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("[{}] queue is full, dropping item", self.name);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("[{}] cannot queue item - worker not running", self.name);
                false
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            queued: self.stats.queued.load(Ordering::Relaxed),
            processed: self.stats.processed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            depth: (self.tx.max_capacity() - self.tx.capacity()) as u64,
        }
    }
}

/// Per-item processing logic run by a [`QueueWorker`].
#[async_trait]
pub trait QueueProcessor: Send + 'static {
    type Item: Send + 'static;

    fn name(&self) -> &'static str;

    async fn process(&mut self, item: Self::Item) -> Result<()>;

    /// Called once after the drain, before the worker task exits.
    async fn finish(&mut self) {}
}

/// Single consumer task bound to a [`WorkQueue`].
///
/// After [`QueueWorker::stop`] returns `true`, the worker task has exited and
/// every remaining item has been drained best-effort.
#[derive(Debug)]
pub struct QueueWorker<T> {
    name: &'static str,
    queue: WorkQueue<T>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl<T: Send + 'static> QueueWorker<T> {
    pub fn spawn<P>(processor: P, capacity: usize) -> Self
    where
        P: QueueProcessor<Item = T>,
    {
        let name = processor.name();
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(WorkerStats::default());
        let queue = WorkQueue {
            name,
            tx,
            stats: Arc::clone(&stats),
        };
        let token = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(processor, rx, stats, token.clone()));
        info!("[{name}] worker started");

        Self {
            name,
            queue,
            token,
            handle,
        }
    }

    /// Producer handle; clone freely across tasks.
    pub fn queue(&self) -> WorkQueue<T> {
        self.queue.clone()
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.queue.stats()
    }

    /// Signal the worker and wait for it to drain and exit.
    pub async fn stop(self, timeout: Duration) -> bool {
        info!("[{}] stopping worker...", self.name);
        self.token.cancel();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(_) => {
                info!("[{}] worker stopped, final stats: {:?}", self.name, self.queue.stats());
                true
            }
            Err(_) => {
                warn!("[{}] worker did not stop within {:?}", self.name, timeout);
                false
            }
        }
    }
}

async fn worker_loop<P>(
    mut processor: P,
    mut rx: mpsc::Receiver<P::Item>,
    stats: Arc<WorkerStats>,
    token: CancellationToken,
) where
    P: QueueProcessor,
{
    let name = processor.name();
    debug!("[{name}] worker waiting for items");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => run_one(&mut processor, item, &stats).await,
                // All producers dropped.
                None => break,
            },
        }
    }

    // Drain remaining items best-effort before exiting.
    let mut remaining = 0usize;
    while let Ok(item) = rx.try_recv() {
        run_one(&mut processor, item, &stats).await;
        remaining += 1;
    }
    if remaining > 0 {
        info!("[{name}] drained {remaining} remaining items on shutdown");
    }

    processor.finish().await;
    debug!("[{name}] worker exited");
}

async fn run_one<P: QueueProcessor>(
    processor: &mut P,
    item: P::Item,
    stats: &WorkerStats,
) {
    match processor.process(item).await {
        Ok(()) => {
            stats.processed.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            error!("[{}] failed to process item: {err}", processor.name());
        }
    }
}
