//! Observational progress counters for a running job.
//! Publishing never blocks: observers read the latest snapshot from a watch channel.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::trace;

/// Point-in-time view of job progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl ProgressSnapshot {
    pub fn done(&self) -> usize {
        self.completed + self.failed
    }

    /// Whole percentage of units that reached a final outcome.
    pub fn percent(&self) -> usize {
        if self.total == 0 {
            return 100;
        }
        self.done() * 100 / self.total
    }
}

/// Counters of one job plus the channel that broadcasts them.
#[derive(Debug)]
pub struct ProgressTracker {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicBool,
    tx: watch::Sender<ProgressSnapshot>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ProgressSnapshot::default());
        Self {
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            tx,
        }
    }

    /// Reset the counters for a job with `total` units.
    pub fn start(&self, total: usize) {
        trace!("ProgressTracker::start total={}", total);
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        self.publish();
    }

    /// Record the outcome of a finished batch: `ok` units translated and
    /// `failed` units given up on.
    pub fn record(&self, ok: usize, failed: usize) {
        if ok > 0 {
            self.completed.fetch_add(ok, Ordering::SeqCst);
        }
        if failed > 0 {
            self.failed.fetch_add(failed, Ordering::SeqCst);
        }
        self.publish();
    }

    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }

    /// Receive every snapshot published from now on; slow receivers only
    /// ever see the newest value.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    fn publish(&self) {
        // Counters are read under the channel lock so published values never go backwards.
        self.tx.send_modify(|current| *current = self.snapshot());
    }
}
