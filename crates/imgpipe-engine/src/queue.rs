//! Bounded, priority-ordered operation queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use imgpipe_core::Priority;

type Work = Box<dyn FnOnce() + Send>;

/// A handle to one submitted queue item, letting the caller cancel it
/// before it starts or update its priority while it waits.
#[derive(Clone)]
pub struct QueueItemHandle {
    priority: Arc<AtomicU8>,
    cancelled: Arc<AtomicBool>,
}

impl QueueItemHandle {
    /// Cancel this item. If it has not yet started, [`BoundedOperationQueue::dispatch_ready`]
    /// will skip it instead of running it. Has no effect on an item that
    /// already started — the queue only tracks *queued* work.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Update this item's dispatch priority. Only affects ordering if the
    /// item has not yet started.
    pub fn set_priority(&self, priority: Priority) {
        self.priority.store(priority as u8, Ordering::Relaxed);
    }
}

struct QueuedItem {
    priority: Arc<AtomicU8>,
    cancelled: Arc<AtomicBool>,
    seq: u64,
    work: Work,
}

/// Caps concurrent in-flight operations at `capacity`, dispatching the
/// highest-priority queued item first (ties broken by submission order).
///
/// The queue itself holds no lock: it is only ever touched from the serial
/// orchestrator context, so plain interior state suffices.
pub struct BoundedOperationQueue {
    capacity: usize,
    running: usize,
    items: Vec<QueuedItem>,
    next_seq: u64,
}

impl BoundedOperationQueue {
    /// Create a queue capping concurrency at `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            running: 0,
            items: Vec::new(),
            next_seq: 0,
        }
    }

    /// Submit one unit of work at the given priority, returning a handle to
    /// cancel or reprioritize it before it starts.
    pub fn submit(&mut self, priority: Priority, work: Work) -> QueueItemHandle {
        let priority_cell = Arc::new(AtomicU8::new(priority as u8));
        let cancelled = Arc::new(AtomicBool::new(false));
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(QueuedItem {
            priority: Arc::clone(&priority_cell),
            cancelled: Arc::clone(&cancelled),
            seq,
            work,
        });
        QueueItemHandle {
            priority: priority_cell,
            cancelled,
        }
    }

    /// Mark one running slot as freed. Call once per item that previously
    /// started via [`dispatch_ready`](Self::dispatch_ready).
    pub fn finish(&mut self) {
        self.running = self.running.saturating_sub(1);
    }

    /// Pop and return as many ready work items as current capacity allows,
    /// highest priority first, dropping any that were cancelled while
    /// queued. A cancelled item never runs.
    pub fn dispatch_ready(&mut self) -> Vec<Work> {
        self.items.retain(|item| !item.cancelled.load(Ordering::Relaxed));
        self.items.sort_by(|a, b| {
            let pa = a.priority.load(Ordering::Relaxed);
            let pb = b.priority.load(Ordering::Relaxed);
            pb.cmp(&pa).then(a.seq.cmp(&b.seq))
        });

        let mut ready = Vec::new();
        while self.running < self.capacity && !self.items.is_empty() {
            let item = self.items.remove(0);
            self.running += 1;
            ready.push(item.work);
        }
        ready
    }

    /// Number of items currently running.
    pub fn running_count(&self) -> usize {
        self.running
    }

    /// Number of items still queued (not yet dispatched).
    pub fn queued_count(&self) -> usize {
        self.items.len()
    }
}
