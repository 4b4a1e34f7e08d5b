//! Single-slot, latest-value-wins signal cell.
//!
//! `offer` never blocks: a value still waiting to be taken is replaced, so a
//! slow consumer sees the most recent state instead of a backlog.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;

pub struct Mailbox<T> {
    slot: ArrayQueue<T>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: ArrayQueue::new(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Publish `value`, replacing any pending one. Returns `false` if the
    /// mailbox is closed.
    pub fn offer(&self, value: T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let _ = self.slot.force_push(value);
        self.notify.notify_one();
        true
    }

    /// Take the pending value, if any.
    pub fn try_take(&self) -> Option<T> {
        self.slot.pop()
    }

    /// Wait for a value. Returns `None` once the mailbox is closed and
    /// drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            if let Some(v) = self.slot.pop() {
                return Some(v);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting values and wake any waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
