//! Per-subscriber mailbox with drop-oldest overflow.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::Notify;

use super::events::BusEvent;
use super::{BusInner, SubscriptionToken};

pub(crate) struct EventQueue {
    buffer: Mutex<VecDeque<BusEvent>>,
    notify: Notify,
    /// `None` for queues carrying control topics: never dropped.
    capacity: Option<usize>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl EventQueue {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.map(|c| c.max(1)),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn push(&self, event: BusEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(capacity) = self.capacity {
                while buffer.len() >= capacity {
                    if let Some(oldest) = buffer.pop_front() {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(
                            topic = %oldest.topic(),
                            seq = oldest.seq,
                            dropped,
                            capacity,
                            "subscriber queue full; dropped oldest event"
                        );
                    }
                }
            }
            buffer.push_back(event);
        }
        self.notify.notify_one();
    }

    pub(crate) fn try_pop(&self) -> Option<BusEvent> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub(crate) async fn pop(&self) -> Option<BusEvent> {
        loop {
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Pull-style subscription.
///
/// Events queue up until [`recv`](Self::recv) is called; on overflow the
/// oldest non-control event is dropped. Dropping the receiver unsubscribes.
pub struct EventReceiver {
    pub(crate) token: SubscriptionToken,
    pub(crate) queue: Arc<EventQueue>,
    pub(crate) bus: Weak<BusInner>,
}

impl EventReceiver {
    pub fn token(&self) -> SubscriptionToken {
        self.token
    }

    /// Next event; `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.queue.pop().await
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        self.queue.try_pop()
    }

    /// Events discarded because this subscriber fell behind.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped()
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.token);
        }
        self.queue.close();
    }
}

impl std::fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReceiver")
            .field("token", &self.token)
            .field("dropped", &self.queue.dropped())
            .finish()
    }
}
