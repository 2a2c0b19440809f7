use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::warn;

/// Bounded inbound message queue with a drop-oldest overflow policy.
///
/// The read loop pushes decoded JSON objects; a single dispatch task drains
/// them in FIFO order. When the queue is full the oldest message is dropped
/// so the consumer always sees the freshest data the connection produced.
pub struct InboundQueue {
    messages: Mutex<VecDeque<Value>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Push a message, evicting the oldest entry on overflow.
    pub fn push(&self, message: Value) {
        {
            let mut messages = self.messages.lock();
            if messages.len() >= self.capacity {
                messages.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 500 == 0 {
                    warn!(dropped, capacity = self.capacity, "inbound_queue_overflow");
                }
            }
            messages.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Pop the oldest queued message, if any.
    pub fn pop(&self) -> Option<Value> {
        self.messages.lock().pop_front()
    }

    /// Wait until a push occurs. Spurious wakeups are fine; callers loop
    /// around `pop`.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Wake any task blocked in [`wait`](Self::wait).
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fifo_order_preserved() {
        let queue = InboundQueue::new(8);
        queue.push(json!({"seq": 1}));
        queue.push(json!({"seq": 2}));
        assert_eq!(queue.pop(), Some(json!({"seq": 1})));
        assert_eq!(queue.pop(), Some(json!({"seq": 2})));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn overflow_drops_oldest() {
        let queue = InboundQueue::new(3);
        for seq in 0..5 {
            queue.push(json!({ "seq": seq }));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped_count(), 2);
        // Oldest survivors are 2, 3, 4.
        assert_eq!(queue.pop(), Some(json!({"seq": 2})));
        assert_eq!(queue.pop(), Some(json!({"seq": 3})));
        assert_eq!(queue.pop(), Some(json!({"seq": 4})));
    }
}
