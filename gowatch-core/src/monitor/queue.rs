//! Bounded change queue where the latest events win

use crate::monitor::ChangeEvent;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Number of events the watcher keeps pending.
pub const DEFAULT_CAPACITY: usize = 1;

/// Counters describing queue traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<ChangeEvent>,
    closed: bool,
    stats: QueueStats,
}

/// Multi-producer, single-consumer queue of pending changes.
///
/// When full, a push evicts the oldest pending event, so a burst of changes
/// during a long build collapses to the most recent ones. Clones share the
/// same queue.
#[derive(Debug, Clone)]
pub struct ChangeQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    capacity: usize,
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
                stats: QueueStats::default(),
            })),
            notify: Arc::new(Notify::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues an event. Returns false once the queue is closed.
    pub fn push(&self, event: ChangeEvent) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            while inner.items.len() >= self.capacity {
                if let Some(old) = inner.items.pop_front() {
                    trace!("Superseding pending change {:?}", old.path);
                    inner.stats.dropped += 1;
                }
            }
            inner.items.push_back(event);
            inner.stats.pushed += 1;
        }
        self.notify.notify_one();
        true
    }

    /// Waits for the next event. `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<ChangeEvent> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(event) = inner.items.pop_front() {
                    inner.stats.delivered += 1;
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn try_recv(&self) -> Option<ChangeEvent> {
        let mut inner = self.lock();
        let event = inner.items.pop_front();
        if event.is_some() {
            inner.stats.delivered += 1;
        }
        event
    }

    /// Stops accepting events. Pending events can still be received.
    pub fn close(&self) {
        let mut inner = self.lock();
        if !inner.closed {
            debug!("Closing change queue with {} pending", inner.items.len());
            inner.closed = true;
        }
        drop(inner);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ChangeKind;
    use std::path::PathBuf;
    use std::time::Duration;

    fn event(name: &str) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::Updated,
            path: Some(PathBuf::from(name)),
            old_path: None,
            mod_time: None,
        }
    }

    #[test]
    fn test_latest_event_wins() {
        let queue = ChangeQueue::new(1);

        for i in 0..10 {
            queue.push(event(&format!("{}.go", i)));
        }

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_recv().unwrap().path, Some(PathBuf::from("9.go")));
        assert!(queue.try_recv().is_none());
        assert_eq!(queue.stats(), QueueStats { pushed: 10, delivered: 1, dropped: 9 });
    }

    #[test]
    fn test_larger_capacity_keeps_order() {
        let queue = ChangeQueue::new(2);
        queue.push(event("a.go"));
        queue.push(event("b.go"));
        queue.push(event("c.go"));

        assert_eq!(queue.try_recv().unwrap().path, Some(PathBuf::from("b.go")));
        assert_eq!(queue.try_recv().unwrap().path, Some(PathBuf::from("c.go")));
    }

    #[tokio::test]
    async fn test_recv_drains_before_reporting_closed() {
        let queue = ChangeQueue::default();
        queue.push(event("main.go"));
        queue.close();

        assert!(!queue.push(event("late.go")));
        assert_eq!(queue.recv().await.unwrap().path, Some(PathBuf::from("main.go")));
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let queue = ChangeQueue::default();
        let producer = queue.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            producer.push(ChangeEvent::synthetic());
        });

        let received = tokio::time::timeout(Duration::from_secs(5), queue.recv()).await.unwrap();
        assert!(received.unwrap().is_synthetic());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_wakes_on_close() {
        let queue = ChangeQueue::default();
        let closer = queue.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closer.close();
        });

        let received = tokio::time::timeout(Duration::from_secs(5), queue.recv()).await.unwrap();
        assert!(received.is_none());
        assert!(queue.is_closed());
    }
}
