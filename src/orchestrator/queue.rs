//! Multi-priority FIFO task queue with blocking dequeue.
//!
//! Four buckets, one per [`Priority`]. Dequeue always drains the highest
//! non-empty bucket, FIFO within a bucket. Waiters are woken in FIFO order
//! as items arrive; dequeue honors cooperative cancellation.

use crate::{
    events::{EventBus, SystemEvent},
    models::{AgentRequest, Priority},
    AssistError, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct QueueItem {
    request: AgentRequest,
    priority: Priority,
    enqueued_at: Instant,
}

#[derive(Debug, Default)]
struct QueueInner {
    buckets: [VecDeque<QueueItem>; 4],
    total_enqueued: u64,
    total_dequeued: u64,
    enqueued_by_priority: [u64; 4],
    total_wait: Duration,
    // Dequeue timestamps inside the rolling throughput window.
    recent_dequeues: VecDeque<Instant>,
}

/// Observable queue counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub depth: usize,
    pub enqueued_by_priority: [u64; 4],
    pub throughput_per_minute: f64,
    pub average_wait_ms: f64,
}

pub struct PriorityTaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    bus: EventBus,
    max_size: usize,
}

impl PriorityTaskQueue {
    pub fn new(max_size: usize, bus: EventBus) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            bus,
            max_size,
        }
    }

    /// Append a request to the bucket for `priority`.
    pub async fn enqueue(&self, request: AgentRequest, priority: Priority) -> Result<()> {
        if request.id.is_nil() || request.prompt.trim().is_empty() {
            return Err(AssistError::InvalidArgument(
                "request must carry a non-nil id and a non-empty prompt".to_string(),
            ));
        }

        {
            let mut inner = self.inner.lock().await;
            let depth: usize = inner.buckets.iter().map(VecDeque::len).sum();
            if depth >= self.max_size {
                return Err(AssistError::ServiceUnavailable(format!(
                    "task queue full (max: {})",
                    self.max_size
                )));
            }

            let request_id = request.id;
            inner.buckets[priority.index()].push_back(QueueItem {
                request,
                priority,
                enqueued_at: Instant::now(),
            });
            inner.total_enqueued += 1;
            inner.enqueued_by_priority[priority.index()] += 1;

            debug!("Request {} enqueued at {:?} (depth: {})", request_id, priority, depth + 1);
            self.bus.publish(SystemEvent::TaskEnqueued {
                request_id,
                priority,
            });
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Remove and return the oldest item of the highest non-empty priority.
    ///
    /// Blocks until an item arrives or `cancel` fires, in which case
    /// `Cancelled` is returned.
    pub async fn dequeue(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<AgentRequest> {
        loop {
            // Register for a wakeup before checking, so an enqueue racing
            // with the check cannot be lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(request) = self.try_dequeue().await {
                return Ok(request);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(AssistError::Cancelled),
            }
        }
    }

    /// Non-blocking dequeue.
    pub async fn try_dequeue(&self) -> Option<AgentRequest> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let bucket = inner.buckets.iter().position(|b| !b.is_empty())?;
        let item = inner.buckets[bucket].pop_front()?;

        let wait = now.duration_since(item.enqueued_at);
        inner.total_dequeued += 1;
        inner.total_wait += wait;
        inner.recent_dequeues.push_back(now);
        Self::prune_window(&mut inner.recent_dequeues, now);

        // More items may remain; pass the wakeup along to the next waiter.
        let more = inner.buckets.iter().any(|b| !b.is_empty());

        self.bus.publish(SystemEvent::TaskDequeued {
            request_id: item.request.id,
            priority: item.priority,
            wait_time_ms: wait.as_millis() as u64,
        });
        drop(inner);

        if more {
            self.notify.notify_one();
        }
        Some(item.request)
    }

    fn prune_window(window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = window.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    pub async fn size(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.buckets.iter().map(VecDeque::len).sum()
    }

    pub async fn stats(&self) -> QueueStats {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Self::prune_window(&mut inner.recent_dequeues, now);

        let depth = inner.buckets.iter().map(VecDeque::len).sum();
        let average_wait_ms = if inner.total_dequeued == 0 {
            0.0
        } else {
            inner.total_wait.as_millis() as f64 / inner.total_dequeued as f64
        };

        QueueStats {
            total_enqueued: inner.total_enqueued,
            total_dequeued: inner.total_dequeued,
            depth,
            enqueued_by_priority: inner.enqueued_by_priority,
            throughput_per_minute: inner.recent_dequeues.len() as f64,
            average_wait_ms,
        }
    }

    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let removed: usize = inner.buckets.iter().map(VecDeque::len).sum();
        for bucket in inner.buckets.iter_mut() {
            bucket.clear();
        }
        debug!("Cleared {} queued requests", removed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn request(prompt: &str) -> AgentRequest {
        AgentRequest::new(prompt, "tester")
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let queue = PriorityTaskQueue::new(10, EventBus::default());
        let cancel = CancellationToken::new();

        let r1 = request("low");
        let r2 = request("critical");
        let r3 = request("high");
        queue.enqueue(r1.clone(), Priority::Low).await.unwrap();
        queue.enqueue(r2.clone(), Priority::Critical).await.unwrap();
        queue.enqueue(r3.clone(), Priority::High).await.unwrap();

        assert_eq!(queue.dequeue(&cancel).await.unwrap().id, r2.id);
        assert_eq!(queue.dequeue(&cancel).await.unwrap().id, r3.id);
        assert_eq!(queue.dequeue(&cancel).await.unwrap().id, r1.id);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = PriorityTaskQueue::new(10, EventBus::default());
        let cancel = CancellationToken::new();

        let ids: Vec<_> = (0..5)
            .map(|i| {
                let r = request(&format!("task {i}"));
                (i, r)
            })
            .collect();
        for (_, r) in &ids {
            queue.enqueue(r.clone(), Priority::Normal).await.unwrap();
        }
        for (_, r) in &ids {
            assert_eq!(queue.dequeue(&cancel).await.unwrap().id, r.id);
        }
    }

    #[tokio::test]
    async fn test_dequeue_blocks_until_enqueue() {
        let queue = std::sync::Arc::new(PriorityTaskQueue::new(10, EventBus::default()));
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let r = request("late arrival");
        queue.enqueue(r.clone(), Priority::Normal).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap().id, r.id);
    }

    #[tokio::test]
    async fn test_dequeue_cancellation() {
        let queue = PriorityTaskQueue::new(10, EventBus::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        match queue.dequeue(&cancel).await {
            Err(AssistError::Cancelled) => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_request() {
        let queue = PriorityTaskQueue::new(10, EventBus::default());
        let empty = request("   ");
        assert!(queue.enqueue(empty, Priority::Normal).await.is_err());
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let queue = PriorityTaskQueue::new(2, EventBus::default());
        queue.enqueue(request("a"), Priority::Normal).await.unwrap();
        queue.enqueue(request("b"), Priority::Normal).await.unwrap();
        assert!(queue.enqueue(request("c"), Priority::Normal).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_track_counts_and_balance() {
        let queue = PriorityTaskQueue::new(10, EventBus::default());
        let cancel = CancellationToken::new();

        for _ in 0..4 {
            queue.enqueue(request("x"), Priority::High).await.unwrap();
        }
        queue.dequeue(&cancel).await.unwrap();
        queue.dequeue(&cancel).await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.total_enqueued, 4);
        assert_eq!(stats.total_dequeued, 2);
        assert_eq!(stats.depth, 2);
        assert_eq!(
            stats.total_enqueued - stats.total_dequeued,
            stats.depth as u64
        );
        assert_eq!(stats.enqueued_by_priority[Priority::High.index()], 4);
        assert!(stats.throughput_per_minute >= 2.0);
    }

    #[tokio::test]
    async fn test_clear_empties_all_buckets() {
        let queue = PriorityTaskQueue::new(10, EventBus::default());
        queue.enqueue(request("a"), Priority::Low).await.unwrap();
        queue.enqueue(request("b"), Priority::Critical).await.unwrap();
        assert_eq!(queue.clear().await, 2);
        assert_eq!(queue.size().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_dequeue_balance() {
        let queue = std::sync::Arc::new(PriorityTaskQueue::new(1000, EventBus::default()));
        let cancel = CancellationToken::new();

        let mut producers = Vec::new();
        for p in 0..4 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..25 {
                    queue
                        .enqueue(request(&format!("p{p}-{i}")), Priority::Normal)
                        .await
                        .unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            let cancel = cancel.clone();
            consumers.push(tokio::spawn(async move {
                let mut count = 0;
                for _ in 0..10 {
                    queue.dequeue(&cancel).await.unwrap();
                    count += 1;
                }
                count
            }));
        }
        let mut dequeued = 0;
        for consumer in consumers {
            dequeued += consumer.await.unwrap();
        }

        let stats = queue.stats().await;
        assert_eq!(dequeued, 40);
        assert_eq!(
            stats.total_enqueued - stats.total_dequeued,
            stats.depth as u64
        );
        assert_eq!(queue.size().await, 60);
    }
}
