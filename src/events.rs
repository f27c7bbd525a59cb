//! Typed pub/sub bus for lifecycle, progress and status events.
//!
//! Publish never blocks. Each subscriber owns a bounded buffer; when a slow
//! subscriber overflows, the oldest events are dropped and counted on that
//! subscriber's stream. Delivery is FIFO within a topic per subscriber; no
//! ordering holds across topics.

use crate::models::{AgentHealth, AgentState, AgentType, Priority};
use crate::scan::Finding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Event topics consumed by the external push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    TaskEnqueued,
    TaskDequeued,
    AgentRegistered,
    AgentUnregistered,
    AgentStatusChanged,
    ActiveModelChanged,
    ServerStatusChanged,
    ScanProgress,
    ScanIssueFound,
    ScanCompleted,
}

impl Topic {
    pub const ALL: [Topic; 10] = [
        Topic::TaskEnqueued,
        Topic::TaskDequeued,
        Topic::AgentRegistered,
        Topic::AgentUnregistered,
        Topic::AgentStatusChanged,
        Topic::ActiveModelChanged,
        Topic::ServerStatusChanged,
        Topic::ScanProgress,
        Topic::ScanIssueFound,
        Topic::ScanCompleted,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemEvent {
    TaskEnqueued {
        request_id: Uuid,
        priority: Priority,
    },
    TaskDequeued {
        request_id: Uuid,
        priority: Priority,
        wait_time_ms: u64,
    },
    AgentRegistered {
        name: String,
        agent_type: AgentType,
    },
    AgentUnregistered {
        name: String,
    },
    AgentStatusChanged {
        name: String,
        previous_state: AgentState,
        new_state: AgentState,
        previous_health: AgentHealth,
        new_health: AgentHealth,
    },
    ActiveModelChanged {
        previous: Option<String>,
        current: String,
    },
    ServerStatusChanged {
        server_id: String,
        connected: bool,
    },
    ScanProgress {
        current: usize,
        total: usize,
        percent: f64,
        eta_ms: u64,
        message: String,
    },
    ScanIssueFound {
        finding: Finding,
        file_path: String,
    },
    ScanCompleted {
        report_id: Uuid,
        success: bool,
        cancelled: bool,
        error: Option<String>,
        duration_ms: u64,
    },
}

impl SystemEvent {
    pub fn topic(&self) -> Topic {
        match self {
            SystemEvent::TaskEnqueued { .. } => Topic::TaskEnqueued,
            SystemEvent::TaskDequeued { .. } => Topic::TaskDequeued,
            SystemEvent::AgentRegistered { .. } => Topic::AgentRegistered,
            SystemEvent::AgentUnregistered { .. } => Topic::AgentUnregistered,
            SystemEvent::AgentStatusChanged { .. } => Topic::AgentStatusChanged,
            SystemEvent::ActiveModelChanged { .. } => Topic::ActiveModelChanged,
            SystemEvent::ServerStatusChanged { .. } => Topic::ServerStatusChanged,
            SystemEvent::ScanProgress { .. } => Topic::ScanProgress,
            SystemEvent::ScanIssueFound { .. } => Topic::ScanIssueFound,
            SystemEvent::ScanCompleted { .. } => Topic::ScanCompleted,
        }
    }
}

/// Per-topic broadcast channels. Cloning the bus is cheap; all clones share
/// the same channels.
#[derive(Debug, Clone)]
pub struct EventBus {
    senders: HashMap<Topic, broadcast::Sender<SystemEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let mut senders = HashMap::new();
        for topic in Topic::ALL {
            let (tx, _) = broadcast::channel(capacity);
            senders.insert(topic, tx);
        }
        Self { senders }
    }

    /// Publish an event to its topic. Never blocks; events published with no
    /// live subscriber are discarded.
    pub fn publish(&self, event: SystemEvent) {
        let topic = event.topic();
        if let Some(sender) = self.senders.get(&topic) {
            let _ = sender.send(event);
        }
    }

    pub fn subscribe(&self, topic: Topic) -> EventStream {
        let rx = self
            .senders
            .get(&topic)
            .expect("all topics are pre-registered")
            .subscribe();
        EventStream { rx, dropped: 0 }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.senders
            .get(&topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::constants::EVENT_BUFFER_CAPACITY)
    }
}

/// One subscriber's view of a topic.
pub struct EventStream {
    rx: broadcast::Receiver<SystemEvent>,
    dropped: u64,
}

impl EventStream {
    /// Receive the next event, skipping over any overflow gap. Returns
    /// `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SystemEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    tracing::debug!("Event subscriber lagged, dropped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used by status endpoints and tests.
    pub fn try_recv(&mut self) -> Option<SystemEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(_) => return None,
            }
        }
    }

    /// Events lost to buffer overflow since subscription.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<SystemEvent>
    where
        F: FnMut(&SystemEvent) -> bool,
    {
        while let Some(event) = self.recv().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueue_event() -> SystemEvent {
        SystemEvent::TaskEnqueued {
            request_id: Uuid::new_v4(),
            priority: Priority::Normal,
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe_fifo() {
        let bus = EventBus::new(8);
        let mut stream = bus.subscribe(Topic::ScanProgress);

        for current in 1..=3usize {
            bus.publish(SystemEvent::ScanProgress {
                current,
                total: 3,
                percent: current as f64 / 3.0 * 100.0,
                eta_ms: 0,
                message: format!("file {current}"),
            });
        }

        for expected in 1..=3usize {
            match stream.recv().await {
                Some(SystemEvent::ScanProgress { current, .. }) => assert_eq!(current, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_topic_isolation() {
        let bus = EventBus::new(8);
        let mut scan_stream = bus.subscribe(Topic::ScanCompleted);

        bus.publish(enqueue_event());
        assert!(scan_stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_and_counts() {
        let bus = EventBus::new(2);
        let mut stream = bus.subscribe(Topic::TaskEnqueued);

        for _ in 0..5 {
            bus.publish(enqueue_event());
        }

        // Two newest survive; three oldest dropped.
        assert!(stream.try_recv().is_some());
        assert!(stream.try_recv().is_some());
        assert!(stream.try_recv().is_none());
        assert_eq!(stream.dropped(), 3);
    }

    #[tokio::test]
    async fn test_wait_for_skips_non_matching_events() {
        let bus = EventBus::new(8);
        let mut stream = bus.subscribe(Topic::ScanProgress);

        for current in 1..=3usize {
            bus.publish(SystemEvent::ScanProgress {
                current,
                total: 3,
                percent: 0.0,
                eta_ms: 0,
                message: String::new(),
            });
        }

        let hit = stream
            .wait_for(|e| matches!(e, SystemEvent::ScanProgress { current: 3, .. }))
            .await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(2);
        bus.publish(enqueue_event());
        assert_eq!(bus.subscriber_count(Topic::TaskEnqueued), 0);
    }
}
