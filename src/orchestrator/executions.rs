//! Governor-internal execution tracking.
//!
//! Every dispatched request gets a `TaskExecution` record for status
//! queries and cancellation. Terminal records are retained for at least
//! five minutes so late status queries still resolve, then reaped by the
//! cleanup loop.

use crate::models::{AgentRequest, AgentResult, Priority};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

#[derive(Clone)]
pub struct TaskExecution {
    pub id: Uuid,
    pub request: AgentRequest,
    pub priority: Priority,
    pub status: ExecutionStatus,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub result: Option<AgentResult>,
    pub cancel: CancellationToken,
    finished_at: Option<Instant>,
}

pub struct ExecutionTracker {
    executions: RwLock<HashMap<Uuid, TaskExecution>>,
    retention: Duration,
}

impl ExecutionTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Record a freshly dispatched request. Returns its cancellation handle.
    pub async fn track(&self, request: AgentRequest, priority: Priority) -> CancellationToken {
        let cancel = CancellationToken::new();
        let execution = TaskExecution {
            id: request.id,
            request,
            priority,
            status: ExecutionStatus::Queued,
            start_time: chrono::Utc::now(),
            end_time: None,
            result: None,
            cancel: cancel.clone(),
            finished_at: None,
        };
        let mut executions = self.executions.write().await;
        executions.insert(execution.id, execution);
        cancel
    }

    pub async fn mark_running(&self, id: Uuid) {
        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(&id) {
            execution.status = ExecutionStatus::Running;
        }
    }

    /// Transition to a terminal state and attach the result.
    pub async fn finish(&self, id: Uuid, status: ExecutionStatus, result: Option<AgentResult>) {
        debug_assert!(status.is_terminal());
        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(&id) {
            execution.status = status;
            execution.end_time = Some(chrono::Utc::now());
            execution.finished_at = Some(Instant::now());
            execution.result = result;
            debug!("Execution {} finished with {:?}", id, status);
        }
    }

    /// Request cancellation of an in-flight execution.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let executions = self.executions.read().await;
        match executions.get(&id) {
            Some(execution) if !execution.status.is_terminal() => {
                execution.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<TaskExecution> {
        self.executions.read().await.get(&id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.executions
            .read()
            .await
            .values()
            .filter(|e| !e.status.is_terminal())
            .count()
    }

    /// Drop terminal records older than the retention window.
    pub async fn cleanup(&self) -> usize {
        let mut executions = self.executions.write().await;
        let before = executions.len();
        let retention = self.retention;
        executions.retain(|_, e| match (e.status.is_terminal(), e.finished_at) {
            (true, Some(finished)) => finished.elapsed() < retention,
            _ => true,
        });
        let removed = before - executions.len();
        if removed > 0 {
            info!("Cleaned up {} finished executions", removed);
        }
        removed
    }

    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracker.cleanup().await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AgentRequest {
        AgentRequest::new("do something", "tester")
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let tracker = ExecutionTracker::new(Duration::from_secs(300));
        let request = request();
        let id = request.id;

        tracker.track(request, Priority::Normal).await;
        assert_eq!(tracker.get(id).await.unwrap().status, ExecutionStatus::Queued);

        tracker.mark_running(id).await;
        assert_eq!(tracker.get(id).await.unwrap().status, ExecutionStatus::Running);

        tracker
            .finish(
                id,
                ExecutionStatus::Completed,
                Some(AgentResult::success("agent", "done")),
            )
            .await;
        let execution = tracker.get(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.end_time.is_some());
        assert!(execution.result.unwrap().success);
    }

    #[tokio::test]
    async fn test_cancel_fires_token_only_while_active() {
        let tracker = ExecutionTracker::new(Duration::from_secs(300));
        let request = request();
        let id = request.id;
        let token = tracker.track(request, Priority::High).await;

        assert!(tracker.cancel(id).await);
        assert!(token.is_cancelled());

        tracker.finish(id, ExecutionStatus::Cancelled, None).await;
        assert!(!tracker.cancel(id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_respects_retention() {
        let tracker = ExecutionTracker::new(Duration::from_secs(300));
        let request = request();
        let id = request.id;
        tracker.track(request, Priority::Normal).await;
        tracker.finish(id, ExecutionStatus::Failed, None).await;

        // Inside the retention window the record survives.
        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(tracker.cleanup().await, 0);
        assert!(tracker.get(id).await.is_some());

        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(tracker.cleanup().await, 1);
        assert!(tracker.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_active_records_survive_cleanup() {
        let tracker = ExecutionTracker::new(Duration::ZERO);
        let request = request();
        let id = request.id;
        tracker.track(request, Priority::Normal).await;

        assert_eq!(tracker.cleanup().await, 0);
        assert!(tracker.get(id).await.is_some());
        assert_eq!(tracker.active_count().await, 1);
    }
}
