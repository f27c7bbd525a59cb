//! Multi-step workflow collaborator boundary.

use crate::models::AgentRequest;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub message: String,
    pub content: Option<String>,
    pub steps_completed: u32,
}

/// Executes multi-step plans on behalf of the orchestrator. Requests opt in
/// via the `UseWorkflow` context flag or a multi-step prompt marker.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn execute_workflow(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<WorkflowResult>;
}
