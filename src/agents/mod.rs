pub mod fixer;
pub mod intent_router;
pub mod knowledge;
pub mod language;
pub mod refactor;
pub mod registry;
pub mod validator;

pub use fixer::FixerAgent;
pub use intent_router::IntentRouterAgent;
pub use knowledge::KnowledgeAgent;
pub use language::LanguageAgent;
pub use refactor::RefactorAgent;
pub use registry::AgentRegistry;
pub use validator::ValidatorAgent;

use crate::{
    models::{AgentHealth, AgentRequest, AgentResult, AgentState, AgentType},
    Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// The polymorphic capability set every worker implements.
///
/// Agent types are advisory; routing always goes through `can_handle`.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> String;
    fn agent_type(&self) -> AgentType;
    fn description(&self) -> String;

    async fn can_handle(&self, request: &AgentRequest) -> bool;

    async fn handle(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResult>;

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Self-reported health, polled periodically by the registry.
    async fn health(&self) -> AgentHealth {
        AgentHealth::Healthy
    }
}

/// Registry-side view of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub agent_type: AgentType,
    pub state: AgentState,
    pub health: AgentHealth,
    pub last_activity: chrono::DateTime<chrono::Utc>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// Provider call that observes the request's cancellation token; the HTTP
/// round-trip is abandoned as soon as the token fires.
pub(crate) async fn model_call(
    provider: &crate::provider::ModelClient,
    request: &crate::provider::ModelRequest,
    cancel: &CancellationToken,
) -> Result<crate::provider::ModelResponse> {
    tokio::select! {
        response = provider.send_request(request) => response,
        _ = cancel.cancelled() => Err(crate::AssistError::Cancelled),
    }
}

/// Map a provider response onto an agent result, preserving telemetry and
/// the retryability classification of the failure.
pub(crate) fn result_from_model(
    agent_name: &str,
    response: crate::provider::ModelResponse,
) -> AgentResult {
    if response.success {
        let mut result = AgentResult::success(agent_name, "model request completed");
        result.content = response.content;
        if let Some(tokens) = response.tokens_used {
            result
                .metadata
                .insert("tokens_used".to_string(), serde_json::json!(tokens));
        }
        result.metadata.insert(
            "provider_latency_ms".to_string(),
            serde_json::json!(response.processing_time_ms),
        );
        result
    } else {
        let kind = response
            .error_kind()
            .unwrap_or(crate::error::ErrorKind::Internal);
        let message = response
            .error
            .unwrap_or_else(|| "model request failed".to_string());
        AgentResult::failure(
            agent_name,
            message.clone(),
            Some(crate::models::ErrorInfo::new(kind, message)),
        )
    }
}
