//! Refactoring agent.

use super::{model_call, result_from_model, Agent};
use crate::{
    analysis::CodeAnalysis,
    models::{AgentRequest, AgentResult, AgentType},
    provider::{ModelClient, ModelRequest},
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const REFACTOR_KEYWORDS: &[&str] = &["refactor", "clean up", "cleanup", "simplify", "restructure"];

pub struct RefactorAgent {
    provider: Arc<ModelClient>,
    analysis: Arc<dyn CodeAnalysis>,
}

impl RefactorAgent {
    pub fn new(provider: Arc<ModelClient>, analysis: Arc<dyn CodeAnalysis>) -> Self {
        Self { provider, analysis }
    }
}

#[async_trait]
impl Agent for RefactorAgent {
    fn name(&self) -> String {
        "refactor-agent".to_string()
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Refactor
    }

    fn description(&self) -> String {
        "behavior-preserving restructuring of existing code".to_string()
    }

    async fn can_handle(&self, request: &AgentRequest) -> bool {
        if request.preferred_agent_type == Some(AgentType::Refactor) {
            return true;
        }
        let prompt = request.prompt.to_lowercase();
        REFACTOR_KEYWORDS.iter().any(|k| prompt.contains(k))
    }

    async fn handle(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResult> {
        let mut prompt = format!("Refactoring goal: {}\n", request.prompt);

        if let Some(content) = &request.content {
            let language = self
                .analysis
                .detect_language(content, request.file_path.as_deref())
                .await;
            prompt.push_str(&format!("\nCurrent {language} code:\n{content}\n"));
        }

        prompt.push_str(
            "\nRewrite the code preserving behavior. Call out every semantic \
             change you could not avoid.",
        );

        let model_request = ModelRequest::new(prompt)
            .with_system("You are a refactoring specialist. Keep public interfaces stable.");
        let response = model_call(&self.provider, &model_request, cancel).await?;
        Ok(result_from_model(&self.name(), response))
    }
}
