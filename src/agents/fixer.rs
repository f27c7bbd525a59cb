//! Bug-fix agent.

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

const FIX_KEYWORDS: &[&str] = &["fix", "bug", "broken", "crash", "error", "exception", "fails"];

pub struct FixerAgent {
    provider: Arc<ModelClient>,
    analysis: Arc<dyn CodeAnalysis>,
}

impl FixerAgent {
    pub fn new(provider: Arc<ModelClient>, analysis: Arc<dyn CodeAnalysis>) -> Self {
        Self { provider, analysis }
    }
}

#[async_trait]
impl Agent for FixerAgent {
    fn name(&self) -> String {
        "fixer-agent".to_string()
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Fixer
    }

    fn description(&self) -> String {
        "diagnoses failures and proposes minimal fixes".to_string()
    }

    async fn can_handle(&self, request: &AgentRequest) -> bool {
        if request.preferred_agent_type == Some(AgentType::Fixer) {
            return true;
        }
        if request
            .context
            .get("RequestType")
            .and_then(|v| v.as_str())
            .is_some_and(|t| t.eq_ignore_ascii_case("fix"))
        {
            return true;
        }
        let prompt = request.prompt.to_lowercase();
        FIX_KEYWORDS.iter().any(|k| prompt.contains(k))
    }

    async fn handle(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResult> {
        let mut prompt = format!("Problem report: {}\n", request.prompt);

        if let Some(content) = &request.content {
            let language = self
                .analysis
                .detect_language(content, request.file_path.as_deref())
                .await;
            let issues = self
                .analysis
                .analyze_code(content, &language)
                .await
                .unwrap_or_default();

            if !issues.is_empty() {
                prompt.push_str("\nKnown static findings:\n");
                for issue in issues.iter().take(10) {
                    prompt.push_str(&format!("- {} ({})\n", issue.message, issue.category));
                }
            }
            prompt.push_str(&format!("\nAffected {language} code:\n{content}\n"));
        }

        prompt.push_str(
            "\nProduce the smallest change that fixes the problem, \
             with a one-sentence explanation of the root cause.",
        );

        let model_request = ModelRequest::new(prompt)
            .with_system("You are a debugging specialist. Prefer minimal, targeted patches.");
        let response = model_call(&self.provider, &model_request, cancel).await?;
        Ok(result_from_model(&self.name(), response))
    }
}
