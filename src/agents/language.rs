//! Language-specialist agents (C#, JavaScript/TypeScript, Python).
//!
//! One implementation parameterized by language; capability is decided
//! from the request's file extension, prompt keywords, or attached
//! content. Model work goes through the provider client, syntax work
//! through the code-analysis collaborator.

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
use tracing::debug;

pub struct LanguageAgent {
    name: String,
    agent_type: AgentType,
    language: &'static str,
    keywords: &'static [&'static str],
    extensions: &'static [&'static str],
    provider: Arc<ModelClient>,
    analysis: Arc<dyn CodeAnalysis>,
}

impl LanguageAgent {
    pub fn csharp(provider: Arc<ModelClient>, analysis: Arc<dyn CodeAnalysis>) -> Self {
        Self {
            name: "csharp-agent".to_string(),
            agent_type: AgentType::CSharp,
            language: "csharp",
            keywords: &["c#", "csharp", ".net", "dotnet"],
            extensions: &["cs"],
            provider,
            analysis,
        }
    }

    pub fn javascript(provider: Arc<ModelClient>, analysis: Arc<dyn CodeAnalysis>) -> Self {
        Self {
            name: "javascript-agent".to_string(),
            agent_type: AgentType::JavaScript,
            language: "javascript",
            keywords: &["javascript", "typescript", "node", "js", "ts"],
            extensions: &["js", "jsx", "ts", "tsx"],
            provider,
            analysis,
        }
    }

    pub fn python(provider: Arc<ModelClient>, analysis: Arc<dyn CodeAnalysis>) -> Self {
        Self {
            name: "python-agent".to_string(),
            agent_type: AgentType::Python,
            language: "python",
            keywords: &["python", "pip", "django", "flask"],
            extensions: &["py"],
            provider,
            analysis,
        }
    }

    fn matches_extension(&self, path: &str) -> bool {
        let ext = path.rsplit('.').next().unwrap_or("");
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    fn matches_prompt(&self, prompt: &str) -> bool {
        let prompt = prompt.to_lowercase();
        self.keywords.iter().any(|k| prompt.contains(k))
    }
}

#[async_trait]
impl Agent for LanguageAgent {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    fn description(&self) -> String {
        format!("{} analysis, explanation and code generation", self.language)
    }

    async fn can_handle(&self, request: &AgentRequest) -> bool {
        if request.preferred_agent_type == Some(self.agent_type) {
            return true;
        }
        if let Some(path) = &request.file_path {
            if self.matches_extension(path) {
                return true;
            }
        }
        if self.matches_prompt(&request.prompt) {
            return true;
        }
        if let Some(content) = &request.content {
            let detected = self
                .analysis
                .detect_language(content, request.file_path.as_deref())
                .await;
            if detected == self.language
                || (self.agent_type == AgentType::JavaScript && detected == "typescript")
            {
                return true;
            }
        }
        false
    }

    async fn handle(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResult> {
        let mut prompt = String::new();
        prompt.push_str(&request.prompt);

        if let Some(content) = &request.content {
            let issues = self
                .analysis
                .analyze_code(content, self.language)
                .await
                .unwrap_or_default();
            if !issues.is_empty() {
                debug!(
                    "{} found {} static issues to mention",
                    self.name,
                    issues.len()
                );
                prompt.push_str("\n\nStatic analysis flagged:\n");
                for issue in issues.iter().take(10) {
                    prompt.push_str(&format!(
                        "- [{}] {} (line {})\n",
                        issue.category,
                        issue.message,
                        issue.line.unwrap_or(0)
                    ));
                }
            }
            prompt.push_str("\n\nCode:\n");
            prompt.push_str(content);
        }

        let model_request = ModelRequest::new(prompt).with_system(format!(
            "You are an expert {} developer assisting inside an IDE. \
             Be precise and give code where useful.",
            self.language
        ));

        let response = model_call(&self.provider, &model_request, cancel).await?;
        let mut result = result_from_model(&self.name, response);
        result
            .metadata
            .insert("language".to_string(), serde_json::json!(self.language));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::HeuristicAnalyzer;
    use crate::events::EventBus;

    fn agent() -> LanguageAgent {
        LanguageAgent::python(
            Arc::new(ModelClient::new(EventBus::default())),
            Arc::new(HeuristicAnalyzer::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_capability_from_extension_and_keywords() {
        let agent = agent();

        let by_path = AgentRequest::new("review this", "u").with_file_path("scripts/etl.py");
        assert!(agent.can_handle(&by_path).await);

        let by_prompt = AgentRequest::new("write a python scraper", "u");
        assert!(agent.can_handle(&by_prompt).await);

        let unrelated = AgentRequest::new("review this", "u").with_file_path("Program.cs");
        assert!(!agent.can_handle(&unrelated).await);
    }

    #[tokio::test]
    async fn test_capability_from_content_detection() {
        let agent = agent();
        let request =
            AgentRequest::new("anything odd", "u").with_content("def main():\n    return 1\n");
        assert!(agent.can_handle(&request).await);
    }

    #[tokio::test]
    async fn test_preferred_type_short_circuits() {
        let agent = agent();
        let request = AgentRequest::new("vague", "u").with_preferred_type(AgentType::Python);
        assert!(agent.can_handle(&request).await);
    }

    #[tokio::test]
    async fn test_handle_without_active_model_reports_unavailable() {
        let agent = agent();
        let request = AgentRequest::new("write a python scraper", "u");
        let err = agent
            .handle(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.kind(),
            crate::error::ErrorKind::ServiceUnavailable
        );
    }
}
