//! Content-validation agent.
//!
//! Runs the same `ContentPolicy` the orchestrator applies at ingress, so a
//! request rejected there and an explicit validation request agree on the
//! verdict. Deterministic; needs no model.

use super::Agent;
use crate::{
    models::{AgentRequest, AgentResult, AgentType},
    validation::ContentPolicy,
    Result,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

const VALIDATE_KEYWORDS: &[&str] = &["validate", "check this", "is this safe", "sanitize"];

pub struct ValidatorAgent {
    policy: ContentPolicy,
}

impl ValidatorAgent {
    pub fn new() -> Result<Self> {
        Ok(Self {
            policy: ContentPolicy::new()?,
        })
    }
}

#[async_trait]
impl Agent for ValidatorAgent {
    fn name(&self) -> String {
        "validator-agent".to_string()
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Validator
    }

    fn description(&self) -> String {
        "screens content against the shared ingress policy".to_string()
    }

    async fn can_handle(&self, request: &AgentRequest) -> bool {
        if request.preferred_agent_type == Some(AgentType::Validator) {
            return true;
        }
        let prompt = request.prompt.to_lowercase();
        VALIDATE_KEYWORDS.iter().any(|k| prompt.contains(k))
    }

    async fn handle(
        &self,
        request: &AgentRequest,
        _cancel: &CancellationToken,
    ) -> Result<AgentResult> {
        let subject = request.content.as_deref().unwrap_or(&request.prompt);

        let mut violations = Vec::new();
        if let Err(e) = self.policy.sanitize_prompt(subject) {
            violations.push(e.to_string());
        }
        for (key, value) in &request.context {
            if let Err(e) = self.policy.validate_context_key(key) {
                violations.push(format!("context key '{key}': {e}"));
            }
            if let Err(e) = self.policy.validate_context_value(value) {
                violations.push(format!("context value '{key}': {e}"));
            }
        }

        let valid = violations.is_empty();
        let message = if valid {
            "content passed validation".to_string()
        } else {
            format!("content failed validation with {} finding(s)", violations.len())
        };

        let mut result = AgentResult::success(self.name(), message);
        result.content = Some(if valid {
            "No policy violations found.".to_string()
        } else {
            violations.join("\n")
        });
        result
            .metadata
            .insert("valid".to_string(), serde_json::json!(valid));
        result.metadata.insert(
            "violation_count".to_string(),
            serde_json::json!(violations.len()),
        );
        Ok(result)
    }
}
