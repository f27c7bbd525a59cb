//! Intent-routing agent.
//!
//! Invoked by the orchestrator ahead of normal candidate selection. Asks
//! the active model to classify the request; when no model answers, a
//! keyword heuristic produces a lower-confidence decision. Never selected
//! as a worker itself.

use super::Agent;
use crate::{
    models::{AgentRequest, AgentResult, AgentType, RoutingDecision},
    provider::{ModelClient, ModelRequest},
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct IntentRouterAgent {
    provider: Arc<ModelClient>,
}

impl IntentRouterAgent {
    pub fn new(provider: Arc<ModelClient>) -> Self {
        Self { provider }
    }

    /// Keyword fallback used when the model is unavailable or returns
    /// something unparseable.
    fn heuristic_decision(request: &AgentRequest) -> RoutingDecision {
        let prompt = request.prompt.to_lowercase();
        let target_agent_type = if prompt.contains("fix") || prompt.contains("bug") {
            Some(AgentType::Fixer)
        } else if prompt.contains("refactor") {
            Some(AgentType::Refactor)
        } else if prompt.contains("validate") {
            Some(AgentType::Validator)
        } else if prompt.contains("python") {
            Some(AgentType::Python)
        } else if prompt.contains("javascript") || prompt.contains("typescript") {
            Some(AgentType::JavaScript)
        } else if prompt.contains("c#") || prompt.contains("csharp") {
            Some(AgentType::CSharp)
        } else {
            None
        };

        RoutingDecision {
            target_agent: None,
            confidence: if target_agent_type.is_some() { 0.6 } else { 0.0 },
            target_agent_type,
        }
    }

    fn parse_model_decision(content: &str) -> Option<RoutingDecision> {
        // Models sometimes wrap JSON in prose; find the first object.
        let start = content.find('{')?;
        let end = content.rfind('}')?;
        serde_json::from_str(&content[start..=end]).ok()
    }
}

#[async_trait]
impl Agent for IntentRouterAgent {
    fn name(&self) -> String {
        "intent-router".to_string()
    }

    fn agent_type(&self) -> AgentType {
        AgentType::IntentRouter
    }

    fn description(&self) -> String {
        "classifies requests and suggests a target agent".to_string()
    }

    async fn can_handle(&self, _request: &AgentRequest) -> bool {
        // Routing hints only; never a dispatch target.
        false
    }

    async fn handle(
        &self,
        request: &AgentRequest,
        _cancel: &CancellationToken,
    ) -> Result<AgentResult> {
        let classification_prompt = format!(
            "Classify this developer request and answer with JSON only:\n\
             {{\"target_agent_type\": one of [\"CSharp\",\"JavaScript\",\"Python\",\
             \"Fixer\",\"Refactor\",\"Validator\",\"Knowledge\"], \
             \"confidence\": 0.0-1.0}}\n\nRequest: {}",
            request.prompt
        );

        let decision = match self
            .provider
            .send_request(
                &ModelRequest::new(classification_prompt)
                    .with_system("You are a request router. Output JSON only."),
            )
            .await
        {
            Ok(response) if response.success => response
                .content
                .as_deref()
                .and_then(Self::parse_model_decision)
                .unwrap_or_else(|| {
                    debug!("Router response was not parseable, using heuristics");
                    Self::heuristic_decision(request)
                }),
            _ => Self::heuristic_decision(request),
        };

        Ok(AgentResult::success(
            self.name(),
            format!(
                "routing suggestion: {:?} ({:.2})",
                decision.target_agent_type, decision.confidence
            ),
        )
        .with_metadata("routing_decision", serde_json::to_value(&decision)?))
    }
}
