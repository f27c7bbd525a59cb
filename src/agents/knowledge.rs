//! Knowledge/chat agent.
//!
//! The general-purpose conversational handler and catch-all for prompts no
//! specialist claims. When a knowledge store is wired, retrieved snippets
//! augment the model prompt.

use super::{model_call, result_from_model, Agent};
use crate::{
    knowledge::KnowledgeStore,
    models::{AgentRequest, AgentResult, AgentType},
    provider::{ModelClient, ModelRequest},
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RETRIEVAL_K: usize = 4;

pub struct KnowledgeAgent {
    provider: Arc<ModelClient>,
    store: Option<Arc<dyn KnowledgeStore>>,
}

impl KnowledgeAgent {
    pub fn new(provider: Arc<ModelClient>, store: Option<Arc<dyn KnowledgeStore>>) -> Self {
        Self { provider, store }
    }
}

#[async_trait]
impl Agent for KnowledgeAgent {
    fn name(&self) -> String {
        "knowledge-agent".to_string()
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Knowledge
    }

    fn description(&self) -> String {
        "retrieval-augmented chat and explanation".to_string()
    }

    async fn can_handle(&self, request: &AgentRequest) -> bool {
        // Catch-all: any well-formed prompt can be answered as chat.
        !request.prompt.trim().is_empty()
    }

    async fn handle(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResult> {
        let mut prompt = request.prompt.clone();
        let mut retrieved = 0usize;

        if let Some(store) = &self.store {
            if store.is_available().await {
                match store.retrieve(&request.prompt, RETRIEVAL_K).await {
                    Ok(items) if !items.is_empty() => {
                        retrieved = items.len();
                        prompt.push_str("\n\nRelevant context:\n");
                        for item in &items {
                            prompt.push_str(&format!("- {}\n", item.content));
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Knowledge retrieval failed, continuing without: {}", e),
                }
            }
        }

        if let Some(content) = &request.content {
            prompt.push_str(&format!("\n\nAttached content:\n{content}"));
        }

        let model_request = ModelRequest::new(prompt).with_system(
            "You are a developer assistant. Answer directly; cite the \
             provided context when it grounds your answer.",
        );
        let response = model_call(&self.provider, &model_request, cancel).await?;

        let mut result = result_from_model(&self.name(), response);
        result.metadata.insert(
            "knowledge_items".to_string(),
            serde_json::json!(retrieved),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::knowledge::KnowledgeItem;

    struct StaticStore;

    #[async_trait]
    impl KnowledgeStore for StaticStore {
        async fn retrieve(&self, _query: &str, k: usize) -> Result<Vec<KnowledgeItem>> {
            Ok((0..k.min(2))
                .map(|i| KnowledgeItem {
                    id: format!("doc-{i}"),
                    content: format!("snippet {i}"),
                    source: None,
                    score: 0.9,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_accepts_any_nonempty_prompt() {
        let agent = KnowledgeAgent::new(Arc::new(ModelClient::new(EventBus::default())), None);
        assert!(
            agent
                .can_handle(&AgentRequest::new("what is a semaphore?", "u"))
                .await
        );
    }

    #[tokio::test]
    async fn test_handle_requires_active_model() {
        let agent = KnowledgeAgent::new(
            Arc::new(ModelClient::new(EventBus::default())),
            Some(Arc::new(StaticStore)),
        );
        let err = agent
            .handle(
                &AgentRequest::new("what is a semaphore?", "u"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ServiceUnavailable);
    }
}
