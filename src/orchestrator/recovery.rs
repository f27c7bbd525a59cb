//! Recovery planning after a hard dispatch failure.
//!
//! Re-runs candidate selection with the failed agent excluded and prefers
//! an agent of a different type to dodge correlated failures.

use crate::{
    agents::{Agent, AgentRegistry},
    models::{AgentRequest, AgentType},
};
use std::sync::Arc;
use tracing::{debug, info};

pub struct RecoveryPlanner {
    registry: Arc<AgentRegistry>,
}

impl RecoveryPlanner {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Choose an alternate agent for the request, or `None` when no
    /// recovery is possible.
    pub async fn plan(
        &self,
        request: &AgentRequest,
        failed_name: &str,
        failed_type: AgentType,
    ) -> Option<Arc<dyn Agent>> {
        let mut candidates: Vec<Arc<dyn Agent>> = self
            .registry
            .candidates(request)
            .await
            .into_iter()
            .filter(|agent| agent.name() != failed_name)
            .collect();

        if candidates.is_empty() {
            debug!("No recovery candidates for request {}", request.id);
            return None;
        }

        // Rank different-typed agents ahead of same-typed ones; break ties
        // by least recent activity.
        let mut ranked = Vec::with_capacity(candidates.len());
        for agent in candidates.drain(..) {
            let same_type = agent.agent_type() == failed_type;
            let last_activity = self.registry.last_activity(&agent.name()).await;
            ranked.push((same_type, last_activity, agent));
        }
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let chosen = ranked.into_iter().next().map(|(_, _, agent)| agent)?;
        info!(
            "Recovery plan for request {}: '{}' replaces '{}'",
            request.id,
            chosen.name(),
            failed_name
        );
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Agent;
    use crate::events::EventBus;
    use crate::models::{AgentResult, AgentType};
    use crate::Result;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct StubAgent {
        name: String,
        agent_type: AgentType,
        able: bool,
    }

    impl StubAgent {
        fn new(name: &str, agent_type: AgentType, able: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                agent_type,
                able,
            })
        }
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn name(&self) -> String {
            self.name.clone()
        }
        fn agent_type(&self) -> AgentType {
            self.agent_type
        }
        fn description(&self) -> String {
            "stub".to_string()
        }
        async fn can_handle(&self, _request: &AgentRequest) -> bool {
            self.able
        }
        async fn handle(
            &self,
            _request: &AgentRequest,
            _cancel: &CancellationToken,
        ) -> Result<AgentResult> {
            Ok(AgentResult::success(self.name.clone(), "ok"))
        }
    }

    #[tokio::test]
    async fn test_prefers_agent_of_different_type() {
        let registry = Arc::new(AgentRegistry::new(EventBus::default()));
        registry
            .register(StubAgent::new("py-primary", AgentType::Python, true))
            .await
            .unwrap();
        registry
            .register(StubAgent::new("py-backup", AgentType::Python, true))
            .await
            .unwrap();
        registry
            .register(StubAgent::new("utility", AgentType::Utility, true))
            .await
            .unwrap();

        let planner = RecoveryPlanner::new(registry);
        let request = AgentRequest::new("do work", "user");
        let chosen = planner
            .plan(&request, "py-primary", AgentType::Python)
            .await
            .unwrap();
        assert_eq!(chosen.name(), "utility");
    }

    #[tokio::test]
    async fn test_excludes_failed_agent() {
        let registry = Arc::new(AgentRegistry::new(EventBus::default()));
        registry
            .register(StubAgent::new("only", AgentType::Fixer, true))
            .await
            .unwrap();

        let planner = RecoveryPlanner::new(registry);
        let request = AgentRequest::new("fix it", "user");
        assert!(planner
            .plan(&request, "only", AgentType::Fixer)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_ignores_agents_that_cannot_handle() {
        let registry = Arc::new(AgentRegistry::new(EventBus::default()));
        registry
            .register(StubAgent::new("unable", AgentType::Utility, false))
            .await
            .unwrap();

        let planner = RecoveryPlanner::new(registry);
        let request = AgentRequest::new("anything", "user");
        assert!(planner
            .plan(&request, "primary", AgentType::Python)
            .await
            .is_none());
    }
}
