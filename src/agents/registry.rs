//! Name-keyed agent registry with lifecycle and health monitoring.
//!
//! The registry exclusively owns agent instances. Registration runs the
//! agent's `init` and rolls back on failure; unregistration runs `shutdown`
//! best-effort. A background task polls agent health and emits
//! `AgentStatusChanged` on transitions.

use super::{Agent, AgentStatus};
use crate::{
    events::{EventBus, SystemEvent},
    models::{AgentHealth, AgentRequest, AgentState, AgentType},
    AssistError, Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct AgentEntry {
    agent: Arc<dyn Agent>,
    state: AgentState,
    health: AgentHealth,
    last_activity: chrono::DateTime<chrono::Utc>,
    tasks_completed: u64,
    tasks_failed: u64,
}

impl AgentEntry {
    fn status(&self, name: &str) -> AgentStatus {
        AgentStatus {
            name: name.to_string(),
            agent_type: self.agent.agent_type(),
            state: self.state,
            health: self.health,
            last_activity: self.last_activity,
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
        }
    }
}

pub struct AgentRegistry {
    entries: RwLock<HashMap<String, AgentEntry>>,
    bus: EventBus,
    health_poll_interval: std::time::Duration,
}

impl AgentRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            bus,
            health_poll_interval: std::time::Duration::from_secs(
                crate::constants::HEALTH_POLL_INTERVAL_SECS,
            ),
        }
    }

    pub fn with_health_poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.health_poll_interval = interval;
        self
    }

    /// Register and initialize an agent. A second registration under the
    /// same name fails with `AlreadyExists` without touching the agent.
    pub async fn register(&self, agent: Arc<dyn Agent>) -> Result<()> {
        let name = agent.name();

        // Reserve the name before running init so concurrent registrations
        // cannot double-initialize.
        {
            let mut entries = self.entries.write().await;
            if entries.contains_key(&name) {
                return Err(AssistError::AlreadyExists(format!(
                    "agent '{name}' is already registered"
                )));
            }
            entries.insert(
                name.clone(),
                AgentEntry {
                    agent: agent.clone(),
                    state: AgentState::Initializing,
                    health: AgentHealth::Unknown,
                    last_activity: chrono::Utc::now(),
                    tasks_completed: 0,
                    tasks_failed: 0,
                },
            );
        }

        if let Err(e) = agent.init().await {
            // Roll the reservation back; the registry never holds agents
            // that failed to initialize.
            let mut entries = self.entries.write().await;
            entries.remove(&name);
            error!("Agent '{}' failed to initialize: {}", name, e);
            return Err(e);
        }

        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&name) {
                self.transition(&name, entry, AgentState::Running, AgentHealth::Healthy);
            }
        }

        info!("Registered agent: {} ({:?})", name, agent.agent_type());
        self.bus.publish(SystemEvent::AgentRegistered {
            name,
            agent_type: agent.agent_type(),
        });
        Ok(())
    }

    /// Remove an agent, shutting it down best-effort.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let entry = {
            let mut entries = self.entries.write().await;
            entries
                .remove(name)
                .ok_or_else(|| AssistError::NotFound(format!("agent '{name}' is not registered")))?
        };

        if let Err(e) = entry.agent.shutdown().await {
            warn!("Agent '{}' shutdown reported an error: {}", name, e);
        }

        info!("Unregistered agent: {}", name);
        self.bus.publish(SystemEvent::AgentUnregistered {
            name: name.to_string(),
        });
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        let entries = self.entries.read().await;
        entries.get(name).map(|e| e.agent.clone())
    }

    pub async fn get_by_type(&self, agent_type: AgentType) -> Vec<Arc<dyn Agent>> {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|e| e.agent.agent_type() == agent_type)
            .map(|e| e.agent.clone())
            .collect()
    }

    pub async fn list(&self) -> Vec<Arc<dyn Agent>> {
        let entries = self.entries.read().await;
        entries.values().map(|e| e.agent.clone()).collect()
    }

    pub async fn list_where(
        &self,
        predicate: impl Fn(&AgentStatus) -> bool,
    ) -> Vec<Arc<dyn Agent>> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|(name, e)| predicate(&e.status(name)))
            .map(|(_, e)| e.agent.clone())
            .collect()
    }

    /// Agents currently able to take the request, per their own
    /// `can_handle`.
    pub async fn candidates(&self, request: &AgentRequest) -> Vec<Arc<dyn Agent>> {
        let agents = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|e| e.state == AgentState::Running)
                .map(|e| e.agent.clone())
                .collect::<Vec<_>>()
        };

        let mut able = Vec::new();
        for agent in agents {
            if agent.can_handle(request).await {
                able.push(agent);
            }
        }
        able
    }

    pub async fn statuses(&self) -> Vec<AgentStatus> {
        let entries = self.entries.read().await;
        entries.iter().map(|(name, e)| e.status(name)).collect()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn last_activity(&self, name: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        let entries = self.entries.read().await;
        entries.get(name).map(|e| e.last_activity)
    }

    /// Record a dispatch against an agent; keeps LRU ranking honest.
    pub async fn touch(&self, name: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.last_activity = chrono::Utc::now();
        }
    }

    pub async fn record_outcome(&self, name: &str, success: bool) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            if success {
                entry.tasks_completed += 1;
            } else {
                entry.tasks_failed += 1;
            }
        }
    }

    /// Initialize every non-running agent. One agent's failure never aborts
    /// the batch.
    pub async fn start_all(&self) {
        let agents: Vec<(String, Arc<dyn Agent>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, e)| e.state != AgentState::Running)
                .map(|(name, e)| (name.clone(), e.agent.clone()))
                .collect()
        };

        for (name, agent) in agents {
            let outcome = agent.init().await;
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&name) {
                match outcome {
                    Ok(()) => {
                        self.transition(&name, entry, AgentState::Running, AgentHealth::Healthy)
                    }
                    Err(e) => {
                        error!("Agent '{}' failed to start: {}", name, e);
                        self.transition(&name, entry, AgentState::Faulted, AgentHealth::Unhealthy);
                    }
                }
            }
        }
    }

    /// Shut every running agent down, isolating per-agent failures.
    pub async fn stop_all(&self) {
        let agents: Vec<(String, Arc<dyn Agent>)> = {
            let mut entries = self.entries.write().await;
            entries
                .iter_mut()
                .filter(|(_, e)| e.state == AgentState::Running)
                .map(|(name, e)| {
                    e.state = AgentState::Stopping;
                    (name.clone(), e.agent.clone())
                })
                .collect()
        };

        for (name, agent) in agents {
            if let Err(e) = agent.shutdown().await {
                warn!("Agent '{}' shutdown reported an error: {}", name, e);
            }
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&name) {
                let health = entry.health;
                self.transition(&name, entry, AgentState::Stopped, health);
            }
        }
    }

    /// Poll every agent once and return the health rollup.
    pub async fn health_check(&self) -> HashMap<String, AgentHealth> {
        let agents: Vec<(String, Arc<dyn Agent>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .map(|(name, e)| (name.clone(), e.agent.clone()))
                .collect()
        };

        let mut rollup = HashMap::new();
        for (name, agent) in agents {
            let health = agent.health().await;
            rollup.insert(name.clone(), health);

            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&name) {
                if entry.health != health {
                    let state = entry.state;
                    self.transition(&name, entry, state, health);
                }
            }
        }
        rollup
    }

    /// Start the periodic health monitor. Runs until `shutdown` fires.
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.health_poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        registry.health_check().await;
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Agent health monitor shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Apply a state/health transition and emit the change event. Events
    /// for one agent are emitted in transition order; callers hold the
    /// write lock across the update.
    fn transition(
        &self,
        name: &str,
        entry: &mut AgentEntry,
        new_state: AgentState,
        new_health: AgentHealth,
    ) {
        let previous_state = entry.state;
        let previous_health = entry.health;
        if previous_state == new_state && previous_health == new_health {
            return;
        }
        entry.state = new_state;
        entry.health = new_health;
        debug!(
            "Agent '{}' transitioned: {:?}/{:?} -> {:?}/{:?}",
            name, previous_state, previous_health, new_state, new_health
        );
        self.bus.publish(SystemEvent::AgentStatusChanged {
            name: name.to_string(),
            previous_state,
            new_state,
            previous_health,
            new_health,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Topic;
    use crate::models::AgentResult;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct ProbeAgent {
        name: String,
        agent_type: AgentType,
        init_calls: AtomicU32,
        fail_init: AtomicBool,
        health: std::sync::Mutex<AgentHealth>,
    }

    impl ProbeAgent {
        fn new(name: &str, agent_type: AgentType) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                agent_type,
                init_calls: AtomicU32::new(0),
                fail_init: AtomicBool::new(false),
                health: std::sync::Mutex::new(AgentHealth::Healthy),
            })
        }
    }

    #[async_trait::async_trait]
    impl Agent for ProbeAgent {
        fn name(&self) -> String {
            self.name.clone()
        }
        fn agent_type(&self) -> AgentType {
            self.agent_type
        }
        fn description(&self) -> String {
            "probe".to_string()
        }
        async fn can_handle(&self, _request: &AgentRequest) -> bool {
            true
        }
        async fn handle(
            &self,
            _request: &AgentRequest,
            _cancel: &CancellationToken,
        ) -> Result<AgentResult> {
            Ok(AgentResult::success(self.name.clone(), "ok"))
        }
        async fn init(&self) -> Result<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(AssistError::Agent {
                    message: "init failed".to_string(),
                });
            }
            Ok(())
        }
        async fn health(&self) -> AgentHealth {
            *self.health.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn test_register_initializes_once_and_rejects_duplicates() {
        let registry = AgentRegistry::new(EventBus::default());
        let agent = ProbeAgent::new("worker", AgentType::Python);

        registry.register(agent.clone()).await.unwrap();
        assert_eq!(registry.count().await, 1);
        assert_eq!(agent.init_calls.load(Ordering::SeqCst), 1);

        let err = registry.register(agent.clone()).await.unwrap_err();
        assert!(matches!(err, AssistError::AlreadyExists(_)));
        // The duplicate attempt never re-initialized the agent.
        assert_eq!(agent.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_init_rolls_back() {
        let registry = AgentRegistry::new(EventBus::default());
        let agent = ProbeAgent::new("flaky", AgentType::Fixer);
        agent.fail_init.store(true, Ordering::SeqCst);

        assert!(registry.register(agent.clone()).await.is_err());
        assert_eq!(registry.count().await, 0);
        assert!(registry.get("flaky").await.is_none());
    }

    #[tokio::test]
    async fn test_register_unregister_round_trip() {
        let registry = AgentRegistry::new(EventBus::default());
        let before: Vec<String> = registry.list().await.iter().map(|a| a.name()).collect();

        let agent = ProbeAgent::new("transient", AgentType::Utility);
        registry.register(agent).await.unwrap();
        registry.unregister("transient").await.unwrap();

        let after: Vec<String> = registry.list().await.iter().map(|a| a.name()).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_lookup_by_type() {
        let registry = AgentRegistry::new(EventBus::default());
        registry
            .register(ProbeAgent::new("py-1", AgentType::Python))
            .await
            .unwrap();
        registry
            .register(ProbeAgent::new("py-2", AgentType::Python))
            .await
            .unwrap();
        registry
            .register(ProbeAgent::new("fix-1", AgentType::Fixer))
            .await
            .unwrap();

        assert_eq!(registry.get_by_type(AgentType::Python).await.len(), 2);
        assert_eq!(registry.get_by_type(AgentType::Fixer).await.len(), 1);
        assert!(registry.get_by_type(AgentType::Shell).await.is_empty());
    }

    #[tokio::test]
    async fn test_list_with_predicate() {
        let registry = AgentRegistry::new(EventBus::default());
        registry
            .register(ProbeAgent::new("py-1", AgentType::Python))
            .await
            .unwrap();
        registry
            .register(ProbeAgent::new("fix-1", AgentType::Fixer))
            .await
            .unwrap();

        let running = registry
            .list_where(|status| status.state == AgentState::Running)
            .await;
        assert_eq!(running.len(), 2);

        let fixers = registry
            .list_where(|status| status.agent_type == AgentType::Fixer)
            .await;
        assert_eq!(fixers.len(), 1);
        assert_eq!(fixers[0].name(), "fix-1");
    }

    #[tokio::test]
    async fn test_health_transition_emits_event() {
        let bus = EventBus::default();
        let registry = AgentRegistry::new(bus.clone());
        let mut stream = bus.subscribe(Topic::AgentStatusChanged);

        let agent = ProbeAgent::new("watched", AgentType::Knowledge);
        registry.register(agent.clone()).await.unwrap();
        // Drain the register-time transition.
        while stream.try_recv().is_some() {}

        *agent.health.lock().unwrap() = AgentHealth::Degraded;
        let rollup = registry.health_check().await;
        assert_eq!(rollup["watched"], AgentHealth::Degraded);

        match stream.try_recv() {
            Some(SystemEvent::AgentStatusChanged {
                name,
                previous_health,
                new_health,
                ..
            }) => {
                assert_eq!(name, "watched");
                assert_eq!(previous_health, AgentHealth::Healthy);
                assert_eq!(new_health, AgentHealth::Degraded);
            }
            other => panic!("expected status change event, got {other:?}"),
        }

        // Unchanged health emits nothing further.
        registry.health_check().await;
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_stop_all_isolates_failures() {
        let registry = AgentRegistry::new(EventBus::default());
        registry
            .register(ProbeAgent::new("a", AgentType::Python))
            .await
            .unwrap();
        registry
            .register(ProbeAgent::new("b", AgentType::Fixer))
            .await
            .unwrap();

        registry.stop_all().await;
        for status in registry.statuses().await {
            assert_eq!(status.state, AgentState::Stopped);
        }
    }
}
