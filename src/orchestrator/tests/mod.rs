//! Dispatcher test suites and shared scripted agents.


use crate::{
    agents::Agent,
    config::{Config, GovernorConfig, OrchestratorConfig},
    models::{AgentRequest, AgentResult, AgentType, ErrorInfo},
    AssistError, Result,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One scripted reply from a [`ScriptedAgent`].
#[derive(Debug, Clone)]
pub(super) enum Script {
    Succeed(&'static str),
    /// `success = false`, no error info, no non-retryable marker.
    TransientFailure,
    /// `success = false` with a fatal error kind attached.
    FatalFailure,
    /// `handle` returns `Err` with a non-retryable kind.
    Throw,
    /// `handle` returns `Err` with a retryable kind.
    ThrowTransient,
}

/// Agent that replays a scripted sequence of outcomes and counts calls.
/// The last script entry repeats once the sequence is exhausted.
pub(super) struct ScriptedAgent {
    name: String,
    agent_type: AgentType,
    script: Mutex<VecDeque<Script>>,
    last: Script,
    pub calls: AtomicU32,
    /// Per-call artificial latency, for concurrency assertions.
    pub latency: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(name: &str, agent_type: AgentType, script: Vec<Script>) -> Arc<Self> {
        Self::build(name, agent_type, script, Duration::ZERO)
    }

    pub fn with_latency(name: &str, agent_type: AgentType, latency: Duration) -> Arc<Self> {
        Self::build(name, agent_type, vec![Script::Succeed("ok")], latency)
    }

    fn build(
        name: &str,
        agent_type: AgentType,
        script: Vec<Script>,
        latency: Duration,
    ) -> Arc<Self> {
        let last = script.last().cloned().unwrap_or(Script::Succeed("ok"));
        Arc::new(Self {
            name: name.to_string(),
            agent_type,
            script: Mutex::new(script.into_iter().collect()),
            last,
            calls: AtomicU32::new(0),
            latency,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn next_script(&self) -> Script {
        let mut script = self.script.lock().unwrap();
        script.pop_front().unwrap_or_else(|| self.last.clone())
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> String {
        self.name.clone()
    }
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }
    fn description(&self) -> String {
        "scripted test agent".to_string()
    }

    async fn can_handle(&self, _request: &AgentRequest) -> bool {
        true
    }

    async fn handle(
        &self,
        _request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            let outcome = tokio::select! {
                _ = tokio::time::sleep(self.latency) => Ok(()),
                _ = cancel.cancelled() => Err(AssistError::Cancelled),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome?;
        }

        match self.next_script() {
            Script::Succeed(content) => {
                Ok(AgentResult::success(self.name.clone(), "done").with_content(content))
            }
            Script::TransientFailure => Ok(AgentResult::failure(
                self.name.clone(),
                "Transient",
                None,
            )),
            Script::FatalFailure => Ok(AgentResult::failure(
                self.name.clone(),
                "invalid request content",
                Some(ErrorInfo::new(
                    crate::error::ErrorKind::InvalidArgument,
                    "bad input",
                )),
            )),
            Script::Throw => Err(AssistError::Agent {
                message: "agent crashed".to_string(),
            }),
            Script::ThrowTransient => Err(AssistError::Transient {
                message: "connection reset".to_string(),
            }),
        }
    }
}

/// Config tuned for fast tests: real thresholds, millisecond backoff.
pub(super) fn test_config() -> Config {
    Config {
        orchestrator: OrchestratorConfig {
            max_retries: 3,
            retry_initial_delay: Duration::from_millis(5),
            retry_max_delay: Duration::from_millis(20),
            ..OrchestratorConfig::default()
        },
        governor: GovernorConfig {
            initial_permits: 2,
            min_permits: 1,
            max_permits: 4,
            tune_interval: Duration::from_secs(30),
            target_throughput_per_min: 60.0,
        },
        ..Config::default()
    }
}

pub(super) fn request(prompt: &str) -> AgentRequest {
    AgentRequest::new(prompt, "test-user")
}
