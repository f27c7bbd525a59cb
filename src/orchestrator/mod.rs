//! Request dispatcher.
//!
//! `process_request` drives the full pipeline: validate, detect workflow
//! requests, consult the intent router, select a capable agent, invoke it
//! under the circuit breaker and concurrency governor with retry/backoff,
//! and fall back to the recovery planner on hard failures. A background
//! worker drains the priority queue through the same pipeline.

pub mod breaker;
pub mod executions;
pub mod governor;
pub mod queue;
pub mod recovery;
pub mod retry;

#[cfg(test)]
mod tests;

pub use breaker::{Admission, BreakerRegistry, CircuitBreaker, CircuitState};
pub use executions::{ExecutionStatus, ExecutionTracker, TaskExecution};
pub use governor::ConcurrencyGovernor;
pub use queue::{PriorityTaskQueue, QueueStats};
pub use recovery::RecoveryPlanner;
pub use retry::RetryPolicy;

use crate::{
    agents::{Agent, AgentRegistry},
    config::Config,
    error::ErrorKind,
    events::EventBus,
    models::{AgentRequest, AgentResult, AgentType, ErrorInfo, Priority, RoutingDecision},
    validation::ContentPolicy,
    workflow::WorkflowEngine,
    AssistError, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    breakers: BreakerRegistry,
    governor: Arc<ConcurrencyGovernor>,
    retry: RetryPolicy,
    recovery: RecoveryPlanner,
    policy: ContentPolicy,
    workflow: Option<Arc<dyn WorkflowEngine>>,
    queue: Arc<PriorityTaskQueue>,
    executions: Arc<ExecutionTracker>,
    routing_confidence_threshold: f64,
}

impl Orchestrator {
    pub fn new(config: &Config, registry: Arc<AgentRegistry>, bus: EventBus) -> Result<Self> {
        Ok(Self {
            breakers: BreakerRegistry::new(config.orchestrator.breaker.clone()),
            governor: Arc::new(ConcurrencyGovernor::new(config.governor.clone())),
            retry: RetryPolicy::from_config(&config.orchestrator),
            recovery: RecoveryPlanner::new(registry.clone()),
            policy: ContentPolicy::new()?,
            workflow: None,
            queue: Arc::new(PriorityTaskQueue::new(
                config.orchestrator.max_queue_size,
                bus,
            )),
            executions: Arc::new(ExecutionTracker::new(Duration::from_secs(
                crate::constants::EXECUTION_RETENTION_SECS,
            ))),
            routing_confidence_threshold: config.orchestrator.routing_confidence_threshold,
            registry,
        })
    }

    pub fn with_workflow(mut self, workflow: Arc<dyn WorkflowEngine>) -> Self {
        self.workflow = Some(workflow);
        self
    }

    pub fn queue(&self) -> Arc<PriorityTaskQueue> {
        self.queue.clone()
    }

    pub fn governor(&self) -> Arc<ConcurrencyGovernor> {
        self.governor.clone()
    }

    pub fn executions(&self) -> Arc<ExecutionTracker> {
        self.executions.clone()
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        self.registry.clone()
    }

    pub async fn breaker_metrics(
        &self,
    ) -> std::collections::HashMap<String, breaker::BreakerMetrics> {
        self.breakers.all_metrics().await
    }

    /// Enqueue a request for background processing and return its id.
    pub async fn submit(&self, request: AgentRequest, priority: Priority) -> Result<Uuid> {
        self.validate(&request)?;
        let id = request.id;
        self.executions.track(request.clone(), priority).await;
        self.queue.enqueue(request, priority).await?;
        debug!("Request {} submitted at {:?}", id, priority);
        Ok(id)
    }

    /// Start the queue worker. Dequeued requests run through
    /// `process_request` concurrently, bounded by the governor.
    pub fn spawn_worker(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            info!("Orchestrator worker started");
            loop {
                let request = match orchestrator.queue.dequeue(&shutdown).await {
                    Ok(request) => request,
                    Err(_) => {
                        info!("Orchestrator worker shutting down");
                        break;
                    }
                };

                let inner = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    let cancel = match inner.executions.get(request.id).await {
                        Some(execution) => execution.cancel.clone(),
                        None => CancellationToken::new(),
                    };
                    inner.executions.mark_running(request.id).await;

                    let (status, result) = match inner.process_request(&request, &cancel).await {
                        Ok(result) if result.success => (ExecutionStatus::Completed, result),
                        Ok(result) => {
                            let status = match result.error.as_ref().map(|e| e.kind) {
                                Some(ErrorKind::Cancelled) => ExecutionStatus::Cancelled,
                                _ => ExecutionStatus::Failed,
                            };
                            (status, result)
                        }
                        Err(e) => {
                            error!("Request {} failed before dispatch: {}", request.id, e);
                            let kind = e.kind();
                            (
                                ExecutionStatus::Failed,
                                AgentResult::failure(
                                    "orchestrator",
                                    e.to_string(),
                                    Some(ErrorInfo::new(kind, e.to_string())),
                                ),
                            )
                        }
                    };
                    inner
                        .executions
                        .finish(request.id, status, Some(result))
                        .await;
                });
            }
        })
    }

    /// Process one request end to end.
    ///
    /// Ingress rejections (`InvalidArgument`, `NotFound`) surface as `Err`;
    /// once dispatch begins, failures come back as an `AgentResult` with
    /// `success = false` so the attempt metadata is never lost.
    pub async fn process_request(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResult> {
        let started = Instant::now();
        self.validate(request)?;

        if cancel.is_cancelled() {
            return Ok(self.cancelled_result(request, started, 0));
        }

        // Multi-step requests go to the workflow collaborator wholesale.
        if request.wants_workflow() {
            if let Some(workflow) = &self.workflow {
                debug!("Delegating request {} to workflow engine", request.id);
                let outcome = workflow.execute_workflow(request, cancel).await?;
                let mut result = if outcome.success {
                    AgentResult::success("workflow", outcome.message)
                } else {
                    AgentResult::failure("workflow", outcome.message, None)
                };
                result.content = outcome.content;
                result.processing_time = started.elapsed();
                return Ok(result
                    .with_metadata("workflow", serde_json::json!(true))
                    .with_metadata(
                        "steps_completed",
                        serde_json::json!(outcome.steps_completed),
                    ));
            }
            debug!("Workflow requested but no engine is wired; dispatching normally");
        }

        let routing = self.route_intent(request, cancel).await;
        let target = self.select_agent(request, routing.as_ref()).await?;

        let mut result = self
            .dispatch_with_retry(request, target.clone(), cancel, started)
            .await;

        // Hard failure: try one alternate agent, excluding the one that
        // failed. Breaker short-circuits and cancellations return as-is.
        let recoverable = !result.success
            && !matches!(
                result.error.as_ref().map(|e| e.kind),
                Some(ErrorKind::Cancelled) | Some(ErrorKind::ServiceUnavailable)
            );
        if recoverable {
            if let Some(alternate) = self
                .recovery
                .plan(request, &target.name(), target.agent_type())
                .await
            {
                warn!(
                    "Recovering request {} via agent '{}'",
                    request.id,
                    alternate.name()
                );
                let attempts_so_far = result
                    .metadata
                    .get("attempts")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                let mut recovered = self
                    .invoke_once(request, alternate.clone(), cancel)
                    .await;
                if recovered.success {
                    recovered
                        .metadata
                        .insert("IsRecoveryResult".to_string(), serde_json::json!(true));
                    recovered.metadata.insert(
                        "recovered_from".to_string(),
                        serde_json::json!(target.name()),
                    );
                    recovered
                        .metadata
                        .insert("attempts".to_string(), serde_json::json!(attempts_so_far + 1));
                    result = recovered;
                }
            }
        }

        result.processing_time = started.elapsed();
        if let Some(decision) = routing {
            result.metadata.insert(
                "routing_decision".to_string(),
                serde_json::to_value(&decision)?,
            );
        }
        if !result.success {
            result
                .metadata
                .entry("failed_agent".to_string())
                .or_insert_with(|| serde_json::json!(target.name()));
        }
        Ok(result)
    }

    /// Cancel an in-flight submitted request.
    pub async fn cancel_request(&self, id: Uuid) -> bool {
        self.executions.cancel(id).await
    }

    fn validate(&self, request: &AgentRequest) -> Result<()> {
        if request.id.is_nil() {
            return Err(AssistError::InvalidArgument(
                "request id must be non-zero".to_string(),
            ));
        }
        if request.prompt.trim().is_empty() {
            return Err(AssistError::InvalidArgument(
                "prompt must not be empty".to_string(),
            ));
        }
        if request.user_id.trim().is_empty() {
            return Err(AssistError::InvalidArgument(
                "user id must not be empty".to_string(),
            ));
        }
        for (key, value) in &request.context {
            self.policy
                .validate_context_key(key)
                .map_err(|e| AssistError::InvalidArgument(e.to_string()))?;
            self.policy
                .validate_context_value(value)
                .map_err(|e| AssistError::InvalidArgument(e.to_string()))?;
        }
        Ok(())
    }

    /// Ask the intent-router agent (when registered) for a routing hint.
    /// Router failures are advisory only and never fail the request.
    async fn route_intent(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Option<RoutingDecision> {
        let routers = self.registry.get_by_type(AgentType::IntentRouter).await;
        let router = routers.first()?;

        match router.handle(request, cancel).await {
            Ok(result) => {
                let decision: RoutingDecision =
                    serde_json::from_value(result.metadata.get("routing_decision")?.clone())
                        .ok()?;
                if decision.confidence >= self.routing_confidence_threshold {
                    debug!(
                        "Intent router chose {:?}/{:?} at {:.2}",
                        decision.target_agent, decision.target_agent_type, decision.confidence
                    );
                    Some(decision)
                } else {
                    debug!(
                        "Ignoring low-confidence routing hint ({:.2})",
                        decision.confidence
                    );
                    None
                }
            }
            Err(e) => {
                debug!("Intent router failed, falling back to heuristics: {}", e);
                None
            }
        }
    }

    /// Candidate selection: capable agents ranked by routing hint,
    /// preferred type, path/prompt heuristics, then least-recently-used.
    async fn select_agent(
        &self,
        request: &AgentRequest,
        routing: Option<&RoutingDecision>,
    ) -> Result<Arc<dyn Agent>> {
        let candidates: Vec<Arc<dyn Agent>> = self
            .registry
            .candidates(request)
            .await
            .into_iter()
            .filter(|agent| agent.agent_type() != AgentType::IntentRouter)
            .collect();

        if candidates.is_empty() {
            return Err(AssistError::NotFound(format!(
                "no agent can handle request {}",
                request.id
            )));
        }

        let heuristic_type = Self::heuristic_type(request);
        let mut ranked = Vec::with_capacity(candidates.len());
        for agent in candidates {
            let name = agent.name();
            let tier = if routing
                .and_then(|r| r.target_agent.as_deref())
                .is_some_and(|target| target == name)
            {
                0
            } else if routing
                .and_then(|r| r.target_agent_type)
                .is_some_and(|t| t == agent.agent_type())
            {
                1
            } else if request.preferred_agent_type == Some(agent.agent_type()) {
                2
            } else if heuristic_type == Some(agent.agent_type()) {
                3
            } else {
                4
            };
            let last_activity = self.registry.last_activity(&name).await;
            ranked.push((tier, last_activity, agent));
        }
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let chosen = ranked
            .into_iter()
            .next()
            .map(|(_, _, agent)| agent)
            .expect("candidates were non-empty");
        debug!("Selected agent '{}' for request {}", chosen.name(), request.id);
        Ok(chosen)
    }

    /// Advisory agent type derived from the file extension or prompt
    /// keywords.
    fn heuristic_type(request: &AgentRequest) -> Option<AgentType> {
        if let Some(path) = &request.file_path {
            if let Some(agent_type) = AgentType::from_extension(path) {
                return Some(agent_type);
            }
        }

        let prompt = request.prompt.to_lowercase();
        if prompt.contains("fix") || prompt.contains("bug") || prompt.contains("broken") {
            Some(AgentType::Fixer)
        } else if prompt.contains("refactor") || prompt.contains("clean up") {
            Some(AgentType::Refactor)
        } else if prompt.contains("validate") || prompt.contains("check this") {
            Some(AgentType::Validator)
        } else if prompt.contains("explain") || prompt.contains("how does") || prompt.contains("docs")
        {
            Some(AgentType::Knowledge)
        } else if prompt.contains("python") {
            Some(AgentType::Python)
        } else if prompt.contains("javascript") || prompt.contains("typescript") {
            Some(AgentType::JavaScript)
        } else if prompt.contains("c#") || prompt.contains("csharp") {
            Some(AgentType::CSharp)
        } else {
            None
        }
    }

    /// Retry loop for one selected agent. The breaker is consulted before
    /// every attempt; an open breaker aborts immediately.
    async fn dispatch_with_retry(
        &self,
        request: &AgentRequest,
        agent: Arc<dyn Agent>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> AgentResult {
        let name = agent.name();
        let breaker = self.breakers.breaker_for(&name).await;
        let max_attempts = self.retry.max_retries.max(1);
        let mut last_result: Option<AgentResult> = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return self.cancelled_result(request, started, attempt - 1);
            }

            if !breaker.admit().await.is_admitted() {
                warn!("Breaker for '{}' is open; rejecting request {}", name, request.id);
                return AgentResult::failure(
                    name.clone(),
                    format!("agent '{name}' is temporarily unavailable"),
                    Some(ErrorInfo::new(
                        ErrorKind::ServiceUnavailable,
                        "circuit breaker open",
                    )),
                )
                .with_metadata("attempts", serde_json::json!(attempt - 1));
            }

            let permit = match self.governor.acquire(cancel).await {
                Ok(permit) => permit,
                Err(_) => return self.cancelled_result(request, started, attempt - 1),
            };

            self.registry.touch(&name).await;
            let outcome = agent.handle(request, cancel).await;
            drop(permit);

            let result = match outcome {
                Ok(result) => result,
                Err(AssistError::Cancelled) => {
                    return self.cancelled_result(request, started, attempt)
                }
                Err(e) => {
                    let kind = e.kind();
                    AgentResult::failure(
                        name.clone(),
                        e.to_string(),
                        Some(ErrorInfo::new(kind, e.to_string())),
                    )
                }
            };

            if result.success {
                breaker.record_success().await;
                self.registry.record_outcome(&name, true).await;
                return self.annotate(result, &agent, attempt);
            }

            breaker.record_failure().await;
            self.registry.record_outcome(&name, false).await;
            debug!(
                "Attempt {}/{} on '{}' failed: {}",
                attempt, max_attempts, name, result.message
            );

            let retryable = result.is_retryable_failure();
            last_result = Some(self.annotate(result, &agent, attempt));

            if !retryable || attempt == max_attempts {
                break;
            }

            let delay = self.retry.delay_for(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return self.cancelled_result(request, started, attempt);
                }
            }
        }

        last_result.unwrap_or_else(|| {
            AgentResult::failure(
                name,
                "agent produced no result",
                Some(ErrorInfo::new(ErrorKind::Internal, "empty dispatch loop")),
            )
        })
    }

    /// Single recovery invocation, still honoring breaker and governor.
    async fn invoke_once(
        &self,
        request: &AgentRequest,
        agent: Arc<dyn Agent>,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let name = agent.name();
        let breaker = self.breakers.breaker_for(&name).await;
        if !breaker.admit().await.is_admitted() {
            return AgentResult::failure(
                name.clone(),
                format!("recovery agent '{name}' is temporarily unavailable"),
                Some(ErrorInfo::new(
                    ErrorKind::ServiceUnavailable,
                    "circuit breaker open",
                )),
            );
        }

        let permit = match self.governor.acquire(cancel).await {
            Ok(permit) => permit,
            Err(_) => {
                return AgentResult::failure(
                    name.clone(),
                    "cancelled before recovery dispatch",
                    Some(ErrorInfo::new(ErrorKind::Cancelled, "cancelled")),
                )
            }
        };
        self.registry.touch(&name).await;
        let outcome = agent.handle(request, cancel).await;
        drop(permit);

        match outcome {
            Ok(result) => {
                if result.success {
                    breaker.record_success().await;
                } else {
                    breaker.record_failure().await;
                }
                self.registry.record_outcome(&name, result.success).await;
                result
            }
            Err(e) => {
                breaker.record_failure().await;
                self.registry.record_outcome(&name, false).await;
                let kind = e.kind();
                AgentResult::failure(
                    name,
                    e.to_string(),
                    Some(ErrorInfo::new(kind, e.to_string())),
                )
            }
        }
    }

    fn annotate(&self, mut result: AgentResult, agent: &Arc<dyn Agent>, attempts: u32) -> AgentResult {
        result
            .metadata
            .insert("attempts".to_string(), serde_json::json!(attempts));
        result.metadata.insert(
            "agent_type".to_string(),
            serde_json::json!(agent.agent_type()),
        );
        if result.agent_name.is_empty() {
            result.agent_name = agent.name();
        }
        result
    }

    fn cancelled_result(
        &self,
        request: &AgentRequest,
        started: Instant,
        attempts: u32,
    ) -> AgentResult {
        let mut result = AgentResult::failure(
            "orchestrator",
            "request was cancelled",
            Some(ErrorInfo::new(ErrorKind::Cancelled, "cancelled by caller")),
        );
        result.processing_time = started.elapsed();
        result
            .metadata
            .insert("attempts".to_string(), serde_json::json!(attempts));
        result
            .metadata
            .insert("request_id".to_string(), serde_json::json!(request.id));
        result
    }
}
