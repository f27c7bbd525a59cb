//! Per-agent circuit breakers.
//!
//! Each target agent gets its own breaker, keyed by agent name. Failures
//! inside the rolling window trip the breaker open; after the cool-down a
//! single half-open probe is admitted. The probe's outcome decides between
//! closing the circuit and re-opening it.

use crate::config::BreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; request passes.
    Allowed,
    /// Circuit half-open; this request is the single recovery probe.
    Probe,
    /// Circuit open; short-circuit with `ServiceUnavailable`.
    Rejected,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    failure_count: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    core: Mutex<BreakerCore>,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_requests: u64,
    pub total_failures: u64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                failure_count: 0,
                window_start: None,
                opened_at: None,
                probe_in_flight: false,
            }),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    /// Decide whether the next request may proceed, transitioning
    /// Open → HalfOpen once the cool-down has elapsed.
    pub async fn admit(&self) -> Admission {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut core = self.core.lock().await;

        match core.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let elapsed = core
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or_default();
                if elapsed >= self.config.cool_down {
                    core.state = CircuitState::HalfOpen;
                    core.probe_in_flight = true;
                    info!("Circuit breaker for '{}' half-open, admitting probe", self.name);
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if core.probe_in_flight {
                    Admission::Rejected
                } else {
                    core.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut core = self.core.lock().await;
        match core.state {
            CircuitState::HalfOpen => {
                core.state = CircuitState::Closed;
                core.failure_count = 0;
                core.window_start = None;
                core.opened_at = None;
                core.probe_in_flight = false;
                info!("Circuit breaker for '{}' closed, service recovered", self.name);
            }
            CircuitState::Closed => {
                core.failure_count = 0;
                core.window_start = None;
            }
            CircuitState::Open => {
                warn!("Success recorded while circuit for '{}' is open", self.name);
            }
        }
    }

    pub async fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut core = self.core.lock().await;
        let now = Instant::now();

        match core.state {
            CircuitState::Closed => {
                let window_expired = core
                    .window_start
                    .map(|start| now.duration_since(start) > self.config.rolling_window)
                    .unwrap_or(true);

                if window_expired {
                    core.window_start = Some(now);
                    core.failure_count = 1;
                } else {
                    core.failure_count += 1;
                }

                debug!(
                    "Circuit breaker for '{}' failure count: {}/{}",
                    self.name, core.failure_count, self.config.failure_threshold
                );

                if core.failure_count >= self.config.failure_threshold {
                    core.state = CircuitState::Open;
                    core.opened_at = Some(now);
                    warn!(
                        "Circuit breaker for '{}' opened after {} failures",
                        self.name, core.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                // A failed probe re-opens immediately and restarts the timer.
                core.state = CircuitState::Open;
                core.opened_at = Some(now);
                core.probe_in_flight = false;
                warn!("Circuit breaker for '{}' re-opened after failed probe", self.name);
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.core.lock().await.state
    }

    pub async fn metrics(&self) -> BreakerMetrics {
        let core = self.core.lock().await;
        BreakerMetrics {
            state: core.state,
            failure_count: core.failure_count,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }
}

/// Lazily-created breaker per agent name, one shared config.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn breaker_for(&self, agent_name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(agent_name) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(agent_name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(agent_name, self.config.clone()))
            })
            .clone()
    }

    pub async fn all_metrics(&self) -> HashMap<String, BreakerMetrics> {
        let breakers = self.breakers.read().await;
        let mut metrics = HashMap::new();
        for (name, breaker) in breakers.iter() {
            metrics.insert(name.clone(), breaker.metrics().await);
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            rolling_window: Duration::from_secs(60),
            cool_down: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("agent-a", fast_config());

        for _ in 0..4 {
            assert_eq!(breaker.admit().await, Admission::Allowed);
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(breaker.admit().await, Admission::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("agent-a", fast_config());

        for _ in 0..4 {
            breaker.record_failure().await;
        }
        breaker.record_success().await;
        for _ in 0..4 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_count() {
        let breaker = CircuitBreaker::new("agent-a", fast_config());

        for _ in 0..4 {
            breaker.record_failure().await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.metrics().await.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_cool_down() {
        let breaker = CircuitBreaker::new("agent-a", fast_config());

        for _ in 0..5 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.admit().await, Admission::Rejected);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.admit().await, Admission::Probe);
        // Only one probe until its outcome is recorded.
        assert_eq!(breaker.admit().await, Admission::Rejected);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.admit().await, Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_with_fresh_timer() {
        let breaker = CircuitBreaker::new("agent-a", fast_config());

        for _ in 0..5 {
            breaker.record_failure().await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.admit().await, Admission::Probe);
        breaker.record_failure().await;

        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(breaker.admit().await, Admission::Rejected);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.admit().await, Admission::Probe);
    }

    #[tokio::test]
    async fn test_registry_is_per_agent() {
        let registry = BreakerRegistry::new(fast_config());
        let a = registry.breaker_for("agent-a").await;
        let b = registry.breaker_for("agent-b").await;

        for _ in 0..5 {
            a.record_failure().await;
        }
        assert_eq!(a.state().await, CircuitState::Open);
        assert_eq!(b.state().await, CircuitState::Closed);

        // Same name resolves to the same breaker.
        let a_again = registry.breaker_for("agent-a").await;
        assert_eq!(a_again.state().await, CircuitState::Open);
    }
}
