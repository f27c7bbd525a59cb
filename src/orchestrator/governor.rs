//! Semaphore-bounded concurrency with a throughput-driven tuning loop.
//!
//! The governor caps concurrent agent executions at `W` permits. A
//! background loop compares observed dequeue throughput against the
//! configured target and nudges `W` up or down one permit at a time,
//! staying inside `[min_permits, max_permits]`. Bound changes never block
//! caller paths; they take effect on the next acquire/release.

use crate::{config::GovernorConfig, orchestrator::queue::PriorityTaskQueue, AssistError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct ConcurrencyGovernor {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
    config: GovernorConfig,
}

/// One execution slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct GovernorPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.initial_permits)),
            limit: AtomicUsize::new(config.initial_permits),
            config,
        }
    }

    /// Block until a slot is free or `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GovernorPermit> {
        tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => {
                let permit = permit.map_err(|_| {
                    AssistError::ServiceUnavailable("concurrency governor closed".to_string())
                })?;
                Ok(GovernorPermit { _permit: permit })
            }
            _ = cancel.cancelled() => Err(AssistError::Cancelled),
        }
    }

    pub fn current_limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Raise the bound by one permit.
    fn grow(&self) {
        let limit = self.limit.load(Ordering::Relaxed);
        if limit >= self.config.max_permits {
            return;
        }
        self.limit.store(limit + 1, Ordering::Relaxed);
        self.semaphore.add_permits(1);
        info!("Governor raised concurrency bound to {}", limit + 1);
    }

    /// Lower the bound by one permit. If every permit is in use the
    /// withdrawal completes asynchronously once a slot frees up.
    fn shrink(&self) {
        let limit = self.limit.load(Ordering::Relaxed);
        if limit <= self.config.min_permits {
            return;
        }
        self.limit.store(limit - 1, Ordering::Relaxed);

        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit.forget(),
            Err(_) => {
                let semaphore = Arc::clone(&self.semaphore);
                tokio::spawn(async move {
                    if let Ok(permit) = semaphore.acquire_owned().await {
                        permit.forget();
                    }
                });
            }
        }
        info!("Governor lowered concurrency bound to {}", limit - 1);
    }

    /// Start the auto-tuning loop. Runs until `shutdown` fires.
    pub fn spawn_tuner(
        self: &Arc<Self>,
        queue: Arc<PriorityTaskQueue>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let governor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(governor.config.tune_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let throughput = queue.stats().await.throughput_per_minute;
                        governor.tune(throughput);
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Governor tuner shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// One tuning step against the observed throughput.
    pub fn tune(&self, throughput_per_minute: f64) {
        let target = self.config.target_throughput_per_min;
        if throughput_per_minute < 0.8 * target {
            self.grow();
        } else if throughput_per_minute > 1.2 * target {
            self.shrink();
        }
    }
}
