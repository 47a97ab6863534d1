//! Queue manager: the orchestrator.
//!
//! Owns every request-record state transition. Callers enqueue and get an id
//! back immediately; the worker group does the dispatching; `status`, `wait`,
//! `cancel` and `snapshot` are the read/control surface. All waits inside the
//! workers are cancellable through the shutdown signal so the process drains
//! gracefully.

mod sweeper;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::info;

use crate::config::QueueConfig;
use crate::domain::{Priority, RequestId, RequestRecord};
use crate::error::QueueError;
use crate::ports::{Clock, ImageClient, QueueStore};
use crate::throttle::{CircuitBreaker, CircuitState, RateLimiter};
use worker::WorkerGroup;

/// Parameters for one enqueue call. The payload is trusted as-is: validation
/// belongs to the protocol front-end, not the queue.
#[derive(Debug, Clone)]
pub struct NewRequest {
    endpoint: String,
    payload: serde_json::Value,
    priority: i32,
    max_attempts: Option<u32>,
}

impl NewRequest {
    pub fn new(endpoint: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            payload,
            priority: Priority::Normal.weight(),
            max_attempts: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority.weight();
        self
    }

    /// Arbitrary numeric priority; higher dispatches first.
    pub fn priority_weight(mut self, weight: i32) -> Self {
        self.priority = weight;
        self
    }

    /// Override the retry budget for this request.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Aggregate operational snapshot for the front-end.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub pending_count: usize,
    pub in_progress_count: usize,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,

    /// Dispatch slots left in the current rate window.
    pub budget_remaining: usize,

    /// Estimated wait until a dispatch would be permitted; zero when the
    /// budget has room.
    pub estimated_wait: Duration,

    /// Circuit state per endpoint that has seen at least one failure.
    pub circuits: HashMap<String, CircuitState>,
}

/// State shared between the manager handle and its background loops.
pub(crate) struct Shared {
    pub(crate) config: QueueConfig,
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) client: Arc<dyn ImageClient>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) limiter: RateLimiter,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) wake: Notify,
}

pub struct QueueManager {
    shared: Arc<Shared>,
    workers: Mutex<Option<WorkerGroup>>,
}

impl QueueManager {
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn QueueStore>,
        client: Arc<dyn ImageClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(config.max_per_window, config.window, Arc::clone(&clock));
        let breaker = CircuitBreaker::new(
            config.breaker_threshold,
            config.breaker_cooldown,
            config.breaker_max_cooldown,
            Arc::clone(&clock),
        );
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                client,
                clock,
                limiter,
                breaker,
                wake: Notify::new(),
            }),
            workers: Mutex::new(None),
        }
    }

    /// Run the startup recovery pass and spawn the workers and the sweeper.
    /// Idempotent: a second call on a running queue does nothing.
    pub async fn start(&self) -> Result<(), QueueError> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return Ok(());
        }

        let now = self.shared.clock.now();
        let recovered = self.shared.store.recover(now).await?;
        if recovered > 0 {
            info!(recovered, "reset in-progress records from a previous run");
        }

        *workers = Some(WorkerGroup::spawn(Arc::clone(&self.shared)));
        info!(workers = self.shared.config.workers, "queue started");
        Ok(())
    }

    /// Stop taking new leases and drain. In-flight dispatches complete.
    pub async fn shutdown(&self) {
        if let Some(group) = self.workers.lock().await.take() {
            group.shutdown_and_join().await;
            info!("queue stopped");
        }
    }

    /// Persist a new request and return its id immediately.
    pub async fn enqueue(&self, request: NewRequest) -> Result<RequestId, QueueError> {
        let now = self.shared.clock.now();
        let id = RequestId::generate();
        let max_attempts = request
            .max_attempts
            .unwrap_or(self.shared.config.retry.max_attempts);
        let record = RequestRecord::new(
            id,
            request.endpoint,
            request.payload,
            request.priority,
            max_attempts,
            now,
        );

        self.shared
            .store
            .insert(record, self.shared.config.max_pending)
            .await?;
        info!(%id, priority = request.priority, "request enqueued");

        self.shared.wake.notify_one();
        Ok(id)
    }

    /// Read-only snapshot of one record. Never blocks on dispatch.
    pub async fn status(&self, id: RequestId) -> Result<RequestRecord, QueueError> {
        self.shared
            .store
            .get(id)
            .await?
            .ok_or(QueueError::NotFound(id))
    }

    /// Cancel a still-pending request. In-flight dispatch cannot be
    /// preempted, only allowed to complete.
    pub async fn cancel(&self, id: RequestId) -> Result<(), QueueError> {
        let now = self.shared.clock.now();
        self.shared.store.cancel(id, now).await?;
        info!(%id, "request cancelled");
        Ok(())
    }

    /// Poll until the request reaches a terminal state.
    pub async fn wait(
        &self,
        id: RequestId,
        timeout: Option<Duration>,
    ) -> Result<RequestRecord, QueueError> {
        let started = tokio::time::Instant::now();
        loop {
            let record = self.status(id).await?;
            if record.state.is_terminal() {
                return Ok(record);
            }
            if let Some(timeout) = timeout
                && started.elapsed() >= timeout
            {
                return Err(QueueError::WaitTimeout { id, timeout });
            }
            tokio::time::sleep(self.shared.config.wait_poll_interval).await;
        }
    }

    /// Aggregate operational visibility.
    pub async fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        let counts = self.shared.store.counts().await?;
        Ok(QueueSnapshot {
            pending_count: counts.pending,
            in_progress_count: counts.in_progress,
            succeeded_count: counts.succeeded,
            failed_count: counts.failed,
            cancelled_count: counts.cancelled,
            budget_remaining: self.shared.limiter.remaining(),
            estimated_wait: self.shared.limiter.estimated_wait(),
            circuits: self.shared.breaker.states(),
        })
    }

    /// Shared throttle state, mainly for tests and diagnostics.
    pub fn limiter(&self) -> &RateLimiter {
        &self.shared.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.shared.breaker
    }
}
