//! Dispatch workers.
//!
//! A small fixed pool pulls eligible records from the store one at a time:
//! claim -> circuit gate -> rate gate -> dispatch -> persist outcome. Both
//! gates resolve to "requeue and sleep"; that polling backpressure is the
//! sole coordination point, which keeps the store lock narrow and means one
//! slow dispatch never blocks enqueue or status queries.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Shared;
use crate::domain::{DispatchError, DispatchFailure, RequestRecord};
use crate::throttle::{Admission, Verdict};

/// Handle over the spawned workers and the lease sweeper.
/// Dropping the sender side of `shutdown_tx` stops all of them.
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub(crate) fn spawn(shared: Arc<Shared>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(shared.config.workers + 1);
        for worker_id in 0..shared.config.workers {
            let shared = Arc::clone(&shared);
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, shared, &mut rx).await;
            }));
        }

        let mut rx = shutdown_rx;
        let sweep_shared = Arc::clone(&shared);
        joins.push(tokio::spawn(async move {
            super::sweeper::sweeper_loop(sweep_shared, &mut rx).await;
        }));

        Self { shutdown_tx, joins }
    }

    /// Request shutdown. In-flight dispatches are not aborted; workers stop
    /// taking new leases and drain.
    pub(crate) fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<Shared>, shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let now = shared.clock.now();
        let lease_ttl = TimeDelta::from_std(shared.config.lease_ttl).unwrap_or(TimeDelta::MAX);
        let claimed = match shared.store.claim_next(now, now + lease_ttl).await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(worker_id, error = %e, "claim failed");
                pause(&shared, shutdown_rx, shared.config.poll_interval).await;
                continue;
            }
        };

        let Some(mut record) = claimed else {
            idle(&shared, shutdown_rx).await;
            continue;
        };

        // Circuit gate. Checked before the rate budget so an open circuit
        // never burns budget on a dispatch that will not go out.
        let verdict = shared.breaker.check(&record.endpoint);
        if let Verdict::Blocked { retry_after } = verdict {
            debug!(worker_id, id = %record.id, endpoint = %record.endpoint, "circuit open, requeueing");
            requeue(&shared, record, None).await;
            pause(&shared, shutdown_rx, retry_after).await;
            continue;
        }
        // A granted probe must be released on every path that does not end
        // in on_success/on_failure, or the endpoint stays blocked for good.
        let holds_probe = verdict == Verdict::Probe;

        // Rate gate. A permit records the dispatch-start timestamp, so from
        // here on the attempt is committed against the budget.
        if let Admission::Throttled { retry_after } = shared.limiter.try_acquire() {
            debug!(worker_id, id = %record.id, ?retry_after, "rate budget exhausted, requeueing");
            if holds_probe {
                shared.breaker.abandon_probe(&record.endpoint);
            }
            requeue(&shared, record, None).await;
            pause(&shared, shutdown_rx, retry_after).await;
            continue;
        }

        // Persist the consumed attempt before calling out, so a crash
        // mid-call still counts it.
        record.begin_dispatch(shared.clock.now());
        if let Err(e) = shared.store.update(record.clone()).await {
            error!(worker_id, id = %record.id, error = %e, "failed to persist attempt start");
            if holds_probe {
                shared.breaker.abandon_probe(&record.endpoint);
            }
            continue; // lease expires, the sweeper reclaims it
        }

        dispatch(&shared, worker_id, record).await;
    }
}

/// One dispatch attempt, outcome written back to the store.
async fn dispatch(shared: &Arc<Shared>, worker_id: usize, mut record: RequestRecord) {
    let outcome = match tokio::time::timeout(
        shared.config.dispatch_timeout,
        shared.client.generate(&record.endpoint, &record.payload),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout(shared.config.dispatch_timeout)),
    };

    let now = shared.clock.now();
    match outcome {
        Ok(output) => {
            shared.breaker.on_success(&record.endpoint);
            info!(worker_id, id = %record.id, attempts = record.attempts, "request succeeded");
            record.complete(now, output);
        }
        Err(err) => {
            shared.breaker.on_failure(&record.endpoint);
            if err.is_retryable() && record.attempts_remaining() {
                let delay = shared.config.retry.next_delay(record.attempts);
                warn!(
                    worker_id,
                    id = %record.id,
                    attempt = record.attempts,
                    error = %err,
                    ?delay,
                    "retryable failure, backing off"
                );
                let eligible_at = now + TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
                record.release(Some(eligible_at));
            } else if err.is_retryable() {
                warn!(worker_id, id = %record.id, attempts = record.attempts, error = %err, "retries exhausted");
                record.fail(now, DispatchFailure::exhausted(&err, record.attempts));
            } else {
                warn!(worker_id, id = %record.id, error = %err, "permanent failure");
                record.fail(now, DispatchFailure::permanent(&err));
            }
        }
    }

    if let Err(e) = shared.store.update(record).await {
        error!(worker_id, error = %e, "failed to persist dispatch outcome");
    }
}

/// Release a claimed record back to pending without consuming an attempt.
async fn requeue(
    shared: &Arc<Shared>,
    mut record: RequestRecord,
    eligible_at: Option<chrono::DateTime<chrono::Utc>>,
) {
    let id = record.id;
    record.release(eligible_at);
    if let Err(e) = shared.store.update(record).await {
        error!(id = %id, error = %e, "failed to requeue record");
    }
}

/// Nothing eligible: wait for an enqueue, the poll tick, or shutdown.
async fn idle(shared: &Arc<Shared>, shutdown_rx: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = shutdown_rx.changed() => {}
        _ = shared.wake.notified() => {}
        _ = tokio::time::sleep(shared.config.poll_interval) => {}
    }
}

/// Gate wait: sleep until the reported retry time or the next poll tick,
/// whichever is sooner. Cancellable by shutdown.
async fn pause(shared: &Arc<Shared>, shutdown_rx: &mut watch::Receiver<bool>, retry_after: Duration) {
    let nap = gate_nap(retry_after, shared.config.poll_interval);
    tokio::select! {
        _ = shutdown_rx.changed() => {}
        _ = tokio::time::sleep(nap) => {}
    }
}

/// A blocked gate may report `retry_after` of zero (a probe is in flight and
/// there is no known retry instant); treat that as a full poll tick so the
/// claim/requeue loop never spins.
fn gate_nap(retry_after: Duration, poll_interval: Duration) -> Duration {
    if retry_after.is_zero() {
        poll_interval
    } else {
        retry_after.min(poll_interval)
    }
}
