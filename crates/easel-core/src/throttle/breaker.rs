//! Per-endpoint circuit breaker.
//!
//! # States
//! - Closed: normal operation, dispatches pass through
//! - Open: endpoint assumed down, dispatches blocked until the cooldown ends
//! - Half-Open: exactly one probe dispatch permitted
//!
//! # Transitions
//! ```text
//! Closed → Open: threshold consecutive failures
//! Open → Half-Open: cooldown elapsed (on the next check)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails, cooldown doubles (capped)
//! ```
//!
//! While open the worker must not even attempt dispatch; a blocked check is
//! a requeue, never a consumed retry attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of one pre-dispatch check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Dispatch may go out.
    Proceed,

    /// Dispatch may go out as the single half-open probe. The holder must
    /// report back via `on_success`/`on_failure`, or `abandon_probe` if the
    /// dispatch never starts; an unreported probe keeps the circuit blocked.
    Probe,

    /// Circuit is open; earliest instant a probe could run is `retry_after`
    /// from now.
    Blocked { retry_after: Duration },
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    reopen_at: Option<DateTime<Utc>>,
    cooldown: TimeDelta,
    probe_in_flight: bool,
}

impl Circuit {
    fn new(cooldown: TimeDelta) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            reopen_at: None,
            cooldown,
            probe_in_flight: false,
        }
    }
}

pub struct CircuitBreaker {
    threshold: u32,
    base_cooldown: TimeDelta,
    max_cooldown: TimeDelta,
    clock: Arc<dyn Clock>,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitBreaker {
    pub fn new(
        threshold: u32,
        cooldown: Duration,
        max_cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            threshold,
            base_cooldown: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
            max_cooldown: TimeDelta::from_std(max_cooldown).unwrap_or(TimeDelta::MAX),
            clock,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// May a dispatch to `endpoint` go out right now? Transitioning from
    /// Open to Half-Open happens here, and the transition hands out exactly
    /// one probe; concurrent checks stay blocked until the probe reports.
    pub fn check(&self, endpoint: &str) -> Verdict {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock().expect("breaker mutex poisoned");
        let Some(circuit) = circuits.get_mut(endpoint) else {
            return Verdict::Proceed;
        };

        match circuit.state {
            CircuitState::Closed => Verdict::Proceed,
            CircuitState::Open => match circuit.reopen_at {
                Some(reopen_at) if now >= reopen_at => {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    Verdict::Probe
                }
                Some(reopen_at) => Verdict::Blocked {
                    retry_after: (reopen_at - now).to_std().unwrap_or(Duration::ZERO),
                },
                // Open without a reopen time should not happen; fail safe by
                // probing immediately.
                None => {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    Verdict::Probe
                }
            },
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    Verdict::Blocked {
                        retry_after: Duration::ZERO,
                    }
                } else {
                    circuit.probe_in_flight = true;
                    Verdict::Probe
                }
            }
        }
    }

    /// The probe holder bailed before dispatching (a later admission gate
    /// refused, or the attempt could not be persisted). Frees the probe slot
    /// so a subsequent check hands out a fresh probe; an unreleased probe
    /// would block the endpoint indefinitely.
    pub fn abandon_probe(&self, endpoint: &str) {
        let mut circuits = self.circuits.lock().expect("breaker mutex poisoned");
        if let Some(circuit) = circuits.get_mut(endpoint)
            && circuit.state == CircuitState::HalfOpen
        {
            circuit.probe_in_flight = false;
        }
    }

    /// A dispatch to `endpoint` succeeded.
    pub fn on_success(&self, endpoint: &str) {
        let mut circuits = self.circuits.lock().expect("breaker mutex poisoned");
        if let Some(circuit) = circuits.get_mut(endpoint) {
            circuit.state = CircuitState::Closed;
            circuit.consecutive_failures = 0;
            circuit.reopen_at = None;
            circuit.cooldown = self.base_cooldown;
            circuit.probe_in_flight = false;
        }
    }

    /// A dispatch to `endpoint` failed.
    pub fn on_failure(&self, endpoint: &str) {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock().expect("breaker mutex poisoned");
        let circuit = circuits
            .entry(endpoint.to_string())
            .or_insert_with(|| Circuit::new(self.base_cooldown));

        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.threshold {
                    circuit.state = CircuitState::Open;
                    circuit.reopen_at = Some(now + circuit.cooldown);
                }
            }
            CircuitState::HalfOpen => {
                // Failed probe: back to open, cooldown grows.
                circuit.cooldown = std::cmp::min(circuit.cooldown * 2, self.max_cooldown);
                circuit.state = CircuitState::Open;
                circuit.reopen_at = Some(now + circuit.cooldown);
                circuit.probe_in_flight = false;
                circuit.consecutive_failures += 1;
            }
            CircuitState::Open => {
                // Late failure report from a dispatch that started before the
                // circuit opened; the cooldown already covers it.
                circuit.consecutive_failures += 1;
            }
        }
    }

    pub fn state(&self, endpoint: &str) -> CircuitState {
        let circuits = self.circuits.lock().expect("breaker mutex poisoned");
        circuits
            .get(endpoint)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Current state of every endpoint that has seen at least one failure.
    pub fn states(&self) -> HashMap<String, CircuitState> {
        let circuits = self.circuits.lock().expect("breaker mutex poisoned");
        circuits
            .iter()
            .map(|(endpoint, c)| (endpoint.clone(), c.state))
            .collect()
    }
}
