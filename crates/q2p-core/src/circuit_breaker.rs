//! Circuit breaker for catalog calls.
//!
//! Only transport-level failures trip the breaker. Answers such as "not
//! found" or a schema conflict mean the service is reachable and count as
//! successes.

use crate::error::ErrorClass;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls proceed normally
    Closed,
    /// Calls are rejected without being attempted
    Open,
    /// Probe calls are let through
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time spent open before probing
    pub reset_timeout: Duration,
    /// Probe successes required to close
    pub success_threshold: u32,
    /// Name for logging
    pub name: String,
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            name: name.into(),
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
}

/// Circuit breaker guarding one remote dependency.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        debug!(name = %config.name, "Circuit breaker created");
        Self {
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may be attempted now. Moves an expired open circuit
    /// to half-open.
    pub fn is_allowed(&self) -> bool {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = state
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if expired {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    info!(name = %self.config.name, "Circuit breaker half-open");
                }
                expired
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                    info!(name = %self.config.name, "Circuit breaker closed");
                }
            }
            CircuitState::Closed | CircuitState::Open => {
                state.failure_count = 0;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failure_count += 1;

        match state.state {
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                warn!(
                    name = %self.config.name,
                    failures = state.failure_count,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.opened_at = Some(Instant::now());
                warn!(name = %self.config.name, "Circuit breaker reopened");
            }
            _ => {}
        }
    }

    /// Record the outcome of a call by its error class.
    pub fn record_outcome(&self, class: Option<ErrorClass>) {
        match class {
            Some(ErrorClass::Retryable) => self.record_failure(),
            _ => self.record_success(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();
        CircuitSnapshot {
            name: self.config.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
        }
    }
}
