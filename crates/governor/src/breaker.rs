//! Circuit breaker around the model backend.
//!
//! Closed counts consecutive failures and opens at the configured threshold;
//! Open fails fast until the cooldown elapses, then half-opens; HalfOpen lets
//! probe calls through and closes after enough consecutive successes, or
//! reopens on the first failure.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use tally_core::GovernorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
}

struct BreakerSlot {
    state: CircuitState,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    backend_name: String,
    config: BreakerConfig,
    slot: RwLock<BreakerSlot>,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(backend_name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            backend_name: backend_name.into(),
            config,
            slot: RwLock::new(BreakerSlot { state: CircuitState::Closed, opened_at: None }),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.slot.read() {
            Ok(slot) => slot.state,
            Err(poisoned) => poisoned.into_inner().state,
        }
    }

    /// Gate a call. `Ok` means proceed (Closed, or a HalfOpen probe);
    /// `CircuitOpen` means fail fast without touching the network.
    pub fn check(&self) -> Result<(), GovernorError> {
        let (state, cooled_down) = {
            let slot = match self.slot.read() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            let cooled_down = slot
                .opened_at
                .map(|opened_at| opened_at.elapsed() >= self.config.cooldown)
                .unwrap_or(true);
            (slot.state, cooled_down)
        };

        match state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open if cooled_down => {
                self.transition(CircuitState::HalfOpen);
                Ok(())
            }
            CircuitState::Open => {
                Err(GovernorError::CircuitOpen { backend: self.backend_name.clone() })
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.transition(CircuitState::Closed);
                    info!(backend = %self.backend_name, "circuit closed after recovery probes");
                }
            }
            CircuitState::Open => {
                debug!(backend = %self.backend_name, "success recorded while circuit open");
            }
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition(CircuitState::Open);
                    warn!(
                        backend = %self.backend_name,
                        consecutive_failures = failures,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.transition(CircuitState::Open);
                warn!(backend = %self.backend_name, "probe failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, next: CircuitState) {
        let mut slot = match self.slot.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.state = next;
        slot.opened_at = match next {
            CircuitState::Open => Some(Instant::now()),
            CircuitState::Closed | CircuitState::HalfOpen => slot.opened_at,
        };
        match next {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.half_open_successes.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                self.half_open_successes.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }
}
