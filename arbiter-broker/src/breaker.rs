//! Three-state failure isolation around broker calls.
//!
//! State transitions use compare-and-swap so a timing-out half-open
//! probe can never race concurrent fast-fail callers into a second
//! trial call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{BrokerError, BrokerResult};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Observable state of the breaker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tuning knobs for the breaker.
#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    /// Infrastructure failures within the window before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call.
    pub cooldown: Duration,
    /// Sliding window over which failures are counted.
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
        }
    }
}

/// Proof that the breaker admitted a call. Must be handed back through
/// [`CircuitBreaker::record_success`] or [`CircuitBreaker::record_failure`].
#[derive(Debug)]
pub struct Permit {
    probe: bool,
}

impl Permit {
    /// Whether this permit is the single half-open trial call.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

struct Window {
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
}

/// Protective state machine that stops calling a failing broker until it
/// is likely healthy again.
pub struct CircuitBreaker {
    state: AtomicU8,
    config: CircuitBreakerConfig,
    window: Mutex<Window>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            config,
            window: Mutex::new(Window {
                failures: VecDeque::new(),
                opened_at: None,
            }),
        }
    }

    /// Current state, for telemetry and tests.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            OPEN => CircuitState::Open,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Admit or fast-fail a prospective call.
    ///
    /// While open, callers fail with [`BrokerError::CircuitOpen`] until
    /// the cooldown expires; the first caller after that wins the CAS and
    /// receives the single probe permit.
    pub fn try_acquire(&self) -> BrokerResult<Permit> {
        match self.state.load(Ordering::Acquire) {
            CLOSED => Ok(Permit { probe: false }),
            OPEN => {
                let cooled_down = {
                    let window = self.window.lock().expect("breaker lock poisoned");
                    window
                        .opened_at
                        .map(|at| at.elapsed() >= self.config.cooldown)
                        .unwrap_or(true)
                };
                if cooled_down
                    && self
                        .state
                        .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    info!("circuit cooldown elapsed, admitting trial call");
                    Ok(Permit { probe: true })
                } else {
                    Err(BrokerError::CircuitOpen)
                }
            }
            _ => Err(BrokerError::CircuitOpen),
        }
    }

    /// Report a successful call made under `permit`.
    pub fn record_success(&self, permit: Permit) {
        if permit.probe {
            let mut window = self.window.lock().expect("breaker lock poisoned");
            window.failures.clear();
            window.opened_at = None;
            self.state.store(CLOSED, Ordering::Release);
            info!("trial call succeeded, circuit closed");
        }
    }

    /// Report an infrastructure failure for a call made under `permit`.
    pub fn record_failure(&self, permit: Permit) {
        let now = Instant::now();
        let mut window = self.window.lock().expect("breaker lock poisoned");
        if permit.probe {
            window.opened_at = Some(now);
            self.state.store(OPEN, Ordering::Release);
            warn!("trial call failed, circuit reopened");
            return;
        }
        window.failures.push_back(now);
        while window
            .failures
            .front()
            .map(|at| now.duration_since(*at) > self.config.failure_window)
            .unwrap_or(false)
        {
            window.failures.pop_front();
        }
        if window.failures.len() as u32 >= self.config.failure_threshold
            && self
                .state
                .compare_exchange(CLOSED, OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            window.opened_at = Some(now);
            window.failures.clear();
            warn!(
                threshold = self.config.failure_threshold,
                cooldown_secs = self.config.cooldown.as_secs(),
                "failure threshold reached, circuit opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(20),
            failure_window: Duration::from_secs(60),
        }
    }

    fn trip(breaker: &CircuitBreaker) {
        for _ in 0..3 {
            let permit = breaker.try_acquire().expect("closed breaker admits calls");
            breaker.record_failure(permit);
        }
    }

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(quick_config());
        trip(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            breaker.try_acquire(),
            Err(BrokerError::CircuitOpen)
        ));
    }

    #[test]
    fn exactly_one_probe_after_cooldown() {
        let breaker = CircuitBreaker::new(quick_config());
        trip(&breaker);
        std::thread::sleep(Duration::from_millis(30));

        let probe = breaker.try_acquire().expect("cooldown elapsed");
        assert!(probe.is_probe());
        // A concurrent caller must still be failed fast while the probe
        // is in flight.
        assert!(matches!(
            breaker.try_acquire(),
            Err(BrokerError::CircuitOpen)
        ));
        breaker.record_success(probe);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_reopens_the_circuit() {
        let breaker = CircuitBreaker::new(quick_config());
        trip(&breaker);
        std::thread::sleep(Duration::from_millis(30));

        let probe = breaker.try_acquire().expect("cooldown elapsed");
        breaker.record_failure(probe);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            breaker.try_acquire(),
            Err(BrokerError::CircuitOpen)
        ));
    }

    #[test]
    fn success_in_closed_state_keeps_circuit_closed() {
        let breaker = CircuitBreaker::new(quick_config());
        let permit = breaker.try_acquire().unwrap();
        breaker.record_success(permit);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
