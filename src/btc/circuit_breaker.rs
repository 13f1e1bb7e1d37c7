//! Per-endpoint circuit breaker: Closed → Open → Half-Open.
//!
//! - `Closed` → `Open`: `failure_threshold` consecutive failures
//! - `Open` → `Half-Open`: `open_duration` has elapsed
//! - `Half-Open` → `Closed`: the trial request succeeds
//! - `Half-Open` → `Open`: the trial request fails, the timer restarts

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker, used for health snapshots.
#[derive(Debug, Clone)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    /// Set while a caller holds the single half-open trial.
    trial_started: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitInner>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_owned(),
            config,
            inner: Arc::new(Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_failure_time: None,
                trial_started: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn advance(&self, inner: &mut CircuitInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started = None;
                    info!("Circuit breaker half-open: endpoint={}", self.name);
                }
            }
        }
    }

    /// Current state, moving Open → HalfOpen once the open duration elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.advance(&mut inner);
        inner.state
    }

    /// Whether a request may go to the endpoint. In half-open only one caller
    /// gets the trial; it must end with `record_success`, `record_failure` or
    /// `release_trial`. A trial never resolved expires after `open_duration`.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.lock();
        self.advance(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let busy = inner
                    .trial_started
                    .is_some_and(|started| started.elapsed() < self.config.open_duration);
                if busy {
                    return false;
                }
                inner.trial_started = Some(Instant::now());
                true
            }
        }
    }

    /// Gives the half-open trial back without judging the endpoint.
    pub fn release_trial(&self) {
        self.lock().trial_started = None;
    }

    pub fn status(&self) -> CircuitStatus {
        let state = self.state();
        let inner = self.lock();
        CircuitStatus {
            state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_time: inner.last_failure_time,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!("Circuit breaker closed: endpoint={}", self.name);
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_started = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        inner.last_failure_time = Some(Utc::now());
        inner.trial_started = None;
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        "Circuit breaker open: endpoint={} failures={}",
                        self.name, inner.consecutive_failures
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker trial failed, open again: endpoint={}", self.name);
            }
            CircuitState::Open => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cb(threshold: u32, open: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_duration: open,
            },
        )
    }

    #[test]
    fn opens_after_threshold_failures() {
        let c = cb(3, Duration::from_secs(60));
        c.record_failure();
        c.record_failure();
        assert_eq!(c.state(), CircuitState::Closed);
        c.record_failure();
        assert_eq!(c.state(), CircuitState::Open);
        assert!(!c.is_allowed());
        assert_eq!(c.status().consecutive_failures, 3);
        assert!(c.status().last_failure_time.is_some());
    }

    #[test]
    fn success_resets_failure_count() {
        let c = cb(3, Duration::from_secs(60));
        c.record_failure();
        c.record_failure();
        c.record_success();
        c.record_failure();
        c.record_failure();
        assert_eq!(c.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_open_duration() {
        let c = cb(1, Duration::from_millis(20));
        c.record_failure();
        assert_eq!(c.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(c.state(), CircuitState::HalfOpen);

        c.record_success();
        assert_eq!(c.state(), CircuitState::Closed);
        assert_eq!(c.status().consecutive_failures, 0);
    }

    #[test]
    fn failed_trial_reopens_and_restarts_timer() {
        let c = cb(1, Duration::from_millis(20));
        c.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(c.state(), CircuitState::HalfOpen);

        c.record_failure();
        assert_eq!(c.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(c.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_admits_a_single_trial() {
        let c = cb(1, Duration::from_millis(20));
        c.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(c.is_allowed());
        assert!(!c.is_allowed(), "second caller must wait for the trial");
        assert_eq!(c.state(), CircuitState::HalfOpen);

        c.release_trial();
        assert!(c.is_allowed());
        c.record_success();
        assert!(c.is_allowed());
        assert!(c.is_allowed());
    }

    #[test]
    fn abandoned_trial_expires() {
        let c = cb(1, Duration::from_millis(20));
        c.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(c.is_allowed());
        assert!(!c.is_allowed());
        std::thread::sleep(Duration::from_millis(30));
        assert!(c.is_allowed());
    }
}
