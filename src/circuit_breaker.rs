use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub failure_rate: f64,
    pub total_calls: u32,
    pub failed_calls: u32,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_attempt_in_ms: Option<u64>,
}

enum State {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

struct Inner {
    state: State,
    // (time, failed) outcomes inside the monitoring window
    window: VecDeque<(Instant, bool)>,
    last_failure_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    name: String,
    failure_rate_threshold: f64,
    minimum_calls: u32,
    monitoring_window: Duration,
    reset_timeout: Duration,
    success_threshold: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_rate_threshold: config.failure_rate_threshold,
            minimum_calls: config.minimum_calls.max(1),
            monitoring_window: Duration::from_millis(config.monitoring_window_ms),
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            success_threshold: config.success_threshold.max(1),
            inner: Mutex::new(Inner {
                state: State::Closed {
                    consecutive_failures: 0,
                },
                window: VecDeque::new(),
                last_failure_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        match self.inner.lock().state {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    // Moves OPEN to HALF_OPEN once the reset timeout has elapsed
    pub fn should_allow_call(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed { .. } | State::HalfOpen { .. } => true,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    tracing::info!(circuit = %self.name, "circuit half-open, probing");
                    inner.state = State::HalfOpen { successes: 0 };
                    true
                } else {
                    false
                }
            }
        }
    }

    // Time left before an OPEN circuit lets a trial call through
    pub fn retry_after(&self) -> Duration {
        match self.inner.lock().state {
            State::Open { opened_at } => self.reset_timeout.saturating_sub(opened_at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = Instant::now();
        self.push_outcome(inner, now, false);

        match &mut inner.state {
            State::Closed {
                consecutive_failures,
            } => *consecutive_failures = 0,
            State::HalfOpen { successes } => {
                *successes += 1;
                if *successes >= self.success_threshold {
                    tracing::info!(circuit = %self.name, "circuit closed");
                    inner.state = State::Closed {
                        consecutive_failures: 0,
                    };
                    // stale failures must not reopen the fresh circuit
                    inner.window.clear();
                }
            }
            State::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = Instant::now();
        self.push_outcome(inner, now, true);
        inner.last_failure_at = Some(Utc::now());

        match &mut inner.state {
            State::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                let (total, failed) = Self::counts(&inner.window);
                let rate = failed as f64 / total as f64;
                if total >= self.minimum_calls && rate >= self.failure_rate_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failure_rate = rate,
                        calls = total,
                        "circuit opened"
                    );
                    inner.state = State::Open { opened_at: now };
                }
            }
            State::HalfOpen { .. } => {
                tracing::warn!(circuit = %self.name, "trial call failed, circuit reopened");
                inner.state = State::Open { opened_at: now };
            }
            State::Open { .. } => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = State::Closed {
            consecutive_failures: 0,
        };
        inner.window.clear();
        inner.last_failure_at = None;
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.trim(&mut inner.window, now);

        let (total, failed) = Self::counts(&inner.window);
        let (state, consecutive_failures, next_attempt_in_ms) = match inner.state {
            State::Closed {
                consecutive_failures,
            } => (CircuitState::Closed, consecutive_failures, None),
            State::Open { opened_at } => (
                CircuitState::Open,
                0,
                Some(self.reset_timeout.saturating_sub(opened_at.elapsed()).as_millis() as u64),
            ),
            State::HalfOpen { .. } => (CircuitState::HalfOpen, 0, None),
        };

        CircuitMetrics {
            state,
            failure_rate: if total == 0 {
                0.0
            } else {
                failed as f64 / total as f64
            },
            total_calls: total,
            failed_calls: failed,
            consecutive_failures,
            last_failure_at: inner.last_failure_at,
            next_attempt_in_ms,
        }
    }

    fn push_outcome(&self, inner: &mut Inner, now: Instant, failed: bool) {
        inner.window.push_back((now, failed));
        self.trim(&mut inner.window, now);
    }

    fn trim(&self, window: &mut VecDeque<(Instant, bool)>, now: Instant) {
        while let Some((t, _)) = window.front() {
            if now.saturating_duration_since(*t) > self.monitoring_window {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    fn counts(window: &VecDeque<(Instant, bool)>) -> (u32, u32) {
        let failed = window.iter().filter(|(_, failed)| *failed).count() as u32;
        (window.len() as u32, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn breaker(min_calls: u32, reset_ms: u64, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            &CircuitBreakerConfig {
                failure_rate_threshold: 0.5,
                minimum_calls: min_calls,
                monitoring_window_ms: 60_000,
                reset_timeout_ms: reset_ms,
                success_threshold,
            },
        )
    }

    #[test]
    fn test_stays_closed_without_enough_calls() {
        let cb = breaker(5, 1_000, 2);
        for _ in 0..4 {
            cb.record_failure();
        }
        assert!(cb.is_closed());
        assert_eq!(cb.metrics().consecutive_failures, 4);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow_call());
    }

    #[test]
    fn test_opens_on_failure_rate() {
        let cb = breaker(4, 1_000, 2);
        cb.record_success();
        cb.record_success();
        cb.record_failure();
        // 1 of 3, not enough calls yet
        assert!(cb.is_closed());
        cb.record_failure();
        // 2 of 4 = 50%
        assert_eq!(cb.state(), CircuitState::Open);

        let metrics = cb.metrics();
        assert_eq!(metrics.total_calls, 4);
        assert_eq!(metrics.failed_calls, 2);
        assert!(metrics.next_attempt_in_ms.is_some());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = breaker(100, 1_000, 2);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.metrics().consecutive_failures, 0);
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let cb = breaker(1, 20, 2);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow_call());

        thread::sleep(Duration::from_millis(30));
        assert!(cb.should_allow_call());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().total_calls, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, 20, 3);
        cb.record_failure();
        thread::sleep(Duration::from_millis(30));
        assert!(cb.should_allow_call());

        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow_call());
        assert!(cb.retry_after() > Duration::ZERO);
    }

    #[test]
    fn test_manual_reset() {
        let cb = breaker(1, 60_000, 1);
        cb.record_failure();
        assert!(!cb.should_allow_call());
        cb.reset();
        assert!(cb.should_allow_call());
        assert!(cb.metrics().last_failure_at.is_none());
    }
}
