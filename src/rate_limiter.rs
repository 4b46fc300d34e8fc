// Per-channel rate limiter: sliding minute/hour windows plus a burst token bucket

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    config::RateLimitConfig,
    error::{ChannelError, Result},
};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitState {
    pub minute_remaining: u32,
    pub hour_remaining: Option<u32>,
    pub burst_remaining: u32,
    pub requests_last_minute: u32,
    pub requests_last_hour: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug)]
struct LimiterState {
    // accepted request times, oldest first
    requests: VecDeque<Instant>,
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    channel: String,
    per_minute: u32,
    per_hour: Option<u32>,
    burst_capacity: f64,
    // tokens per second
    refill_rate: f64,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(channel: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self::new_at(channel, config, Instant::now())
    }

    pub(crate) fn new_at(channel: impl Into<String>, config: &RateLimitConfig, now: Instant) -> Self {
        let burst = config.effective_burst().max(1) as f64;
        Self {
            channel: channel.into(),
            per_minute: config.requests_per_minute,
            per_hour: config.requests_per_hour,
            burst_capacity: burst,
            refill_rate: burst / config.burst_window().as_secs_f64(),
            state: Mutex::new(LimiterState {
                requests: VecDeque::new(),
                tokens: burst,
                last_refill: now,
            }),
        }
    }

    // Must be called once per outbound request, before it is issued
    pub fn check_limit(&self) -> Result<()> {
        self.check_limit_at(Instant::now())
    }

    pub(crate) fn check_limit_at(&self, now: Instant) -> Result<()> {
        let mut state = self.state.lock();

        Self::purge(&mut state.requests, now);

        let minute_count = count_within(&state.requests, now, MINUTE);
        if minute_count >= self.per_minute {
            let wait = window_wait(&state.requests, now, MINUTE, self.per_minute);
            return Err(self.rejection("per-minute", self.per_minute, wait));
        }

        if let Some(per_hour) = self.per_hour {
            if state.requests.len() as u32 >= per_hour {
                let wait = window_wait(&state.requests, now, HOUR, per_hour);
                return Err(self.rejection("per-hour", per_hour, wait));
            }
        }

        self.refill(&mut state, now);
        if state.tokens < 1.0 {
            let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate);
            return Err(self.rejection("burst", self.burst_capacity as u32, wait));
        }

        state.tokens -= 1.0;
        state.requests.push_back(now);

        Ok(())
    }

    // Snapshot for health reporting. Never gates or mutates anything.
    pub fn current_state(&self) -> RateLimitState {
        self.current_state_at(Instant::now())
    }

    pub(crate) fn current_state_at(&self, now: Instant) -> RateLimitState {
        let state = self.state.lock();

        let minute_count = count_within(&state.requests, now, MINUTE);
        let hour_count = count_within(&state.requests, now, HOUR);
        let tokens = self.tokens_at(&state, now);

        // next point at which the minute window frees a slot
        let reset_in = oldest_within(&state.requests, now, MINUTE)
            .map(|oldest| (oldest + MINUTE).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        RateLimitState {
            minute_remaining: self.per_minute.saturating_sub(minute_count),
            hour_remaining: self.per_hour.map(|h| h.saturating_sub(hour_count)),
            burst_remaining: tokens.floor() as u32,
            requests_last_minute: minute_count,
            requests_last_hour: hour_count,
            reset_at: utc_after(reset_in),
        }
    }

    // Minimum wait before the next request would be let through
    pub fn retry_after(&self) -> Duration {
        self.retry_after_at(Instant::now())
    }

    pub(crate) fn retry_after_at(&self, now: Instant) -> Duration {
        let state = self.state.lock();
        let mut wait = Duration::ZERO;

        if count_within(&state.requests, now, MINUTE) >= self.per_minute {
            wait = wait.max(window_wait(&state.requests, now, MINUTE, self.per_minute));
        }
        if let Some(per_hour) = self.per_hour {
            if count_within(&state.requests, now, HOUR) >= per_hour {
                wait = wait.max(window_wait(&state.requests, now, HOUR, per_hour));
            }
        }

        let tokens = self.tokens_at(&state, now);
        if tokens < 1.0 {
            wait = wait.max(Duration::from_secs_f64((1.0 - tokens) / self.refill_rate));
        }

        wait
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn purge(requests: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = requests.front() {
            if now.saturating_duration_since(*oldest) >= HOUR {
                requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn tokens_at(&self, state: &LimiterState, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        (state.tokens + elapsed * self.refill_rate).min(self.burst_capacity)
    }

    fn refill(&self, state: &mut LimiterState, now: Instant) {
        state.tokens = self.tokens_at(state, now);
        if now > state.last_refill {
            state.last_refill = now;
        }
    }

    fn rejection(&self, window: &str, limit: u32, wait: Duration) -> ChannelError {
        tracing::debug!(
            channel = %self.channel,
            window,
            limit,
            wait_ms = wait.as_millis() as u64,
            "rate limit reached"
        );

        ChannelError::RateLimit {
            message: format!(
                "{} {window} limit of {limit} requests reached, retry in {}ms",
                self.channel,
                wait.as_millis()
            ),
            reset_at: utc_after(wait),
            remaining: 0,
            retry_after: wait,
        }
    }
}

fn count_within(requests: &VecDeque<Instant>, now: Instant, window: Duration) -> u32 {
    requests
        .iter()
        .rev()
        .take_while(|t| now.saturating_duration_since(**t) < window)
        .count() as u32
}

fn oldest_within(requests: &VecDeque<Instant>, now: Instant, window: Duration) -> Option<Instant> {
    requests
        .iter()
        .find(|t| now.saturating_duration_since(**t) < window)
        .copied()
}

// Time until enough requests leave the window for one more to fit. A zero
// limit never fits, so the caller is told to wait a whole window.
fn window_wait(requests: &VecDeque<Instant>, now: Instant, window: Duration, limit: u32) -> Duration {
    if limit == 0 {
        return window;
    }
    let in_window: Vec<&Instant> = requests
        .iter()
        .filter(|t| now.saturating_duration_since(**t) < window)
        .collect();

    if (in_window.len() as u32) < limit {
        return Duration::ZERO;
    }

    // the request that has to expire for the count to drop below the limit
    let idx = in_window.len() - limit as usize;
    in_window
        .get(idx)
        .map(|t| (**t + window).saturating_duration_since(now))
        .unwrap_or(window)
}

fn utc_after(wait: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(wait.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn limiter(per_minute: u32, per_hour: Option<u32>, burst: u32, burst_window_ms: u64, now: Instant) -> RateLimiter {
        RateLimiter::new_at(
            "test",
            &RateLimitConfig {
                requests_per_minute: per_minute,
                requests_per_hour: per_hour,
                burst_limit: burst,
                burst_window_ms,
            },
            now,
        )
    }

    #[test]
    fn test_61st_request_in_ten_seconds_is_rejected() {
        let start = Instant::now();
        let limiter = limiter(60, None, 0, 10_000, start);

        for i in 0..60u64 {
            let at = start + Duration::from_millis(i * 160);
            assert!(limiter.check_limit_at(at).is_ok(), "request {i} rejected");
        }

        let before = Utc::now();
        let err = limiter
            .check_limit_at(start + Duration::from_secs(10))
            .unwrap_err();

        match err {
            ChannelError::RateLimit {
                reset_at,
                remaining,
                retry_after,
                ..
            } => {
                assert_eq!(remaining, 0);
                assert!(retry_after <= MINUTE);
                assert!(reset_at <= before + chrono::Duration::seconds(61));
                assert!(reset_at >= before);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_minute_window_never_exceeded() {
        let start = Instant::now();
        let limiter = limiter(20, Some(100), 5, 1_000, start);
        let mut rng = rand::thread_rng();
        let mut accepted: Vec<Instant> = vec![];
        let mut at = start;

        for _ in 0..2_000 {
            at += Duration::from_millis(rng.gen_range(0..400));
            if limiter.check_limit_at(at).is_ok() {
                accepted.push(at);
            }
        }

        assert!(!accepted.is_empty());
        for (i, t) in accepted.iter().enumerate() {
            let in_minute = accepted[..=i]
                .iter()
                .filter(|x| t.duration_since(**x) < MINUTE)
                .count();
            let in_hour = accepted[..=i]
                .iter()
                .filter(|x| t.duration_since(**x) < HOUR)
                .count();
            assert!(in_minute <= 20, "minute window held {in_minute}");
            assert!(in_hour <= 100, "hour window held {in_hour}");
        }
    }

    #[test]
    fn test_hour_limit() {
        let start = Instant::now();
        let limiter = limiter(100, Some(3), 0, 1_000, start);

        for i in 0..3u64 {
            assert!(limiter.check_limit_at(start + Duration::from_secs(i * 120)).is_ok());
        }
        let err = limiter
            .check_limit_at(start + Duration::from_secs(400))
            .unwrap_err();
        assert!(err.to_string().contains("per-hour"));

        // first request leaves the hour window
        assert!(limiter.check_limit_at(start + HOUR).is_ok());
    }

    #[test]
    fn test_burst_tokens_refill_and_never_go_negative() {
        let start = Instant::now();
        // 4 tokens, refilled at 4 per 2s
        let limiter = limiter(1_000, None, 4, 2_000, start);

        for _ in 0..4 {
            assert!(limiter.check_limit_at(start).is_ok());
        }
        assert!(limiter.check_limit_at(start).is_err());
        assert_eq!(limiter.current_state_at(start).burst_remaining, 0);

        let wait = limiter.retry_after_at(start);
        assert_eq!(wait, Duration::from_millis(500));

        // half a token is not enough
        assert!(limiter.check_limit_at(start + Duration::from_millis(250)).is_err());
        assert!(limiter.check_limit_at(start + Duration::from_millis(500)).is_ok());

        // refill is capped at capacity
        let later = start + Duration::from_secs(60);
        assert_eq!(limiter.current_state_at(later).burst_remaining, 4);
    }

    #[test]
    fn test_state_is_side_effect_free() {
        let start = Instant::now();
        let limiter = limiter(2, None, 0, 10_000, start);

        for _ in 0..10 {
            let state = limiter.current_state_at(start);
            assert_eq!(state.minute_remaining, 2);
        }
        assert!(limiter.check_limit_at(start).is_ok());

        let state = limiter.current_state_at(start);
        assert_eq!(state.minute_remaining, 1);
        assert_eq!(state.requests_last_minute, 1);
        assert_eq!(state.hour_remaining, None);
    }

    #[test]
    fn test_retry_after_matches_window() {
        let start = Instant::now();
        let limiter = limiter(2, None, 0, 1, start);

        assert_eq!(limiter.retry_after_at(start), Duration::ZERO);
        limiter.check_limit_at(start).unwrap();
        limiter
            .check_limit_at(start + Duration::from_secs(10))
            .unwrap();

        // oldest request falls out of the minute window 50s from now
        let wait = limiter.retry_after_at(start + Duration::from_secs(10));
        assert_eq!(wait, Duration::from_secs(50));
        assert!(limiter
            .check_limit_at(start + Duration::from_secs(10) + wait)
            .is_ok());
    }

    #[test]
    fn test_zero_hour_limit_rejects_without_panicking() {
        let start = Instant::now();
        let limiter = limiter(60, Some(0), 10, 1_000, start);

        let err = limiter.check_limit_at(start).unwrap_err();
        match err {
            ChannelError::RateLimit {
                remaining,
                retry_after,
                ..
            } => {
                assert_eq!(remaining, 0);
                assert_eq!(retry_after, HOUR);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(limiter.retry_after_at(start), HOUR);
        assert_eq!(limiter.current_state_at(start).hour_remaining, Some(0));
    }
}
