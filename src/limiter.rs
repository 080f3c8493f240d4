//! The AIMD concurrency manager (C3).
//!
//! Additive-increase/multiplicative-decrease limiter with a success streak and a failure
//! cooldown window. One instance exists per fan-out stage per request (`week_fetch`,
//! `homework_fetch`); instances are never shared across requests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Thread-safe AIMD limiter. `limit()` is cheap and lock-light; `report_success`/
/// `report_failure` are the only mutating operations.
pub struct ConcurrencyLimiter {
    inner: Mutex<LimiterState>,
    min: f64,
    max: f64,
    increase_step: f64,
    decrease_factor: f64,
    success_threshold: u32,
    failure_cooldown: Duration,
    disabled: bool,
}

struct LimiterState {
    current_limit: f64,
    success_streak: u32,
    last_failure_time: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
    pub initial: f64,
    pub min: f64,
    pub max: f64,
    pub increase_step: f64,
    pub decrease_factor: f64,
    pub success_threshold: u32,
    pub failure_cooldown_sec: f64,
    pub disabled: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            initial: 5.0,
            min: 1.0,
            max: 50.0,
            increase_step: 1.0,
            decrease_factor: 0.5,
            success_threshold: 10,
            failure_cooldown_sec: 5.0,
            disabled: false,
        }
    }
}

impl ConcurrencyLimiter {
    /// Builds a new limiter. Panics if `0 < min <= initial <= max` does not hold.
    pub fn new(config: LimiterConfig) -> Self {
        assert!(
            config.min > 0.0 && config.min <= config.initial && config.initial <= config.max,
            "limiter construction invariant violated: 0 < min <= initial <= max"
        );
        Self {
            inner: Mutex::new(LimiterState {
                current_limit: config.initial,
                success_streak: 0,
                last_failure_time: None,
            }),
            min: config.min,
            max: config.max,
            increase_step: config.increase_step,
            decrease_factor: config.decrease_factor,
            success_threshold: config.success_threshold,
            failure_cooldown: Duration::from_secs_f64(config.failure_cooldown_sec),
            disabled: config.disabled,
        }
    }

    /// A forced-mode limiter holds its ceiling for the whole request; dynamic adjustments are
    /// disabled and the learned value is never persisted back.
    pub fn forced(ceiling: f64) -> Self {
        Self::new(LimiterConfig {
            initial: ceiling,
            min: ceiling,
            max: ceiling,
            disabled: true,
            ..LimiterConfig::default()
        })
    }

    /// The current admission ceiling, floored to an integer.
    pub fn limit(&self) -> usize {
        let state = self.inner.lock().unwrap();
        state.current_limit.floor().max(1.0) as usize
    }

    pub fn report_success(&self) {
        if self.disabled {
            return;
        }
        let mut state = self.inner.lock().unwrap();
        state.success_streak += 1;

        if let Some(last_failure) = state.last_failure_time {
            if last_failure.elapsed() < self.failure_cooldown {
                state.success_streak = 0;
                return;
            }
        }

        if state.success_streak >= self.success_threshold {
            state.current_limit = (state.current_limit + self.increase_step).min(self.max);
            state.success_streak = 0;
        }
    }

    pub fn report_failure(&self) {
        if self.disabled {
            tracing::debug!("limiter is disabled (forced mode); ignoring reported failure");
            return;
        }
        let mut state = self.inner.lock().unwrap();
        state.success_streak = 0;
        state.current_limit = (state.current_limit * self.decrease_factor).max(self.min);
        state.last_failure_time = Some(Instant::now());
    }
}
