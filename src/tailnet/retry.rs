// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic with exponential backoff for tailnet control-plane calls.
//!
//! This module provides utilities for retrying transient adapter errors (429, 5xx,
//! connection failures) with exponential backoff, while failing fast on permanent
//! errors (4xx client errors, undecodable responses).
//!
//! The retry budget is deliberately short. Callers wrap adapter calls in their own
//! timeouts (`Timeout`, `DNS.UpdateTimeout`), and anything that still fails is
//! retried by the next health cycle or reconciliation trigger.

use super::events::{EventSink, TailnetEvent};
use crate::errors::TailnetError;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Maximum total time to spend retrying one call (5 seconds)
const MAX_ELAPSED_TIME_MILLIS: u64 = 5_000;

/// Initial retry interval (50ms)
const INITIAL_INTERVAL_MILLIS: u64 = 50;

/// Maximum interval between retries (1 second)
const MAX_INTERVAL_MILLIS: u64 = 1_000;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Maximum total elapsed time
    pub max_elapsed_time: Option<Duration>,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
    /// Start time for tracking total elapsed time
    start_time: Instant,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
        }
    }

    /// Get the next backoff interval, or None if max elapsed time exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    /// Start over from the initial interval.
    pub fn reset(&mut self) {
        self.current_interval = self.initial_interval;
        self.start_time = Instant::now();
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let jittered = rand::rng().random_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Create the backoff configuration for tailnet adapter retries.
///
/// # Configuration
///
/// - **Initial interval**: 50ms
/// - **Max interval**: 1 second
/// - **Max elapsed time**: 5 seconds total
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10% (prevents thundering herd)
///
/// # Retry Schedule
///
/// With these settings, retries occur at approximately:
///
/// 1. 50ms
/// 2. 100ms
/// 3. 200ms
/// 4. 400ms
/// 5. 800ms
/// 6. 1s (capped at max interval)
///    7+. 1s intervals until 5 seconds elapsed
#[must_use]
pub fn adapter_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(INITIAL_INTERVAL_MILLIS),
        Duration::from_millis(MAX_INTERVAL_MILLIS),
        Some(Duration::from_millis(MAX_ELAPSED_TIME_MILLIS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Retry an adapter call with exponential backoff.
///
/// Retries while [`TailnetError::is_transient`] holds and the backoff allows it,
/// and fails immediately on permanent errors. Every retry and the final failure
/// are reported on `events`.
///
/// # Errors
///
/// Returns the last error once it is permanent or the backoff is exhausted.
pub async fn retry_adapter_call<T, F, Fut>(
    operation: F,
    operation_name: &'static str,
    events: &EventSink,
) -> Result<T, TailnetError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TailnetError>>,
{
    retry_with_backoff(operation, operation_name, events, adapter_backoff()).await
}

async fn retry_with_backoff<T, F, Fut>(
    mut operation: F,
    operation_name: &'static str,
    events: &EventSink,
    mut backoff: ExponentialBackoff,
) -> Result<T, TailnetError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TailnetError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let retry_after = if error.is_transient() {
            backoff.next_backoff()
        } else {
            None
        };

        let Some(retry_after) = retry_after else {
            events.emit(TailnetEvent::RequestFailed {
                operation: operation_name,
                attempt,
                error: error.to_string(),
            });
            return Err(error);
        };

        events.emit(TailnetEvent::RequestRetrying {
            operation: operation_name,
            attempt,
            retry_after,
            error: error.to_string(),
        });
        tokio::time::sleep(retry_after).await;
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
