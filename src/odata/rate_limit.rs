//! Sliding-window rate limiter for the Exact Online API (60 calls/minute)

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

pub const MAX_CALLS_PER_MINUTE: usize = 60;
const WINDOW: Duration = Duration::from_secs(60);
const WAIT_BUFFER: Duration = Duration::from_millis(100);

/// Admission gate shared by every outbound call of one client instance.
///
/// The limit is per account, not per logical operation, so concurrent tool
/// invocations must funnel through the same limiter. The lock serializes
/// admission decisions, not the HTTP calls themselves.
#[derive(Debug, Default)]
pub struct RateLimiter {
    call_times: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend the caller until a call may depart without exceeding the
    /// per-minute ceiling, then record the call's admission timestamp.
    pub async fn wait_if_needed(&self) {
        let mut calls = self.call_times.lock().await;
        let mut now = Instant::now();

        prune(&mut calls, now);

        if calls.len() >= MAX_CALLS_PER_MINUTE {
            if let Some(&oldest) = calls.front() {
                let wait = WINDOW.saturating_sub(now - oldest) + WAIT_BUFFER;
                tracing::debug!("Rate limit reached, waiting {:.1}s", wait.as_secs_f64());
                sleep(wait).await;
                now = Instant::now();
                prune(&mut calls, now);
            }
        }

        calls.push_back(now);
    }
}

fn prune(calls: &mut VecDeque<Instant>, now: Instant) {
    while calls
        .front()
        .is_some_and(|&t| now.duration_since(t) >= WINDOW)
    {
        calls.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_under_limit_never_blocks() {
        let limiter = RateLimiter::new();
        let started = Instant::now();
        for _ in 0..MAX_CALLS_PER_MINUTE {
            limiter.wait_if_needed().await;
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_61st_call_waits_for_oldest_to_expire() {
        let limiter = RateLimiter::new();
        for _ in 0..MAX_CALLS_PER_MINUTE {
            limiter.wait_if_needed().await;
        }

        let started = Instant::now();
        limiter.wait_if_needed().await;
        let waited = started.elapsed();

        assert!(waited >= Duration::from_secs(60), "waited only {:?}", waited);
        assert!(waited < Duration::from_secs(61), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::new();
        for _ in 0..MAX_CALLS_PER_MINUTE {
            limiter.wait_if_needed().await;
        }

        // Once the whole window has passed, admissions are free again.
        tokio::time::advance(Duration::from_secs(61)).await;
        let started = Instant::now();
        limiter.wait_if_needed().await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
