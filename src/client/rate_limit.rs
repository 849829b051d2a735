// src/client/rate_limit.rs

//! Sliding-window rate limiter for outbound calls.
//!
//! Callers are delayed, never dropped: `acquire` suspends until enough
//! slots free up inside the configured window. The one exception is a
//! single call whose cost exceeds the whole budget, which can never
//! succeed and is rejected immediately.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::models::RateLimitConfig;

/// Shared sliding-window limiter.
///
/// Safe for many concurrent callers; the timestamp deque is guarded by an
/// async mutex so waiters suspend instead of spinning.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    dispatched: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_calls: config.max_calls,
            window: Duration::from_secs(config.window_secs),
            dispatched: Mutex::new(VecDeque::new()),
        }
    }

    /// Acquire one slot, waiting as long as necessary.
    pub async fn acquire(&self) -> Result<()> {
        self.acquire_many(1).await
    }

    /// Acquire `cost` slots atomically, waiting as long as necessary.
    pub async fn acquire_many(&self, cost: usize) -> Result<()> {
        if cost > self.max_calls {
            return Err(AppError::rate_limit(format!(
                "call cost {} exceeds window budget {}",
                cost, self.max_calls
            )));
        }

        loop {
            let wake_at = {
                let mut dispatched = self.dispatched.lock().await;
                let now = Instant::now();
                Self::prune(&mut dispatched, now, self.window);

                if dispatched.len() + cost <= self.max_calls {
                    for _ in 0..cost {
                        dispatched.push_back(now);
                    }
                    return Ok(());
                }

                // Oldest entry blocking us; sleep until it leaves the window.
                let needed = dispatched.len() + cost - self.max_calls;
                let blocking = dispatched[needed - 1];
                blocking + self.window
            };

            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Take a slot only if one is free right now.
    pub async fn try_acquire(&self) -> bool {
        let mut dispatched = self.dispatched.lock().await;
        let now = Instant::now();
        Self::prune(&mut dispatched, now, self.window);

        if dispatched.len() < self.max_calls {
            dispatched.push_back(now);
            true
        } else {
            false
        }
    }

    /// Slots currently free in the window.
    pub async fn available(&self) -> usize {
        let mut dispatched = self.dispatched.lock().await;
        Self::prune(&mut dispatched, Instant::now(), self.window);
        self.max_calls - dispatched.len()
    }

    fn prune(dispatched: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = dispatched.front() {
            if now.duration_since(front) >= window {
                dispatched.pop_front();
            } else {
                break;
            }
        }
    }
}
