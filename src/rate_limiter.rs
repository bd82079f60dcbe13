//! Token bucket rate limiter
//!
//! Each provider owns one bucket. Tokens refill continuously at
//! `refill_rate_per_second` up to `capacity`; a call consumes its cost or is
//! rejected without waiting.

use common::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for a provider's token bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum number of tokens the bucket can hold
    pub capacity: f64,
    /// Tokens added per second
    pub refill_rate_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 50.0,
            refill_rate_per_second: 10.0,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(ConfigError::invalid(
                "rate_limit.capacity",
                "must be a finite number greater than zero",
            ));
        }
        if !self.refill_rate_per_second.is_finite() || self.refill_rate_per_second < 0.0 {
            return Err(ConfigError::invalid(
                "rate_limit.refill_rate_per_second",
                "must be a finite, non-negative number",
            ));
        }
        Ok(())
    }
}

/// Bucket state
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitBucket {
    /// Maximum number of tokens
    pub capacity: f64,
    /// Tokens currently available, never above `capacity`
    pub tokens: f64,
    /// Tokens added per second
    pub refill_rate_per_second: f64,
    /// When tokens were last topped up
    pub last_refill_at: Instant,
}

impl RateLimitBucket {
    /// Create a full bucket
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            capacity: config.capacity,
            tokens: config.capacity,
            refill_rate_per_second: config.refill_rate_per_second,
            last_refill_at: Instant::now(),
        }
    }

    /// Add the tokens earned since the last refill
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        let earned = elapsed.as_secs_f64() * self.refill_rate_per_second;
        self.tokens = (self.tokens + earned).min(self.capacity);
        self.last_refill_at = now;
    }

    /// Time until `cost` tokens are available, `None` if they never will be
    pub fn time_until(&self, cost: f64) -> Option<Duration> {
        if cost > self.capacity {
            return None;
        }
        let missing = cost - self.tokens;
        if missing <= 0.0 {
            return Some(Duration::ZERO);
        }
        if self.refill_rate_per_second <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(missing / self.refill_rate_per_second))
    }
}

/// Token bucket guarded by an async mutex
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    bucket: Mutex<RateLimitBucket>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            bucket: Mutex::new(RateLimitBucket::new(config)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take `cost` tokens if they are available. Never blocks.
    pub async fn try_acquire(&self, cost: f64) -> bool {
        if cost <= 0.0 {
            return true;
        }
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now());
        if cost > bucket.capacity {
            debug!(
                limiter = %self.name,
                cost,
                capacity = bucket.capacity,
                "Request cost exceeds bucket capacity"
            );
            return false;
        }
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            true
        } else {
            debug!(limiter = %self.name, available = bucket.tokens, cost, "Rate limit exceeded");
            false
        }
    }

    /// Tokens available right now
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now());
        bucket.tokens
    }

    pub async fn time_until_available(&self, cost: f64) -> Option<Duration> {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now());
        bucket.time_until(cost)
    }

    pub async fn snapshot(&self) -> RateLimitBucket {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now());
        bucket.clone()
    }
}
