//! Per-connection token bucket.
//!
//! Each connection gets a bucket filled to `burst` when it opens. Every
//! message takes one token. On each check the bucket is topped up by
//! `elapsed_whole_seconds × max_messages_per_second`, capped at `burst`, so
//! refill happens in whole-second steps.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Message;
use crate::transport::Connection;

use super::Middleware;

// ============================================================================
// RateLimitConfig
// ============================================================================

/// Token bucket settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Tokens added per elapsed second.
    pub max_messages_per_second: u32,
    /// Bucket capacity.
    pub burst: u32,
}

impl RateLimitConfig {
    /// `n` messages per second with a burst of `n`.
    #[inline]
    #[must_use]
    pub const fn per_second(n: u32) -> Self {
        Self {
            max_messages_per_second: n,
            burst: n,
        }
    }

    /// Overrides the bucket capacity.
    #[inline]
    #[must_use]
    pub const fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_second(100)
    }
}

// ============================================================================
// TokenBucket
// ============================================================================

#[derive(Debug)]
struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(config: &RateLimitConfig) -> Self {
        Self {
            tokens: config.burst,
            last_refill: Instant::now(),
        }
    }

    /// Takes a token. An empty bucket is left untouched.
    fn try_take(&mut self, config: &RateLimitConfig, now: Instant) -> bool {
        let whole_seconds = now.saturating_duration_since(self.last_refill).as_secs();
        if whole_seconds > 0 {
            let refill = whole_seconds.saturating_mul(u64::from(config.max_messages_per_second));
            let tokens = u64::from(self.tokens).saturating_add(refill);
            self.tokens = u32::try_from(tokens.min(u64::from(config.burst))).unwrap_or(config.burst);
            self.last_refill = now;
        }

        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }
}

// ============================================================================
// RateLimitMiddleware
// ============================================================================

/// Rejects messages once a connection's bucket is empty.
#[derive(Debug, Default)]
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    buckets: Mutex<FxHashMap<ConnectionId, TokenBucket>>,
}

impl RateLimitMiddleware {
    /// Creates a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the tokens left for a connection.
    #[must_use]
    pub fn tokens(&self, conn: &Connection) -> Option<u32> {
        self.buckets.lock().get(&conn.id()).map(|bucket| bucket.tokens)
    }

    /// Returns how many connections currently hold a bucket.
    #[inline]
    #[must_use]
    pub fn tracked_connections(&self) -> usize {
        self.buckets.lock().len()
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn process_message(&self, conn: &Connection, _msg: &Message) -> Result<()> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(conn.id())
            .or_insert_with(|| TokenBucket::full(&self.config));

        if bucket.try_take(&self.config, Instant::now()) {
            Ok(())
        } else {
            debug!(connection_id = %conn.id(), "Rate limit exceeded");
            Err(Error::RateLimited)
        }
    }

    fn process_connection(&self, conn: &Connection) -> Result<()> {
        self.buckets
            .lock()
            .insert(conn.id(), TokenBucket::full(&self.config));
        Ok(())
    }

    fn process_disconnection(&self, conn: &Connection) -> Result<()> {
        self.buckets.lock().remove(&conn.id());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
