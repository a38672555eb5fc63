//! Metrics middleware.
//!
//! Counts connection and message events with atomics and measures call
//! latency: the time of a `call` is recorded under its ID and diffed against
//! the first `response`/`error` carrying the same ID on the same connection.
//!
//! Every event is also emitted through the `metrics` facade so an installed
//! recorder (Prometheus exporter or similar) sees it:
//!
//! | Metric | Kind |
//! |--------|------|
//! | `portal.connections` | counter |
//! | `portal.disconnections` | counter |
//! | `portal.messages` (`type` label) | counter |
//! | `portal.errors` | counter |
//! | `portal.active_connections` | gauge |
//! | `portal.call.duration` (seconds) | histogram |
//!
//! A call whose reply never shows up is dropped from the latency table once
//! it is older than the stale limit.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use ::metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::identifiers::{ConnectionId, MessageId};
use crate::protocol::{Message, MessageType};
use crate::transport::Connection;

use super::Middleware;

/// Unmatched calls older than this are evicted.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Table size that triggers a sweep of stale calls.
const SWEEP_THRESHOLD: usize = 1024;

// ============================================================================
// MetricsSnapshot
// ============================================================================

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Connections opened.
    pub connections_total: u64,
    /// Connections closed.
    pub disconnections_total: u64,
    /// Messages observed.
    pub messages_total: u64,
    /// `error` messages observed.
    pub errors_total: u64,
    /// Currently open connections.
    pub active_connections: i64,
    /// Calls whose reply was observed.
    pub latency_samples: u64,
    /// Mean call latency.
    pub average_latency: Option<Duration>,
    /// Slowest call.
    pub max_latency: Duration,
}

// ============================================================================
// LatencyTracker
// ============================================================================

#[derive(Default)]
struct LatencyTracker {
    in_flight: FxHashMap<(ConnectionId, MessageId), Instant>,
    samples: u64,
    total: Duration,
    max: Duration,
}

impl LatencyTracker {
    fn record(&mut self, elapsed: Duration) {
        self.samples += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
        histogram!("portal.call.duration").record(elapsed.as_secs_f64());
    }

    /// Drops calls older than `stale_after`. Returns how many went.
    fn evict_stale(&mut self, stale_after: Duration) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|_, started| started.elapsed() < stale_after);
        before - self.in_flight.len()
    }
}

// ============================================================================
// MetricsMiddleware
// ============================================================================

/// Collects connection, message and latency metrics.
pub struct MetricsMiddleware {
    connections: AtomicU64,
    disconnections: AtomicU64,
    messages: AtomicU64,
    errors: AtomicU64,
    active: AtomicI64,
    stale_after: Duration,
    latency: Mutex<LatencyTracker>,
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self {
            connections: AtomicU64::new(0),
            disconnections: AtomicU64::new(0),
            messages: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            active: AtomicI64::new(0),
            stale_after: DEFAULT_STALE_AFTER,
            latency: Mutex::new(LatencyTracker::default()),
        }
    }
}

impl MetricsMiddleware {
    /// Creates zeroed metrics.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long an unanswered call is kept for latency matching.
    #[inline]
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Evicts unanswered calls past the stale limit.
    ///
    /// Also runs on its own whenever the table grows large. Returns how many
    /// calls were dropped.
    pub fn evict_stale(&self) -> usize {
        self.latency.lock().evict_stale(self.stale_after)
    }

    /// Returns a copy of the current values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.latency.lock();
        let average_latency = u32::try_from(latency.samples)
            .ok()
            .filter(|samples| *samples > 0)
            .map(|samples| latency.total / samples);

        MetricsSnapshot {
            connections_total: self.connections.load(Ordering::Relaxed),
            disconnections_total: self.disconnections.load(Ordering::Relaxed),
            messages_total: self.messages.load(Ordering::Relaxed),
            errors_total: self.errors.load(Ordering::Relaxed),
            active_connections: self.active.load(Ordering::Relaxed),
            latency_samples: latency.samples,
            average_latency,
            max_latency: latency.max,
        }
    }

    /// Returns the number of calls still waiting for a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.latency.lock().in_flight.len()
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    fn process_message(&self, conn: &Connection, msg: &Message) -> Result<()> {
        self.messages.fetch_add(1, Ordering::Relaxed);
        counter!("portal.messages", "type" => msg.kind.as_str()).increment(1);

        match msg.kind {
            MessageType::Call => {
                let mut latency = self.latency.lock();
                if latency.in_flight.len() >= SWEEP_THRESHOLD {
                    let evicted = latency.evict_stale(self.stale_after);
                    if evicted > 0 {
                        debug!(evicted, "Dropped unanswered calls from latency table");
                    }
                }
                latency
                    .in_flight
                    .insert((conn.id(), msg.id.clone()), Instant::now());
            }
            MessageType::Response | MessageType::Error => {
                if msg.kind == MessageType::Error {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    counter!("portal.errors").increment(1);
                }
                let mut latency = self.latency.lock();
                if let Some(started) = latency.in_flight.remove(&(conn.id(), msg.id.clone())) {
                    latency.record(started.elapsed());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn process_connection(&self, _conn: &Connection) -> Result<()> {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        counter!("portal.connections").increment(1);
        gauge!("portal.active_connections").increment(1.0);
        Ok(())
    }

    fn process_disconnection(&self, conn: &Connection) -> Result<()> {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
        counter!("portal.disconnections").increment(1);
        gauge!("portal.active_connections").decrement(1.0);

        let id = conn.id();
        self.latency.lock().in_flight.retain(|(owner, _), _| *owner != id);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Map, Value};

    use crate::error::FunctionError;
    use crate::transport::connection::tests::test_connection;

    #[tokio::test(start_paused = true)]
    async fn test_latency_from_call_to_response() {
        let metrics = MetricsMiddleware::new();
        let conn = test_connection();
        let id = MessageId::generate();

        metrics
            .process_message(&conn, &Message::call(id.clone(), "f", Map::new()))
            .expect("call");
        tokio::time::advance(Duration::from_millis(40)).await;
        metrics
            .process_message(&conn, &Message::response(id.clone(), Value::Null))
            .expect("response");
        // A duplicate reply is not counted twice.
        metrics
            .process_message(&conn, &Message::response(id, Value::Null))
            .expect("duplicate");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_total, 3);
        assert_eq!(snapshot.latency_samples, 1);
        assert_eq!(snapshot.max_latency, Duration::from_millis(40));
        assert_eq!(snapshot.average_latency, Some(Duration::from_millis(40)));
        assert_eq!(metrics.in_flight(), 0);
    }

    #[test]
    fn test_error_messages_counted() {
        let metrics = MetricsMiddleware::new();
        let conn = test_connection();
        let id = MessageId::generate();

        metrics
            .process_message(&conn, &Message::call(id.clone(), "f", Map::new()))
            .expect("call");
        metrics
            .process_message(&conn, &Message::error(id, FunctionError::internal("boom")))
            .expect("error");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.errors_total, 1);
        assert_eq!(snapshot.latency_samples, 1);
    }

    #[test]
    fn test_ids_scoped_per_connection() {
        let metrics = MetricsMiddleware::new();
        let a = test_connection();
        let b = test_connection();
        let id = MessageId::new("same");

        metrics
            .process_message(&a, &Message::call(id.clone(), "f", Map::new()))
            .expect("call");
        metrics
            .process_message(&b, &Message::response(id, Value::Null))
            .expect("response");

        assert_eq!(metrics.snapshot().latency_samples, 0);
        assert_eq!(metrics.in_flight(), 1);
    }

    #[test]
    fn test_connection_counters() {
        let metrics = MetricsMiddleware::new();
        let conn = test_connection();

        metrics.process_connection(&conn).expect("connect");
        metrics
            .process_message(&conn, &Message::call(MessageId::generate(), "f", Map::new()))
            .expect("call");
        assert_eq!(metrics.snapshot().active_connections, 1);

        metrics.process_disconnection(&conn).expect("disconnect");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 1);
        assert_eq!(snapshot.disconnections_total, 1);
        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(metrics.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_calls_expire() {
        let metrics = MetricsMiddleware::new().with_stale_after(Duration::from_secs(10));
        let conn = test_connection();

        metrics
            .process_message(&conn, &Message::call(MessageId::generate(), "f", Map::new()))
            .expect("old call");
        tokio::time::advance(Duration::from_secs(11)).await;
        metrics
            .process_message(&conn, &Message::call(MessageId::generate(), "f", Map::new()))
            .expect("fresh call");

        assert_eq!(metrics.evict_stale(), 1);
        assert_eq!(metrics.in_flight(), 1);
        assert_eq!(metrics.snapshot().latency_samples, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_table_sweeps_on_insert() {
        let metrics = MetricsMiddleware::new().with_stale_after(Duration::from_secs(1));
        let conn = test_connection();

        for _ in 0..SWEEP_THRESHOLD {
            metrics
                .process_message(&conn, &Message::call(MessageId::generate(), "f", Map::new()))
                .expect("call");
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        metrics
            .process_message(&conn, &Message::call(MessageId::generate(), "f", Map::new()))
            .expect("call");

        assert_eq!(metrics.in_flight(), 1);
    }
}
