//! Compression settings.
//!
//! Framing-level compression is negotiated below this layer. This stage only
//! carries the settings and accounts for how much traffic would qualify.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::Result;
use crate::protocol::Message;
use crate::transport::Connection;

use super::Middleware;

/// Compression settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Whether compression is wanted.
    pub enabled: bool,
    /// Compression level, 1 (fast) to 9 (small).
    pub level: u32,
    /// Smallest encoded size worth compressing, in bytes.
    pub min_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 6,
            min_size: 1024,
        }
    }
}

/// Counts messages and encoded bytes against [`CompressionConfig`].
#[derive(Debug, Default)]
pub struct CompressionMiddleware {
    config: CompressionConfig,
    messages: AtomicU64,
    bytes: AtomicU64,
    eligible: AtomicU64,
}

impl CompressionMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            config: CompressionConfig {
                level: config.level.clamp(1, 9),
                ..config
            },
            ..Self::default()
        }
    }

    /// Returns the effective settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> CompressionConfig {
        self.config
    }

    /// Returns `(messages, bytes, eligible messages)` seen so far.
    #[must_use]
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.messages.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.eligible.load(Ordering::Relaxed),
        )
    }
}

impl Middleware for CompressionMiddleware {
    fn name(&self) -> &str {
        "compression"
    }

    fn process_message(&self, _conn: &Connection, msg: &Message) -> Result<()> {
        let size = serde_json::to_vec(msg).map_or(0, |encoded| encoded.len());
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size as u64, Ordering::Relaxed);
        if self.config.enabled && size >= self.config.min_size {
            self.eligible.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn process_connection(&self, conn: &Connection) -> Result<()> {
        debug!(
            connection_id = %conn.id(),
            enabled = self.config.enabled,
            level = self.config.level,
            "Compression settings"
        );
        Ok(())
    }
}
