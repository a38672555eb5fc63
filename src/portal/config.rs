//! Portal configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ws_portal::PortalConfig;
//!
//! let config = PortalConfig::new()
//!     .with_host("127.0.0.1")
//!     .with_port(9400)
//!     .with_default_timeout(Duration::from_secs(5))
//!     .with_header("Authorization", "Bearer secret");
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::address::Scheme;
use crate::error::{Error, Result};
use crate::middleware::CompressionConfig;
use crate::transport::Keepalive;

// ============================================================================
// Defaults
// ============================================================================

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PATH: &str = "ws";
const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 << 20;

// ============================================================================
// TlsConfig
// ============================================================================

/// Enables TLS addressing.
///
/// With TLS set, generated addresses use `wss` and outbound dials verify the
/// server against the bundled webpki roots. Inbound TLS is expected to be
/// terminated in front of the portal's listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsConfig;

// ============================================================================
// PortalConfig
// ============================================================================

/// Settings shared by every connection and call of a portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    /// Host used for generated addresses.
    pub host: String,

    /// Port used for generated addresses. `0` selects the scheme default.
    pub port: u16,

    /// Path prefix used for generated addresses.
    pub path: String,

    /// TLS settings. `Some` switches generated addresses to `wss`.
    pub tls: Option<TlsConfig>,

    /// Socket read buffer size in bytes.
    pub read_buffer_size: usize,

    /// Socket write buffer size in bytes.
    pub write_buffer_size: usize,

    /// Largest accepted message in bytes.
    pub max_message_size: usize,

    /// Bound on dialing and on the upgrade of accepted sockets.
    pub handshake_timeout: Duration,

    /// Interval between keepalive pings. `None` disables them.
    pub ping_interval: Option<Duration>,

    /// Silence tolerated after a ping before the socket is dropped.
    pub pong_timeout: Duration,

    /// Silence tolerated on an idle socket. Overrides the ping based limit.
    pub read_timeout: Option<Duration>,

    /// Bound on a single frame write.
    pub write_timeout: Duration,

    /// Installs a [`CompressionMiddleware`](crate::middleware::CompressionMiddleware)
    /// stage when the portal is created.
    pub compression: bool,

    /// Per-call timeout unless a function overrides it.
    pub default_timeout: Duration,

    /// Extra attempts made by the retry layer.
    pub max_retries: u32,

    /// Pause between retry attempts.
    pub retry_delay: Duration,

    /// Headers attached to every outbound `call` message.
    pub headers: FxHashMap<String, String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: 0,
            path: DEFAULT_PATH.to_string(),
            tls: None,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Some(Duration::from_secs(30)),
            pong_timeout: Duration::from_secs(10),
            read_timeout: None,
            write_timeout: Duration::from_secs(10),
            compression: false,
            default_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            headers: FxHashMap::default(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl PortalConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the path prefix.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Enables TLS addressing.
    #[inline]
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Sets read and write buffer sizes.
    #[inline]
    #[must_use]
    pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    /// Sets the largest accepted message.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the keepalive ping interval.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    /// Disables keepalive pings.
    #[inline]
    #[must_use]
    pub fn without_ping(mut self) -> Self {
        self.ping_interval = None;
        self
    }

    /// Sets the pong timeout.
    #[inline]
    #[must_use]
    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Sets the idle read timeout.
    #[inline]
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Sets the write timeout.
    #[inline]
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the compression flag.
    ///
    /// See [`PortalConfig::compression_config`].
    #[inline]
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Sets the default per-call timeout.
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the number of retries.
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the delay between retries.
    #[inline]
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Adds a header to every outbound call.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl PortalConfig {
    /// Returns the scheme for generated addresses.
    #[inline]
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        Scheme::for_tls(self.tls.is_some())
    }

    /// Returns the socket settings for tungstenite.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .read_buffer_size(self.read_buffer_size)
            .write_buffer_size(self.write_buffer_size)
            .max_message_size(Some(self.max_message_size))
    }

    /// Settings for the compression stage, if compression is on.
    #[must_use]
    pub fn compression_config(&self) -> Option<CompressionConfig> {
        self.compression.then_some(CompressionConfig::default())
    }

    /// Returns the event loop keepalive settings.
    ///
    /// The idle limit is `read_timeout` when set, otherwise
    /// `ping_interval + pong_timeout`.
    #[must_use]
    pub fn keepalive(&self) -> Keepalive {
        let idle_timeout = self
            .read_timeout
            .or_else(|| self.ping_interval.map(|ping| ping + self.pong_timeout));
        Keepalive {
            ping_interval: self.ping_interval,
            idle_timeout,
            write_timeout: self.write_timeout,
        }
    }

    /// Checks the settings for values the portal cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if self.path.split('/').any(|segment| segment.contains(char::is_whitespace)) {
            return Err(Error::config("path must not contain whitespace"));
        }
        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(Error::config("buffer sizes must be positive"));
        }
        if self.max_message_size == 0 {
            return Err(Error::config("max_message_size must be positive"));
        }

        let durations = [
            ("handshake_timeout", self.handshake_timeout),
            ("write_timeout", self.write_timeout),
            ("default_timeout", self.default_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(Error::config(format!("{name} must be positive")));
        }
        if self.ping_interval.is_some_and(|ping| ping.is_zero()) {
            return Err(Error::config("ping_interval must be positive"));
        }
        if self.ping_interval.is_some() && self.pong_timeout.is_zero() {
            return Err(Error::config("pong_timeout must be positive when pinging"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_config_follows_flag() {
        assert_eq!(PortalConfig::default().compression_config(), None);

        let settings = PortalConfig::new()
            .with_compression(true)
            .compression_config()
            .expect("enabled");
        assert!(settings.enabled);
        assert_eq!(settings.min_size, CompressionConfig::default().min_size);
    }

    #[test]
    fn test_defaults() {
        let config = PortalConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 0);
        assert_eq!(config.path, "ws");
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.scheme(), Scheme::Ws);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tls_selects_wss() {
        let config = PortalConfig::new().with_tls(TlsConfig);
        assert_eq!(config.scheme(), Scheme::Wss);
    }

    #[test]
    fn test_keepalive_derivation() {
        let config = PortalConfig::new()
            .with_ping_interval(Duration::from_secs(5))
            .with_pong_timeout(Duration::from_secs(2));
        assert_eq!(config.keepalive().idle_timeout, Some(Duration::from_secs(7)));

        let config = config.with_read_timeout(Duration::from_secs(60));
        assert_eq!(config.keepalive().idle_timeout, Some(Duration::from_secs(60)));

        let config = PortalConfig::new().without_ping();
        assert_eq!(config.keepalive().idle_timeout, None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            PortalConfig::new().with_host("").validate(),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            PortalConfig::new().with_default_timeout(Duration::ZERO).validate(),
            Err(Error::Config { ref message }) if message.contains("default_timeout")
        ));
        assert!(PortalConfig::new().with_max_message_size(0).validate().is_err());
    }

    #[test]
    fn test_headers() {
        let config = PortalConfig::new().with_header("X-API-Key", "k");
        assert_eq!(config.headers.get("X-API-Key").map(String::as_str), Some("k"));
    }
}
