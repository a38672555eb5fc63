//! Function addresses.
//!
//! A function address has the form
//! `ws(s)://{host}:{port}/{path}/{functionName}/{uniqueId}`.
//!
//! Many functions share one physical connection: the *canonical endpoint*
//! `scheme://host:port/path` drops the per-function suffix and is the key
//! under which connections are pooled.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Scheme
// ============================================================================

/// WebSocket URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain `ws://`.
    Ws,
    /// TLS `wss://`.
    Wss,
}

impl Scheme {
    /// Picks `wss` when TLS is configured.
    #[inline]
    #[must_use]
    pub const fn for_tls(tls: bool) -> Self {
        if tls { Self::Wss } else { Self::Ws }
    }

    /// Returns the scheme string.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }

    /// Returns the default port: 80 or 443.
    #[inline]
    #[must_use]
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::Ws => 80,
            Self::Wss => 443,
        }
    }

    /// Returns `true` for `wss`.
    #[inline]
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::Wss)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ws" => Ok(Self::Ws),
            "wss" => Ok(Self::Wss),
            other => Err(Error::address(other, "unsupported scheme, expected ws or wss")),
        }
    }
}

// ============================================================================
// Address
// ============================================================================

/// Parsed function address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    function: String,
    unique_id: String,
}

impl Address {
    /// Parses and validates an address string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Address`] if the string is not a URL, the scheme is
    /// not `ws`/`wss`, the host is missing, or the path lacks the function
    /// name and unique suffix.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::address(raw, "address is empty"));
        }

        let url = Url::parse(raw).map_err(|e| Error::address(raw, e.to_string()))?;
        let scheme = Scheme::from_str(url.scheme()).map_err(|_| {
            Error::address(raw, format!("unsupported scheme '{}'", url.scheme()))
        })?;

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::address(raw, "missing host"))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(scheme.default_port());

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let [prefix @ .., function, unique_id] = segments.as_slice() else {
            return Err(Error::address(raw, "missing function name or unique id"));
        };

        Ok(Self {
            scheme,
            host,
            port,
            path: prefix.join("/"),
            function: (*function).to_string(),
            unique_id: (*unique_id).to_string(),
        })
    }

    /// Builds a fresh address with a random unique suffix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Address`] if `function` is empty or contains `/`.
    pub fn generate(
        scheme: Scheme,
        host: &str,
        port: u16,
        path: &str,
        function: &str,
    ) -> Result<Self> {
        if function.is_empty() || function.contains('/') {
            return Err(Error::address(
                function,
                "function name must be non-empty and must not contain '/'",
            ));
        }
        if host.is_empty() {
            return Err(Error::address(function, "host is empty"));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port: if port == 0 { scheme.default_port() } else { port },
            path: path.trim_matches('/').to_string(),
            function: function.to_string(),
            unique_id: Uuid::new_v4().simple().to_string(),
        })
    }

    /// Returns the scheme.
    #[inline]
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Returns the host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the path prefix, without slashes at either end.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the function name.
    #[inline]
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Returns the unique suffix.
    #[inline]
    #[must_use]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Returns `scheme://host:port/path`, shared by every function at one
    /// physical endpoint.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}://{}:{}/{}", self.scheme, self.host, self.port, self.path)
    }

    /// Returns `functionName/uniqueId`, the host independent registry key.
    #[must_use]
    pub fn function_key(&self) -> String {
        format!("{}/{}", self.function, self.unique_id)
    }

    /// Returns `host:port`, the listen address of the serving side.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/", self.scheme, self.host, self.port)?;
        if !self.path.is_empty() {
            write!(f, "{}/", self.path)?;
        }
        write!(f, "{}/{}", self.function, self.unique_id)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Validates an address string.
///
/// # Errors
///
/// Same as [`Address::parse`].
#[inline]
pub fn validate_address(raw: &str) -> Result<()> {
    Address::parse(raw).map(|_| ())
}

// ============================================================================
// Tests
// ============================================================================
