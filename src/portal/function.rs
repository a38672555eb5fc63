//! Function handles returned by the portal.
//!
//! [`Endpoint`] is the server-side receipt of a registration. [`RemoteFunction`]
//! is the client-side handle that actually sends calls.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::address::Address;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::function::{FunctionInput, FunctionOutput, Schema};

use super::Portal;

// ============================================================================
// Endpoint
// ============================================================================

/// Describes a function registered on this portal.
///
/// It represents the serving side only; calls go through a
/// [`RemoteFunction`] resolved from [`Endpoint::address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    address: Address,
}

impl Endpoint {
    pub(crate) fn new(address: Address) -> Self {
        Self { address }
    }

    /// Returns the registered address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns the function name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.address.function()
    }

    /// Always fails: an endpoint cannot be called directly.
    ///
    /// # Errors
    ///
    /// Always returns [`Error::Registration`].
    pub async fn call(&self, _ctx: &Context, _input: FunctionInput) -> Result<FunctionOutput> {
        Err(Error::registration(format!(
            "{} is a server-side endpoint; resolve it to call it",
            self.address
        )))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.address, f)
    }
}

// ============================================================================
// RemoteFunction
// ============================================================================

/// Client-side handle to a remote function.
///
/// Resolving performs no I/O; the connection is opened by the first call.
#[derive(Clone)]
pub struct RemoteFunction {
    portal: Portal,
    address: Address,
    schema: Option<Arc<dyn Schema>>,
    timeout: Option<Duration>,
}

impl fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("address", &self.address.to_string())
            .field("schema", &self.schema.as_ref().map(|s| s.metadata().name))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteFunction {
    pub(crate) fn new(portal: Portal, address: Address, schema: Option<Arc<dyn Schema>>) -> Self {
        Self {
            portal,
            address,
            schema,
            timeout: None,
        }
    }

    /// Returns the target address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns the schema if the function is registered on this portal.
    #[inline]
    #[must_use]
    pub fn schema(&self) -> Option<&Arc<dyn Schema>> {
        self.schema.as_ref()
    }

    /// Returns the per-call timeout override.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Overrides the portal's default call timeout for this handle.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Calls the function once.
    ///
    /// # Errors
    ///
    /// See [`Portal::call_function`].
    pub async fn call(&self, ctx: &Context, input: FunctionInput) -> Result<FunctionOutput> {
        let timeout = self.timeout.unwrap_or(self.portal.config().default_timeout);
        self.portal
            .call_address(ctx, &self.address, input, timeout)
            .await
    }

    /// Calls the function with the portal's retry policy.
    ///
    /// # Errors
    ///
    /// See [`Portal::call_with_retry`].
    pub async fn call_with_retry(&self, ctx: &Context, input: FunctionInput) -> Result<FunctionOutput> {
        self.portal
            .retry_policy()
            .run(ctx, |_| self.call(ctx, input.clone()))
            .await
    }
}
