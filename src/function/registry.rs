//! Registered functions and server-side dispatch.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::address::Address;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::protocol::Message;

use super::handler::Handler;
use super::io::{FunctionInput, FunctionOutput};
use super::schema::Schema;

// ============================================================================
// FunctionRegistration
// ============================================================================

/// A function exposed by this portal.
///
/// Lives until the portal is closed.
#[derive(Clone)]
pub struct FunctionRegistration {
    /// Parsed address the function was registered at.
    pub address: Address,
    /// Input schema.
    pub schema: Arc<dyn Schema>,
    /// Implementation.
    pub handler: Arc<dyn Handler>,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

impl FunctionRegistration {
    /// Returns the function name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.address.function()
    }
}

impl fmt::Debug for FunctionRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistration")
            .field("address", &self.address.to_string())
            .field("schema", &self.schema.metadata().name)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Functions keyed by `functionName/uniqueId`.
///
/// The key ignores host and port so a function is found whichever host name
/// the caller dialed.
#[derive(Default)]
pub struct Registry {
    functions: RwLock<FxHashMap<String, FunctionRegistration>>,
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registration`] if the address is already taken.
    pub fn insert(&self, registration: FunctionRegistration) -> Result<()> {
        let key = registration.address.function_key();
        let mut functions = self.functions.write();
        if functions.contains_key(&key) {
            return Err(Error::registration(format!(
                "function already registered at {}",
                registration.address
            )));
        }
        debug!(function = %key, "Function registered");
        functions.insert(key, registration);
        Ok(())
    }

    /// Looks up a function by full address or by `functionName/uniqueId`.
    #[must_use]
    pub fn lookup(&self, function: &str) -> Option<FunctionRegistration> {
        let key = Address::parse(function)
            .map(|address| address.function_key())
            .unwrap_or_else(|_| function.to_string());
        self.functions.read().get(&key).cloned()
    }

    /// Returns all registrations.
    #[must_use]
    pub fn list(&self) -> Vec<FunctionRegistration> {
        self.functions.read().values().cloned().collect()
    }

    /// Returns the number of registrations.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }

    /// Removes every registration.
    pub fn clear(&self) {
        self.functions.write().clear();
    }

    /// Runs a `call` message and builds the reply.
    ///
    /// Always produces a `response` or `error` message with the call's ID.
    pub async fn dispatch(&self, ctx: Context, call: Message) -> Message {
        let id = call.id.clone();
        match self.invoke(ctx, call).await {
            Ok(output) => Message::response(id, output.into_value()),
            Err(e) => {
                debug!(id = %id, error = %e, "Call failed");
                Message::error(id, e.to_function_error())
            }
        }
    }

    /// Validates the arguments and runs the handler.
    async fn invoke(&self, ctx: Context, call: Message) -> Result<FunctionOutput> {
        let function = call
            .function
            .ok_or_else(|| Error::validation("call message without function"))?;
        let registration = self
            .lookup(&function)
            .ok_or_else(|| Error::not_found(function.as_str()))?;

        let input = FunctionInput::from_map(call.params.unwrap_or_default());
        let check = registration.schema.validate(&Value::Object(input.to_map()));
        if !check.is_valid() {
            return Err(Error::validation(check.summary()));
        }

        let handler = Arc::clone(&registration.handler);
        tokio::spawn(async move { handler.call(ctx, input).await })
            .await
            .unwrap_or_else(|e| {
                warn!(function = %function, error = %e, "Handler panicked");
                Err(Error::Function(crate::error::FunctionError::internal(
                    "handler panicked",
                )))
            })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::error::FunctionError;
    use crate::function::schema::ObjectSchema;
    use crate::identifiers::MessageId;
    use crate::protocol::MessageType;

    const ADDRESS: &str = "ws://localhost:9000/ws/add/abc";

    fn add_registration() -> FunctionRegistration {
        let handler = |_ctx: Context, input: FunctionInput| async move {
            if input.get_str("operation") == Some("divide-by-zero") {
                return Err(Error::Function(FunctionError::bad_request("division by zero")));
            }
            let sum = input.get_f64("a").unwrap_or(0.0) + input.get_f64("b").unwrap_or(0.0);
            FunctionOutput::from_any(json!({ "result": sum }))
        };
        FunctionRegistration {
            address: Address::parse(ADDRESS).expect("valid"),
            schema: Arc::new(ObjectSchema::new("add").require("a").require("b")),
            handler: Arc::new(handler),
            registered_at: Utc::now(),
        }
    }

    fn call(function: &str, params: serde_json::Value) -> Message {
        Message::call(
            MessageId::generate(),
            function,
            params.as_object().cloned().expect("object"),
        )
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = Registry::new();
        registry.insert(add_registration()).expect("first");
        assert!(matches!(
            registry.insert(add_registration()),
            Err(Error::Registration { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_ignores_host() {
        let registry = Registry::new();
        registry.insert(add_registration()).expect("insert");
        assert!(registry.lookup("ws://127.0.0.1:9000/ws/add/abc").is_some());
        assert!(registry.lookup("add/abc").is_some());
        assert!(registry.lookup("add/other").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let registry = Registry::new();
        registry.insert(add_registration()).expect("insert");

        let msg = call(ADDRESS, json!({"a": 2, "b": 3}));
        let id = msg.id.clone();
        let reply = registry.dispatch(Context::new(), msg).await;

        assert_eq!(reply.id, id);
        assert_eq!(reply.kind, MessageType::Response);
        assert_eq!(reply.result, Some(json!({"result": 5.0})));
    }

    #[tokio::test]
    async fn test_dispatch_application_error() {
        let registry = Registry::new();
        registry.insert(add_registration()).expect("insert");

        let msg = call(ADDRESS, json!({"a": 2, "b": 3, "operation": "divide-by-zero"}));
        let reply = registry.dispatch(Context::new(), msg).await;

        assert_eq!(reply.kind, MessageType::Error);
        assert_eq!(reply.error.expect("payload").code, 400);
        assert!(reply.result.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_schema_rejection() {
        let registry = Registry::new();
        registry.insert(add_registration()).expect("insert");

        let reply = registry.dispatch(Context::new(), call(ADDRESS, json!({"a": 2}))).await;
        let payload = reply.error.expect("payload");
        assert_eq!(payload.code, 400);
        assert!(payload.message.contains("/b"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_function() {
        let registry = Registry::new();
        let reply = registry
            .dispatch(Context::new(), call("ws://h:1/ws/nope/1", json!({})))
            .await;
        assert_eq!(reply.error.expect("payload").code, 404);
    }
}
