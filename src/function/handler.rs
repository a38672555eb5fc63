//! Function handler contract.
//!
//! Any `Fn(Context, FunctionInput) -> impl Future<Output = Result<FunctionOutput>>`
//! closure is a [`Handler`]:
//!
//! ```ignore
//! let add = |_ctx: Context, input: FunctionInput| async move {
//!     let sum = input.get_f64("a").unwrap_or(0.0) + input.get_f64("b").unwrap_or(0.0);
//!     FunctionOutput::from_any(json!({ "result": sum }))
//! };
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;

use super::io::{FunctionInput, FunctionOutput};

// ============================================================================
// Handler
// ============================================================================

/// Server-side implementation of a function.
///
/// Returning [`crate::Error::Function`] sends its status code to the caller.
/// Validation errors map to 400 and everything else to 500.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs the function.
    async fn call(&self, ctx: Context, input: FunctionInput) -> Result<FunctionOutput>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Context, FunctionInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<FunctionOutput>> + Send + 'static,
{
    async fn call(&self, ctx: Context, input: FunctionInput) -> Result<FunctionOutput> {
        (self)(ctx, input).await
    }
}
