//! Context provider contract.
//!
//! Providers are the pluggable sources the composer queries on every
//! inbound message: retrieval, entity facts, conversation goals, remote
//! APIs. Implementations are registered by name and executed in priority
//! order; a provider may read the partial state accumulated by
//! higher-priority providers in the same pass.

use anyhow::Result;
use async_trait::async_trait;

use crate::state::{ComposedState, Message, ProviderOutput};

/// A pluggable context source consumed by the composer.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use mnemon::provider::ContextProvider;
/// use mnemon::state::{ComposedState, Message, ProviderOutput};
///
/// pub struct TimeProvider;
///
/// #[async_trait]
/// impl ContextProvider for TimeProvider {
///     fn name(&self) -> &str { "time" }
///
///     async fn get(&self, _message: &Message, _state: &ComposedState) -> Result<ProviderOutput> {
///         Ok(ProviderOutput::with_text(format!("It is {}", chrono::Utc::now())))
///     }
/// }
/// ```
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Registry name. Re-registering the same name replaces the prior
    /// entry.
    fn name(&self) -> &str;

    /// Execution priority. Higher runs earlier; equal priorities keep
    /// registration order.
    fn priority(&self) -> i32 {
        0
    }

    /// Dynamic providers run only when a composition pass explicitly
    /// requests them by name, bounding cost for expensive sources such
    /// as retrieval.
    fn dynamic(&self) -> bool {
        false
    }

    /// Produce this provider's contribution.
    ///
    /// `state` holds the partial output of providers that already ran in
    /// this pass. A returned error (or a timeout) becomes an empty
    /// contribution; it never aborts the composition.
    async fn get(&self, message: &Message, state: &ComposedState) -> Result<ProviderOutput>;
}
