//! Runtime error taxonomy.
//!
//! Only plugin-load errors abort startup. Everything else in the
//! retrieval/composition/action path degrades locally: provider failures
//! become empty contributions, action failures become failed results
//! with user-facing text. Index errors are re-exported from the core
//! crate.

use thiserror::Error;

pub use mnemon_core::error::IndexError;

/// Fatal plugin-load errors. Raised before any plugin initializes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The declared dependency graph contains a cycle.
    #[error("cyclic plugin dependency involving '{plugin}'")]
    CyclicDependency { plugin: String },

    /// A plugin depends on a name no registered plugin provides.
    #[error("plugin '{plugin}' depends on unknown plugin '{dependency}'")]
    MissingDependency { plugin: String, dependency: String },
}

/// Why a provider contributed nothing to a composition pass.
///
/// Recorded on the [`ComposedState`](crate::state::ComposedState) for
/// observability; never propagated to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFailureKind {
    /// The provider's future exceeded its timeout.
    Timeout,
    /// The provider returned an error.
    Error,
    /// The composer's overall time budget was already exhausted.
    BudgetExhausted,
}

impl std::fmt::Display for ProviderFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Error => write!(f, "error"),
            Self::BudgetExhausted => write!(f, "budget exhausted"),
        }
    }
}
