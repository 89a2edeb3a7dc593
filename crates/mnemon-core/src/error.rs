//! Typed errors for the core index structures.

use thiserror::Error;

/// Errors raised by the vector and lexical indices.
///
/// A `DimensionMismatch` is fatal to the offending call only; the index
/// itself remains valid and unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// A vector's length does not match the index's configured
    /// dimensionality.
    #[error("dimension mismatch: index expects {expected} dims, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}
