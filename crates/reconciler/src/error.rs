//! Error types for the reconciler crate.

use themepark_core::{ObjectKey, ResourceKind};
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A kind-specific handler was given a resource of another kind.
    #[error("managed resource is not a {expected} (got {actual})")]
    WrongKind {
        expected: ResourceKind,
        actual: ResourceKind,
    },

    /// A collection could not be listed from the store.
    #[error("failed to list {kind} resources: {reason}")]
    ListFailed { kind: ResourceKind, reason: String },

    /// The attempt's deadline passed or cancellation was signaled.
    #[error("operation cancelled")]
    Cancelled,

    /// A status write raced with another writer.
    #[error("conflict writing {key}: expected version {expected}, found {actual}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    /// The resource does not exist in the store.
    #[error("{key} not found")]
    NotFound { key: ObjectKey },

    /// No handler is registered for the kind.
    #[error("no handler registered for kind {kind}")]
    HandlerNotRegistered { kind: ResourceKind },

    /// Store operation failed.
    #[error("store operation '{operation}' failed: {reason}")]
    StoreFailed { operation: String, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Loop was stopped.
    #[error("reconciliation loop stopped")]
    LoopStopped,
}

impl Error {
    /// Create a wrong kind error.
    #[must_use]
    pub const fn wrong_kind(expected: ResourceKind, actual: ResourceKind) -> Self {
        Self::WrongKind { expected, actual }
    }

    /// Create a list failed error.
    pub fn list_failed(kind: ResourceKind, reason: impl Into<String>) -> Self {
        Self::ListFailed {
            kind,
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    #[must_use]
    pub const fn not_found(key: ObjectKey) -> Self {
        Self::NotFound { key }
    }

    /// Create a store failed error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same attempt later can succeed.
    ///
    /// A wrong-kind dispatch or missing handler never heals on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ListFailed { .. }
            | Self::Cancelled
            | Self::Conflict { .. }
            | Self::StoreFailed { .. } => true,
            Self::WrongKind { .. }
            | Self::NotFound { .. }
            | Self::HandlerNotRegistered { .. }
            | Self::InvalidConfig { .. }
            | Self::LoopStopped => false,
        }
    }
}
