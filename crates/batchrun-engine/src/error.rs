//! Engine error model.
//!
//! [`EngineError`] splits failures into typed dependency errors (which
//! carry retry metadata) and opaque infrastructure errors (task panics,
//! store corruption, poisoned locks) that are never retryable.

use batchrun_types::error::DependencyError;

/// Categorized engine error.
///
/// `Dependency` wraps a typed [`DependencyError`] with retry metadata.
/// `Infrastructure` wraps opaque host-side errors (join errors, state
/// store failures surfaced outside a retry scope, etc.).
#[derive(Debug)]
pub enum EngineError {
    /// Typed dependency error with retry metadata.
    Dependency(DependencyError),
    /// Infrastructure error (task panic, store internals, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dependency(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<DependencyError> for EngineError {
    fn from(e: DependencyError) -> Self {
        Self::Dependency(e)
    }
}

impl EngineError {
    /// Returns `true` if this is a typed dependency error marked retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Dependency(e) => e.is_retryable(),
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed dependency error if this is a `Dependency` variant.
    #[must_use]
    pub fn as_dependency_error(&self) -> Option<&DependencyError> {
        match self {
            Self::Dependency(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }
}
