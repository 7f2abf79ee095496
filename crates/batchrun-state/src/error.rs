//! Job store error types.

/// Errors produced by [`JobStore`](crate::JobStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying storage failure, with the operation that hit it.
    #[error("job store error{}: {source}", context.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Backend {
        context: Option<String>,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("job store lock poisoned")]
    LockPoisoned,
}

impl StateError {
    /// Wrap a storage error without operation context.
    #[must_use]
    pub fn backend(source: rusqlite::Error) -> Self {
        Self::Backend {
            context: None,
            source,
        }
    }

    /// Wrap a storage error with the operation that produced it.
    #[must_use]
    pub fn backend_context(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Backend {
            context: Some(context.into()),
            source,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
