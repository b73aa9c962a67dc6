//! Ledger backend error types.

/// Errors produced by [`LedgerBackend`](crate::LedgerBackend) operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Underlying database failure, with the operation that hit it.
    #[error("ledger backend error ({context}): {source}")]
    Backend {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be interpreted.
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("ledger backend lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    pub(crate) fn backend(
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: "query",
            source: Box::new(source),
        }
    }

    pub(crate) fn backend_context(
        context: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context,
            source: Box::new(source),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, LedgerError>;
