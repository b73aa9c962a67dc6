//! Structured error model for store, archive, and codec operations.
//!
//! [`ArchiveError`] carries a category that decides retry behavior. Construct
//! via the category-specific factory methods.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad classification of a pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Relational source query or connection failure (retryable by the caller).
    StoreUnavailable,
    /// Object-store hiccup (retryable per record).
    TransientIo,
    /// Object store rejected the write (invalid key, quota, permissions).
    Permanent,
    /// Malformed record or document.
    Serialization,
    /// Read-side miss.
    NotFound,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StoreUnavailable => "store_unavailable",
            Self::TransientIo => "transient_io",
            Self::Permanent => "permanent",
            Self::Serialization => "serialization",
            Self::NotFound => "not_found",
        }
    }

    /// Parse the storage form written by [`ErrorCategory::as_str`].
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "store_unavailable" => Some(Self::StoreUnavailable),
            "transient_io" => Some(Self::TransientIo),
            "permanent" => Some(Self::Permanent),
            "serialization" => Some(Self::Serialization),
            "not_found" => Some(Self::NotFound),
            _ => None,
        }
    }

    fn default_retryable(self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::TransientIo)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error from a store, archive, or codec operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct ArchiveError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ArchiveError {
    fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable: category.default_retryable(),
            retry_after_ms: None,
        }
    }

    /// Relational source unavailable (retryable).
    #[must_use]
    pub fn store_unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::StoreUnavailable, code, message)
    }

    /// Transient object-store failure (retryable).
    #[must_use]
    pub fn transient_io(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientIo, code, message)
    }

    /// Permanent object-store rejection (not retryable).
    #[must_use]
    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Permanent, code, message)
    }

    /// Malformed record or document (not retryable).
    #[must_use]
    pub fn serialization(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Serialization, code, message)
    }

    /// Missing record or object (not retryable).
    #[must_use]
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, code, message)
    }

    /// Ask the caller to wait at least `ms` before retrying.
    #[must_use]
    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.category == ErrorCategory::NotFound
    }
}
