//! Error taxonomy for the discovery core.
//!
//! One flat enum, the way this codebase structures error handling elsewhere:
//! callers match on `Error` directly, or go through [`Error::category`] /
//! [`Error::is_retryable`] when they want to react generically (log and
//! continue vs. surface to the caller vs. retry).

use std::fmt;

/// Result type alias for discovery-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad bucket an error falls into, independent of the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed wire bytes, bad configuration values.
    Validation,
    /// Certificate/identity failures from the presence layer.
    Security,
    /// Radio or platform adapter unavailable, or an operation was cancelled.
    Platform,
    /// Anything else (I/O, serialization).
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    NoRetry,
    LinearBackoff { max_retries: u32 },
}

impl ErrorCategory {
    pub fn severity(self) -> ErrorSeverity {
        match self {
            ErrorCategory::Validation => ErrorSeverity::Low,
            ErrorCategory::Security => ErrorSeverity::High,
            ErrorCategory::Platform => ErrorSeverity::Medium,
            ErrorCategory::Internal => ErrorSeverity::Medium,
        }
    }

    pub fn retry_strategy(self) -> RetryStrategy {
        match self {
            ErrorCategory::Validation => RetryStrategy::NoRetry,
            ErrorCategory::Security => RetryStrategy::NoRetry,
            ErrorCategory::Platform => RetryStrategy::LinearBackoff { max_retries: 3 },
            ErrorCategory::Internal => RetryStrategy::NoRetry,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Security => "security",
            ErrorCategory::Platform => "platform",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed header, advertisement, or data-element bytes.
    #[error("failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    /// Advertisement refers to a service id that is not currently tracked.
    #[error("unknown service id: {0}")]
    UnknownService(String),

    /// A GATT read is suppressed by the read-result cache's backoff.
    #[error("read backoff in effect for header")]
    CacheBackoff,

    /// The certificate manager could not produce or apply identity material.
    #[error("identity error: {0}")]
    Identity(String),

    /// No usable radio / adapter is available on this platform.
    #[error("radio unavailable")]
    RadioUnavailable,

    /// The operation was cancelled via a cancellation flag before completing.
    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn parse(what: &'static str, reason: impl Into<String>) -> Self {
        Error::Parse {
            what,
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Parse { .. } => ErrorCategory::Validation,
            Error::UnknownService(_) => ErrorCategory::Validation,
            Error::CacheBackoff => ErrorCategory::Validation,
            Error::Identity(_) => ErrorCategory::Security,
            Error::RadioUnavailable => ErrorCategory::Platform,
            Error::Cancelled => ErrorCategory::Platform,
            Error::Serialization(_) => ErrorCategory::Internal,
            Error::Io(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.category().severity()
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        self.category().retry_strategy()
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.retry_strategy(), RetryStrategy::NoRetry)
    }
}
