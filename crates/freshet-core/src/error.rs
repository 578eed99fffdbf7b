use thiserror::Error;

/// Core error types for Freshet caching operations
#[derive(Debug, Error)]
pub enum Error {
    /// Network, HTTP or malformed-response failure from an upstream. Safe to retry.
    #[error("Transient upstream error: {0}")]
    Transient(String),

    /// Authentication or programming error. Never retried.
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// No fetch has ever succeeded for this key.
    #[error("Value unavailable for key {key}")]
    ValueUnavailable { key: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Blob source error: {0}")]
    Blob(String),
}

impl Error {
    /// Create a new Transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a new Permanent error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Create a new ValueUnavailable error
    pub fn value_unavailable(key: impl ToString) -> Self {
        Self::ValueUnavailable {
            key: key.to_string(),
        }
    }

    /// Create a new InvalidConfig error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a new Blob error
    pub fn blob(message: impl Into<String>) -> Self {
        Self::Blob(message.into())
    }

    /// Whether the retrying fetcher may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
            Self::ValueUnavailable { .. } => "value_unavailable",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Blob(_) => "blob",
        }
    }
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
