use std::error::Error as StdError;

/// Crate-wide result type for hub and channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors shared across the hub traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The hub reported that the requested resource does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Operation is currently unavailable (not configured/ready).
    #[error("operation unavailable: {message}")]
    Unavailable { message: String },

    /// The request is well-formed but the relay does not support it.
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    /// Wrapped source error from an external dependency.
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound {
            what: what.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unsupported(message: impl std::fmt::Display) -> Self {
        Self::Unsupported {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
