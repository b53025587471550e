/// Crate-wide result type for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration is missing or invalid. Raised before anything connects.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error(transparent)]
    Channel(#[from] hubrelay_channels::Error),

    #[error(transparent)]
    ConfigFile(#[from] hubrelay_config::Error),

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    /// Every org exhausted its startup attempts.
    #[error("no org session could be connected")]
    NoSessionConnected,

    #[error("unknown org label: {label}")]
    UnknownOrg { label: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn config(message: impl std::fmt::Display) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }
}
