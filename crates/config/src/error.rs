use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while locating, reading or writing config files.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to serialize config: {message}")]
    Serialize { message: String },

    #[error("unsupported config format: .{ext}")]
    UnsupportedFormat { ext: String },

    #[error("no config file found (searched {searched})")]
    NotFound { searched: String },
}
