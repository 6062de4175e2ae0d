use thiserror::Error;

/// Coarse classification of an [`Error`], for callers that translate errors
/// into their own exception hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Storage,
    Sync,
    Config,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input or an operation that does not apply to the current state.
    #[error("validation error: {0}")]
    Validation(String),
    /// I/O failure, missing path, permission problem, or corrupt stored data.
    #[error("storage error: {0}")]
    Storage(String),
    /// Transport failure or a sync protocol violation.
    #[error("sync error: {0}")]
    Sync(String),
    /// The server history moved past the version this client based its work on.
    #[error("version conflict: expected server version {expected}, server is at {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    /// Malformed or incomplete configuration, detected before any I/O.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Sync(_) | Self::VersionConflict { .. } => ErrorKind::Sync,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("corrupt stored data: {err}"))
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Self::Sync(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Shorthand for `Err(Error::Validation(format!(..)))`, in the spirit of `anyhow::bail!`.
macro_rules! invalid {
    ($($arg:tt)*) => {
        return Err($crate::errors::Error::Validation(format!($($arg)*)))
    };
}
pub(crate) use invalid;
