//! Error types for ipgeo.

use thiserror::Error;

/// Error type for ipgeo operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid schedule, interval or other configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Download failed (transport error or unexpected HTTP status)
    #[error("remote error: {0}")]
    Remote(String),

    /// Upstream answered with a JSON error document instead of the database
    #[error("remote error payload from {url}: {body}")]
    RemotePayload { url: String, body: String },

    /// Truncated or corrupt database, or a malformed record string
    #[error("format error: {0}")]
    Format(String),

    /// Malformed IPv4 address given to lookup
    #[error("invalid IPv4 address: {0}")]
    InvalidInput(String),

    /// Valid address with no matching range
    #[error("no record found for {0}")]
    NotFound(String),

    /// Lookup attempted before the first snapshot was published
    #[error("ip geo database not ready")]
    NotReady,

    /// Unexpected fault recovered at a component boundary
    #[error("internal fault: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Zip container error
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Coarse classification of [`Error`], one per failure category callers
/// are expected to tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigError,
    RemoteError,
    FormatError,
    InvalidInput,
    NotFound,
    NotReady,
    InternalFault,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Yaml(_) => ErrorKind::ConfigError,
            Error::Remote(_) | Error::RemotePayload { .. } => ErrorKind::RemoteError,
            Error::Format(_) | Error::Zip(_) => ErrorKind::FormatError,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::NotReady => ErrorKind::NotReady,
            Error::Internal(_) | Error::Io(_) => ErrorKind::InternalFault,
        }
    }

    /// Build an internal fault from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Error::Internal(msg)
    }
}

impl From<ureq::Error> for Error {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, resp) => Error::Remote(format!(
                "{}: expected status code 200, but got {}",
                resp.get_url(),
                code
            )),
            ureq::Error::Transport(t) => Error::Remote(format!("transport error: {}", t)),
        }
    }
}

/// Result type alias for ipgeo operations.
pub type Result<T> = std::result::Result<T, Error>;
