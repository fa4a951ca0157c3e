//! Error types for publishing into an APT repository.

use std::time::Duration;

use apt_repository::AptRepositoryError;
use thiserror::Error;

use crate::store::StoreError;

/// Errors that end a publish attempt.
///
/// None of these are recovered from internally; the caller may retry the
/// whole publish.
#[derive(Error, Debug)]
pub enum Error {
    /// The package's control metadata lacks its identity fields.
    #[error("Malformed package metadata: {0}")]
    MalformedMetadata(String),

    /// A stored index could not be parsed.
    #[error("Corrupt index {path}: {message}")]
    CorruptIndex {
        /// Object path of the index.
        path: String,
        /// What was wrong with it.
        message: String,
    },

    /// Local I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An object store operation failed.
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    /// The lock could not be acquired within the configured wait.
    #[error("Timed out after {waited:?} waiting for lock {path}")]
    LockTimeout {
        /// Object path of the lock token.
        path: String,
        /// How long acquisition was attempted.
        waited: Duration,
    },

    /// A Packages index known to the Release file was not available.
    #[error("Release for {codename} is incomplete: no index bytes for {component}/binary-{architecture}")]
    IncompleteAggregate {
        /// Codename being aggregated.
        codename: String,
        /// Component of the missing index.
        component: String,
        /// Architecture of the missing index.
        architecture: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether this failure came from local or remote I/O.
    pub fn is_io_failure(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Store(_))
    }

    /// Attach the object path to a parse failure of a stored index.
    pub(crate) fn from_index(path: &str, err: AptRepositoryError) -> Self {
        match err {
            AptRepositoryError::Io(e) => Error::Io(e),
            other => Error::CorruptIndex {
                path: path.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<AptRepositoryError> for Error {
    fn from(err: AptRepositoryError) -> Self {
        match err {
            AptRepositoryError::Io(e) => Error::Io(e),
            AptRepositoryError::MalformedMetadata(msg) => Error::MalformedMetadata(msg),
            AptRepositoryError::Compression(msg) => {
                Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
            }
            other => Error::CorruptIndex {
                path: String::new(),
                message: other.to_string(),
            },
        }
    }
}

/// Result type for publish operations.
pub type Result<T> = std::result::Result<T, Error>;
