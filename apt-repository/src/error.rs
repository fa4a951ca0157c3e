//! Error types for the APT repository library.

/// Result type for APT repository operations.
pub type Result<T> = std::result::Result<T, AptRepositoryError>;

/// Errors that can occur when working with APT repository indexes.
#[derive(Debug, thiserror::Error)]
pub enum AptRepositoryError {
    /// I/O error occurred while reading a payload or index.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Control metadata of a package lacks identity fields or is unparseable.
    #[error("Malformed package metadata: {0}")]
    MalformedMetadata(String),

    /// A stored index could not be parsed back into records.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// Compression error.
    #[error("Compression error: {0}")]
    Compression(String),
}

impl AptRepositoryError {
    /// Create a new malformed metadata error.
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedMetadata(msg.into())
    }

    /// Create a new corrupt index error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Self::CorruptIndex(msg.into())
    }
}
