//! Compression support for APT repository files.

use crate::{AptRepositoryError, Result};
use std::io::{Read, Write};

/// Supported compression formats for APT repository files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip compression.
    Gzip,
}

impl Compression {
    /// Get the file extension for this compression format.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
        }
    }

    /// Get the MIME type for this compression format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Compression::None => "text/plain",
            Compression::Gzip => "application/gzip",
        }
    }

    /// Compress data using this compression format.
    ///
    /// Gzip output carries no timestamp or file name, so compressing the same
    /// bytes twice yields the same bytes.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder = flate2::GzBuilder::new()
                    .mtime(0)
                    .write(Vec::new(), flate2::Compression::best());
                encoder.write_all(data)?;
                encoder
                    .finish()
                    .map_err(|e| AptRepositoryError::Compression(e.to_string()))
            }
        }
    }

    /// Decompress data using this compression format.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut decompressed = Vec::new();
                let mut decoder = flate2::read::GzDecoder::new(data);
                decoder
                    .read_to_end(&mut decompressed)
                    .map_err(|e| AptRepositoryError::Compression(e.to_string()))?;
                Ok(decompressed)
            }
        }
    }
}
