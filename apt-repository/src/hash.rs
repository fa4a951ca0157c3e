//! Cryptographic hashing support for APT repositories.
//!
//! Payloads are hashed in a single streaming pass: [`MultiHasher`] feeds each
//! chunk to every requested digest, so a package file of any size is read
//! exactly once and never held in memory.

use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

/// Size of the buffer used when streaming a payload through the hashers.
#[cfg(feature = "async")]
const CHUNK_SIZE: usize = 64 * 1024;

/// Supported hash algorithms for APT repositories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum HashAlgorithm {
    /// MD5 hash algorithm.
    Md5,
    /// SHA-1 hash algorithm.
    Sha1,
    /// SHA-256 hash algorithm.
    Sha256,
    /// SHA-512 hash algorithm.
    Sha512,
}

impl HashAlgorithm {
    /// Get the string representation used in Release files.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5Sum",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }

    /// Get the field name used in Packages stanzas.
    pub fn control_field(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5sum",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }

    /// Get all supported hash algorithms.
    pub fn all() -> &'static [HashAlgorithm] {
        &[
            HashAlgorithm::Md5,
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha512,
        ]
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A set of hashes for a single file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HashSet {
    hashes: BTreeMap<HashAlgorithm, String>,
}

impl HashSet {
    /// Create a new empty hash set.
    pub fn new() -> Self {
        Self {
            hashes: BTreeMap::new(),
        }
    }

    /// Add a hash to the set.
    pub fn insert(&mut self, algorithm: HashAlgorithm, hash: String) {
        self.hashes.insert(algorithm, hash);
    }

    /// Get a hash by algorithm.
    pub fn get(&self, algorithm: &HashAlgorithm) -> Option<&str> {
        self.hashes.get(algorithm).map(|s| s.as_str())
    }

    /// Iterate over the hashes, weakest algorithm first.
    pub fn iter(&self) -> impl Iterator<Item = (&HashAlgorithm, &str)> {
        self.hashes.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Check if the hash set is empty.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Get the number of hashes in the set.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }
}

/// A file with its associated hashes and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedFile {
    /// The path of the file, relative to the Release file.
    pub path: String,
    /// The size of the file in bytes.
    pub size: u64,
    /// The hashes of the file.
    pub hashes: HashSet,
}

impl HashedFile {
    /// Create a new hashed file.
    pub fn new<S: Into<String>>(path: S, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            hashes: HashSet::new(),
        }
    }

    /// Hash in-memory contents and record them under `path`.
    pub fn from_data<S: Into<String>>(path: S, data: &[u8], algorithms: &[HashAlgorithm]) -> Self {
        let (size, hashes) = hash_data(data, algorithms);
        Self {
            path: path.into(),
            size,
            hashes,
        }
    }

    /// Add a hash to the file.
    pub fn add_hash(&mut self, algorithm: HashAlgorithm, hash: String) {
        self.hashes.insert(algorithm, hash);
    }

    /// Get a hash by algorithm.
    pub fn get_hash(&self, algorithm: &HashAlgorithm) -> Option<&str> {
        self.hashes.get(algorithm)
    }
}

/// A multi-hash calculator that can compute multiple hash algorithms simultaneously.
pub struct MultiHasher {
    md5: Option<md5::Context>,
    sha1: Option<sha1::Sha1>,
    sha256: Option<sha2::Sha256>,
    sha512: Option<sha2::Sha512>,
    size: u64,
}

impl MultiHasher {
    /// Create a new multi-hasher with the specified algorithms.
    pub fn new(algorithms: &[HashAlgorithm]) -> Self {
        let mut hasher = Self {
            md5: None,
            sha1: None,
            sha256: None,
            sha512: None,
            size: 0,
        };

        for &algorithm in algorithms {
            match algorithm {
                HashAlgorithm::Md5 => hasher.md5 = Some(md5::Context::new()),
                HashAlgorithm::Sha1 => hasher.sha1 = Some(sha1::Sha1::new()),
                HashAlgorithm::Sha256 => hasher.sha256 = Some(sha2::Sha256::new()),
                HashAlgorithm::Sha512 => hasher.sha512 = Some(sha2::Sha512::new()),
            }
        }

        hasher
    }

    /// Update the hashes with the given data.
    pub fn update(&mut self, data: &[u8]) {
        self.size += data.len() as u64;

        if let Some(ref mut hasher) = self.md5 {
            hasher.consume(data);
        }
        if let Some(ref mut hasher) = self.sha1 {
            hasher.update(data);
        }
        if let Some(ref mut hasher) = self.sha256 {
            hasher.update(data);
        }
        if let Some(ref mut hasher) = self.sha512 {
            hasher.update(data);
        }
    }

    /// Finalize the hashes and return the results.
    pub fn finalize(self) -> (u64, HashSet) {
        let mut hash_set = HashSet::new();

        if let Some(hasher) = self.md5 {
            hash_set.insert(HashAlgorithm::Md5, hex::encode(hasher.compute().0));
        }
        if let Some(hasher) = self.sha1 {
            hash_set.insert(HashAlgorithm::Sha1, hex::encode(hasher.finalize()));
        }
        if let Some(hasher) = self.sha256 {
            hash_set.insert(HashAlgorithm::Sha256, hex::encode(hasher.finalize()));
        }
        if let Some(hasher) = self.sha512 {
            hash_set.insert(HashAlgorithm::Sha512, hex::encode(hasher.finalize()));
        }

        (self.size, hash_set)
    }

    /// Get the current size.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Write for MultiHasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Hash a reader with the specified algorithms.
pub fn hash_reader<R: Read>(mut reader: R, algorithms: &[HashAlgorithm]) -> Result<(u64, HashSet)> {
    let mut hasher = MultiHasher::new(algorithms);
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Hash an async reader with the specified algorithms, one chunk at a time.
#[cfg(feature = "async")]
pub async fn hash_async_reader<R>(mut reader: R, algorithms: &[HashAlgorithm]) -> Result<(u64, HashSet)>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut hasher = MultiHasher::new(algorithms);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}

/// Hash data with the specified algorithms.
pub fn hash_data(data: &[u8], algorithms: &[HashAlgorithm]) -> (u64, HashSet) {
    let mut hasher = MultiHasher::new(algorithms);
    hasher.update(data);
    hasher.finalize()
}
