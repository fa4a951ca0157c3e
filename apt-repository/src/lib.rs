//! # APT Repository Library
//!
//! A Rust library for reading and writing the index files of an APT
//! repository: `Packages` indexes (one per component and architecture) and the
//! `Release` file that summarizes them, plus the streaming digests and
//! compression those files need.
//!
//! Parsing is lossless for fields the library does not model, and
//! serialization uses one canonical field order, so re-writing an unchanged
//! index reproduces it byte for byte.
//!
//! ## Example
//!
//! ```rust
//! use apt_repository::{HashAlgorithm, PackageFile, Stanza, Package};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let control = Stanza::parse("Package: hello\nVersion: 2.10-3\nArchitecture: amd64\n")?;
//! let (size, hashes) = apt_repository::hash::hash_data(b"payload", HashAlgorithm::all());
//! let package = Package::from_control(&control, hashes, "pool/main/h/hello/hello_2.10-3_amd64.deb", size)?;
//!
//! let mut index = PackageFile::new();
//! index.insert(package);
//! let text = index.to_string();
//! assert_eq!(text.parse::<PackageFile>()?, index);
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod error;
pub mod hash;
pub mod packages;
pub mod release;
pub mod stanza;

pub use compression::Compression;
pub use error::{AptRepositoryError, Result};
pub use hash::{HashAlgorithm, HashSet, HashedFile};
pub use packages::{Package, PackageFile, PackageKey};
pub use release::{Release, ReleaseBuilder};
pub use stanza::Stanza;

/// Hash algorithms recorded for package files and index files.
pub const DEFAULT_HASH_ALGORITHMS: &[HashAlgorithm] = &[
    HashAlgorithm::Md5,
    HashAlgorithm::Sha1,
    HashAlgorithm::Sha256,
    HashAlgorithm::Sha512,
];
