//! Packages indexes and where they live in the store.

use apt_repository::{Compression, Package, PackageFile, PackageKey};
use std::fmt;

use crate::config::LockScope;
use crate::error::{Error, Result};

/// Object path of the Release file for `codename`.
pub fn release_path(codename: &str) -> String {
    format!("dists/{}/Release", codename)
}

/// Identifies one Packages index: a codename, component and architecture.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifestKey {
    pub codename: String,
    pub component: String,
    pub architecture: String,
}

impl ManifestKey {
    pub fn new<S: Into<String>>(codename: S, component: S, architecture: S) -> Self {
        Self {
            codename: codename.into(),
            component: component.into(),
            architecture: architecture.into(),
        }
    }

    /// `<component>/binary-<arch>`, relative to the codename directory.
    pub fn index_dir(&self) -> String {
        format!("{}/binary-{}", self.component, self.architecture)
    }

    /// Path of the plain index as listed in the Release file.
    pub fn release_entry(&self, compression: Compression) -> String {
        format!("{}/Packages{}", self.index_dir(), compression.extension())
    }

    /// Object path of the index with the given compression.
    pub fn object_path(&self, compression: Compression) -> String {
        format!(
            "dists/{}/{}",
            self.codename,
            self.release_entry(compression)
        )
    }

    pub fn packages_path(&self) -> String {
        self.object_path(Compression::None)
    }

    pub fn packages_gz_path(&self) -> String {
        self.object_path(Compression::Gzip)
    }

    pub fn release_path(&self) -> String {
        release_path(&self.codename)
    }

    /// Object path of the lock token protecting this index.
    pub fn lock_path(&self, scope: LockScope) -> String {
        match scope {
            LockScope::Architecture => format!("dists/{}/{}/lock", self.codename, self.index_dir()),
            LockScope::Codename => format!("dists/{}/lock", self.codename),
        }
    }
}

impl fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.codename, self.component, self.architecture
        )
    }
}

/// The package records of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    key: ManifestKey,
    packages: PackageFile,
}

impl Manifest {
    pub fn empty(key: ManifestKey) -> Self {
        Self {
            key,
            packages: PackageFile::new(),
        }
    }

    /// Parse the text of a stored `Packages` file.
    ///
    /// If the text lists the same package twice, the later stanza wins.
    pub fn parse(key: ManifestKey, text: &str) -> Result<Self> {
        let packages = text
            .parse::<PackageFile>()
            .map_err(|e| Error::from_index(&key.packages_path(), e))?;
        Ok(Self { key, packages })
    }

    /// Parse stored bytes, which must be UTF-8.
    pub fn from_bytes(key: ManifestKey, data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|e| Error::CorruptIndex {
            path: key.packages_path(),
            message: e.to_string(),
        })?;
        Self::parse(key, text)
    }

    pub fn key(&self) -> &ManifestKey {
        &self.key
    }

    pub fn get(&self, key: &PackageKey) -> Option<&Package> {
        self.packages.get(key)
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.packages()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Insert `package`, returning the record it replaced.
    pub fn insert(&mut self, package: Package) -> Option<Package> {
        self.packages.insert(package)
    }

    /// A copy of this manifest with `package` merged in.
    pub fn merge(&self, package: Package) -> Self {
        Self {
            key: self.key.clone(),
            packages: self.packages.with_package(package),
        }
    }

    pub fn serialize(&self) -> String {
        self.packages.to_string()
    }

    /// The serialized index, gzipped.
    pub fn serialize_gz(&self) -> Result<Vec<u8>> {
        Ok(Compression::Gzip.compress(self.serialize().as_bytes())?)
    }
}
