//! Package records and Packages index parsing and generation.

use crate::stanza::{write_field, Stanza};
use crate::{AptRepositoryError, HashAlgorithm, HashSet, Result};
use debversion::Version;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identity of a package within a Packages index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageKey {
    /// Package name.
    pub name: String,
    /// Architecture.
    pub architecture: String,
}

impl PackageKey {
    /// Create a new key.
    pub fn new<S: Into<String>>(name: S, architecture: S) -> Self {
        Self {
            name: name.into(),
            architecture: architecture.into(),
        }
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.architecture)
    }
}

/// A Debian binary package entry in a Packages file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Package name.
    pub package: String,
    /// Package version.
    pub version: Version,
    /// Architecture.
    pub architecture: String,
    /// Maintainer.
    pub maintainer: Option<String>,
    /// Installed size in kilobytes.
    pub installed_size: Option<u64>,
    /// Package dependencies.
    pub depends: Option<String>,
    /// Package pre-dependencies.
    pub pre_depends: Option<String>,
    /// Package recommendations.
    pub recommends: Option<String>,
    /// Package suggestions.
    pub suggests: Option<String>,
    /// Package conflicts.
    pub conflicts: Option<String>,
    /// Package breaks.
    pub breaks: Option<String>,
    /// Package replaces.
    pub replaces: Option<String>,
    /// Package provides.
    pub provides: Option<String>,
    /// Package section.
    pub section: Option<String>,
    /// Package priority.
    pub priority: Option<String>,
    /// Package homepage.
    pub homepage: Option<String>,
    /// Description, synopsis and extended lines as they appear in the stanza.
    pub description: Option<String>,
    /// Filename (relative to repository root).
    pub filename: String,
    /// File size in bytes.
    pub size: u64,
    /// Digests of the package file.
    pub hashes: HashSet,
    /// Fields not modelled above, in their original order.
    pub additional_fields: Stanza,
}

impl Package {
    /// Create a new package with required fields.
    pub fn new<S: Into<String>>(
        package: S,
        version: Version,
        architecture: S,
        filename: S,
        size: u64,
    ) -> Self {
        Self {
            package: package.into(),
            version,
            architecture: architecture.into(),
            filename: filename.into(),
            size,
            maintainer: None,
            installed_size: None,
            depends: None,
            pre_depends: None,
            recommends: None,
            suggests: None,
            conflicts: None,
            breaks: None,
            replaces: None,
            provides: None,
            section: None,
            priority: None,
            homepage: None,
            description: None,
            hashes: HashSet::new(),
            additional_fields: Stanza::new(),
        }
    }

    /// Build a record from a package's control metadata and its payload digests.
    ///
    /// Fails with [`AptRepositoryError::MalformedMetadata`] if the name,
    /// version or architecture is missing.
    pub fn from_control<S: Into<String>>(
        control: &Stanza,
        hashes: HashSet,
        filename: S,
        size: u64,
    ) -> Result<Self> {
        let mut fields = control.clone();
        // These describe the payload, not the package; never trust stale copies.
        fields.remove("Filename");
        fields.remove("Size");
        for algorithm in HashAlgorithm::all() {
            fields.remove(algorithm.control_field());
        }

        let mut package = Self::take_fields(fields, AptRepositoryError::malformed::<String>)?;
        package.filename = filename.into();
        package.size = size;
        package.hashes = hashes;
        Ok(package)
    }

    /// Parse a record from a Packages index stanza.
    ///
    /// Fails with [`AptRepositoryError::CorruptIndex`] if the stanza lacks its
    /// identity or file information.
    pub fn from_stanza(stanza: &Stanza) -> Result<Self> {
        let mut fields = stanza.clone();

        let filename = fields
            .remove("Filename")
            .ok_or_else(|| AptRepositoryError::corrupt(missing("Filename", stanza)))?;
        let size_str = fields
            .remove("Size")
            .ok_or_else(|| AptRepositoryError::corrupt(missing("Size", stanza)))?;
        let size = size_str
            .parse::<u64>()
            .map_err(|_| AptRepositoryError::corrupt(format!("invalid Size: {}", size_str)))?;

        let mut hashes = HashSet::new();
        for algorithm in HashAlgorithm::all() {
            if let Some(hash) = fields.remove(algorithm.control_field()) {
                hashes.insert(*algorithm, hash);
            }
        }

        let mut package = Self::take_fields(fields, AptRepositoryError::corrupt::<String>)?;
        package.filename = filename;
        package.size = size;
        package.hashes = hashes;
        Ok(package)
    }

    fn take_fields(mut fields: Stanza, error: fn(String) -> AptRepositoryError) -> Result<Self> {
        let package = fields
            .remove("Package")
            .ok_or_else(|| error(missing("Package", &fields)))?;
        let architecture = fields
            .remove("Architecture")
            .ok_or_else(|| error(format!("package {} has no Architecture", package)))?;
        let version_str = fields
            .remove("Version")
            .ok_or_else(|| error(format!("package {} has no Version", package)))?;
        let version = version_str
            .parse::<Version>()
            .map_err(|e| error(format!("package {}: invalid version {}: {}", package, version_str, e)))?;

        let installed_size = match fields.remove("Installed-Size") {
            Some(s) => Some(
                s.trim()
                    .parse::<u64>()
                    .map_err(|_| error(format!("package {}: invalid Installed-Size {}", package, s)))?,
            ),
            None => None,
        };

        Ok(Self {
            package,
            version,
            architecture,
            filename: String::new(),
            size: 0,
            maintainer: fields.remove("Maintainer"),
            installed_size,
            depends: fields.remove("Depends"),
            pre_depends: fields.remove("Pre-Depends"),
            recommends: fields.remove("Recommends"),
            suggests: fields.remove("Suggests"),
            conflicts: fields.remove("Conflicts"),
            breaks: fields.remove("Breaks"),
            replaces: fields.remove("Replaces"),
            provides: fields.remove("Provides"),
            section: fields.remove("Section"),
            priority: fields.remove("Priority"),
            homepage: fields.remove("Homepage"),
            description: fields.remove("Description"),
            hashes: HashSet::new(),
            additional_fields: fields,
        })
    }

    /// The identity of this record within an index.
    pub fn key(&self) -> PackageKey {
        PackageKey::new(self.package.as_str(), self.architecture.as_str())
    }

    /// Conventional pool location of the package file within `component`.
    pub fn pool_path(&self, component: &str) -> String {
        let prefix_len = if self.package.starts_with("lib") && self.package.chars().count() > 3 {
            4
        } else {
            1
        };
        let prefix: String = self.package.chars().take(prefix_len).collect();
        let mut version = self.version.upstream_version.clone();
        if let Some(ref revision) = self.version.debian_revision {
            version.push('-');
            version.push_str(revision);
        }
        format!(
            "pool/{}/{}/{}/{}_{}_{}.deb",
            component, prefix, self.package, self.package, version, self.architecture
        )
    }

    /// Convert the package to a Packages stanza with a fixed field order.
    pub fn to_paragraph(&self) -> String {
        let mut paragraph = String::new();

        write_field(&mut paragraph, "Package", &self.package);
        write_field(&mut paragraph, "Version", &self.version.to_string());
        write_field(&mut paragraph, "Architecture", &self.architecture);

        let optional = [
            ("Maintainer", &self.maintainer),
            ("Installed-Size", &self.installed_size.map(|s| s.to_string())),
            ("Depends", &self.depends),
            ("Pre-Depends", &self.pre_depends),
            ("Recommends", &self.recommends),
            ("Suggests", &self.suggests),
            ("Conflicts", &self.conflicts),
            ("Breaks", &self.breaks),
            ("Replaces", &self.replaces),
            ("Provides", &self.provides),
            ("Section", &self.section),
            ("Priority", &self.priority),
            ("Homepage", &self.homepage),
            ("Description", &self.description),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                write_field(&mut paragraph, name, value);
            }
        }

        for (name, value) in self.additional_fields.iter() {
            write_field(&mut paragraph, name, value);
        }

        write_field(&mut paragraph, "Filename", &self.filename);
        write_field(&mut paragraph, "Size", &self.size.to_string());
        for (algorithm, hash) in self.hashes.iter() {
            write_field(&mut paragraph, algorithm.control_field(), hash);
        }

        paragraph
    }
}

fn missing(field: &str, stanza: &Stanza) -> String {
    match stanza.get("Package") {
        Some(name) => format!("package {} has no {}", name, field),
        None => format!("stanza has no {}", field),
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_paragraph())
    }
}

/// The records of one Packages index, at most one per [`PackageKey`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageFile {
    packages: BTreeMap<PackageKey, Package>,
}

impl PackageFile {
    /// Create a new empty package file.
    pub fn new() -> Self {
        Self {
            packages: BTreeMap::new(),
        }
    }

    /// Add a package, replacing and returning any record with the same key.
    pub fn insert(&mut self, package: Package) -> Option<Package> {
        self.packages.insert(package.key(), package)
    }

    /// Return a copy of this file with `package` merged in.
    pub fn with_package(&self, package: Package) -> Self {
        let mut merged = self.clone();
        merged.insert(package);
        merged
    }

    /// Look up a record by identity.
    pub fn get(&self, key: &PackageKey) -> Option<&Package> {
        self.packages.get(key)
    }

    /// Remove a record by identity.
    pub fn remove(&mut self, key: &PackageKey) -> Option<Package> {
        self.packages.remove(key)
    }

    /// Iterate over the records in identity order.
    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Get the number of packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Check if the package file is empty.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl FromStr for PackageFile {
    type Err = AptRepositoryError;

    /// Parse a Packages index. A later stanza replaces an earlier one with the
    /// same identity.
    fn from_str(content: &str) -> Result<Self> {
        let stanzas = Stanza::parse_all(content)
            .map_err(|e| AptRepositoryError::corrupt(e.to_string()))?;

        let mut file = PackageFile::new();
        for stanza in &stanzas {
            file.insert(Package::from_stanza(stanza)?);
        }
        Ok(file)
    }
}

impl fmt::Display for PackageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, package) in self.packages.values().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            f.write_str(&package.to_paragraph())?;
        }
        Ok(())
    }
}
