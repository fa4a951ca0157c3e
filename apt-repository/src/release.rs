//! Release file generation and parsing for APT repositories.

use crate::stanza::{write_field, Stanza};
use crate::{AptRepositoryError, HashAlgorithm, HashedFile, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// A Release file for an APT repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Origin of the repository.
    pub origin: Option<String>,
    /// Label for the repository.
    pub label: Option<String>,
    /// Suite name.
    pub suite: Option<String>,
    /// Codename.
    pub codename: Option<String>,
    /// Date of the release.
    pub date: DateTime<Utc>,
    /// Supported architectures.
    pub architectures: Vec<String>,
    /// Repository components.
    pub components: Vec<String>,
    /// Description.
    pub description: Option<String>,
    /// Files in the repository with their hashes.
    pub files: Vec<HashedFile>,
    /// Additional fields not covered by standard fields.
    pub additional_fields: Stanza,
}

impl Release {
    /// Create a new Release with the current date.
    pub fn new() -> Self {
        Self {
            origin: None,
            label: None,
            suite: None,
            codename: None,
            date: Utc::now(),
            architectures: Vec::new(),
            components: Vec::new(),
            description: None,
            files: Vec::new(),
            additional_fields: Stanza::new(),
        }
    }

    /// Add a file to the release.
    pub fn add_file(&mut self, file: HashedFile) {
        self.files.push(file);
    }

    /// Look up a file by its relative path.
    pub fn get_file(&self, path: &str) -> Option<&HashedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Get files by hash algorithm.
    pub fn get_files_by_hash(&self, algorithm: &HashAlgorithm) -> Vec<(&HashedFile, &str)> {
        self.files
            .iter()
            .filter_map(|file| file.get_hash(algorithm).map(|hash| (file, hash)))
            .collect()
    }

    /// Parse a file list from a hash field.
    fn parse_file_list(content: &str, algorithm: HashAlgorithm) -> Result<Vec<HashedFile>> {
        let mut files = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 3 {
                return Err(AptRepositoryError::corrupt(format!(
                    "Invalid file list line: {}",
                    line
                )));
            }

            let size = parts[1].parse::<u64>().map_err(|_| {
                AptRepositoryError::corrupt(format!("Invalid size in file list: {}", line))
            })?;

            let mut file = HashedFile::new(parts[2], size);
            file.add_hash(algorithm, parts[0].to_string());
            files.push(file);
        }

        Ok(files)
    }

    /// Merge files with the same path.
    fn merge_files(existing: &mut Vec<HashedFile>, new_files: Vec<HashedFile>) {
        for new_file in new_files {
            if let Some(existing_file) = existing.iter_mut().find(|f| f.path == new_file.path) {
                for (algorithm, hash) in new_file.hashes.iter() {
                    existing_file.add_hash(*algorithm, hash.to_string());
                }
            } else {
                existing.push(new_file);
            }
        }
    }
}

impl Default for Release {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Release {
    type Err = AptRepositoryError;

    fn from_str(content: &str) -> Result<Self> {
        let mut fields =
            Stanza::parse(content).map_err(|e| AptRepositoryError::corrupt(e.to_string()))?;

        let date_str = fields
            .remove("Date")
            .ok_or_else(|| AptRepositoryError::corrupt("Release has no Date"))?;
        let date = DateTime::parse_from_rfc2822(&date_str)
            .map_err(|_| AptRepositoryError::corrupt(format!("Invalid Release date: {}", date_str)))?
            .with_timezone(&Utc);

        let architectures = fields
            .remove("Architectures")
            .map(|s| s.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default();

        let components = fields
            .remove("Components")
            .map(|s| s.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default();

        let mut files = Vec::new();
        for algorithm in HashAlgorithm::all() {
            if let Some(file_list) = fields.remove(algorithm.as_str()) {
                let parsed_files = Self::parse_file_list(&file_list, *algorithm)?;
                Self::merge_files(&mut files, parsed_files);
            }
        }

        Ok(Self {
            origin: fields.remove("Origin"),
            label: fields.remove("Label"),
            suite: fields.remove("Suite"),
            codename: fields.remove("Codename"),
            date,
            architectures,
            components,
            description: fields.remove("Description"),
            files,
            additional_fields: fields,
        })
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut content = String::new();

        let header = [
            ("Origin", &self.origin),
            ("Label", &self.label),
            ("Suite", &self.suite),
            ("Codename", &self.codename),
        ];
        for (name, value) in header {
            if let Some(value) = value {
                write_field(&mut content, name, value);
            }
        }

        write_field(&mut content, "Date", &self.date.format(DATE_FORMAT).to_string());

        if !self.architectures.is_empty() {
            write_field(&mut content, "Architectures", &self.architectures.join(" "));
        }
        if !self.components.is_empty() {
            write_field(&mut content, "Components", &self.components.join(" "));
        }
        if let Some(ref description) = self.description {
            write_field(&mut content, "Description", description);
        }

        for (name, value) in self.additional_fields.iter() {
            write_field(&mut content, name, value);
        }

        // File lists for each hash algorithm
        for algorithm in HashAlgorithm::all() {
            let files_with_hash = self.get_files_by_hash(algorithm);
            if !files_with_hash.is_empty() {
                content.push_str(&format!("{}:\n", algorithm.as_str()));
                for (file, hash) in files_with_hash {
                    content.push_str(&format!(" {} {:>16} {}\n", hash, file.size, file.path));
                }
            }
        }

        f.write_str(&content)
    }
}

/// Builder for creating Release files.
#[derive(Debug, Clone)]
pub struct ReleaseBuilder {
    release: Release,
}

impl ReleaseBuilder {
    /// Create a new Release builder.
    pub fn new() -> Self {
        Self {
            release: Release::new(),
        }
    }

    /// Set the origin.
    pub fn origin<S: Into<String>>(mut self, origin: S) -> Self {
        self.release.origin = Some(origin.into());
        self
    }

    /// Set the label.
    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.release.label = Some(label.into());
        self
    }

    /// Set the suite.
    pub fn suite<S: Into<String>>(mut self, suite: S) -> Self {
        self.release.suite = Some(suite.into());
        self
    }

    /// Set the codename.
    pub fn codename<S: Into<String>>(mut self, codename: S) -> Self {
        self.release.codename = Some(codename.into());
        self
    }

    /// Set the date.
    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.release.date = date;
        self
    }

    /// Set the architectures.
    pub fn architectures(mut self, architectures: Vec<String>) -> Self {
        self.release.architectures = architectures;
        self
    }

    /// Set the components.
    pub fn components(mut self, components: Vec<String>) -> Self {
        self.release.components = components;
        self
    }

    /// Set the description.
    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.release.description = Some(description.into());
        self
    }

    /// Add a file.
    pub fn add_file(mut self, file: HashedFile) -> Self {
        self.release.add_file(file);
        self
    }

    /// Add an additional field.
    pub fn additional_field<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.release.additional_fields.insert(key, value);
        self
    }

    /// Build the Release.
    pub fn build(self) -> Release {
        self.release
    }
}

impl Default for ReleaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
