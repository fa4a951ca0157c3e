//! Building the codename-wide Release file from its Packages indexes.

use apt_repository::{Compression, HashedFile, Release, ReleaseBuilder, DEFAULT_HASH_ALGORITHMS};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::ReleaseConfig;
use crate::error::{Error, Result};
use crate::manifest::{Manifest, ManifestKey};

/// A (component, architecture) pair within one codename.
pub type IndexPair = (String, String);

/// The stored bytes of one Packages index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBytes {
    pub packages: Vec<u8>,
    pub packages_gz: Option<Vec<u8>>,
}

impl IndexBytes {
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        Ok(Self {
            packages: manifest.serialize().into_bytes(),
            packages_gz: Some(manifest.serialize_gz()?),
        })
    }
}

/// Header fields written into every Release file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseMetadata {
    pub origin: Option<String>,
    pub label: Option<String>,
    pub suite: Option<String>,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
}

impl ReleaseMetadata {
    pub fn new(config: &ReleaseConfig, date: DateTime<Utc>) -> Self {
        Self {
            origin: config.origin.clone(),
            label: config.label.clone(),
            suite: config.suite.clone(),
            description: config.description.clone(),
            date,
        }
    }
}

impl Default for ReleaseMetadata {
    fn default() -> Self {
        Self::new(&ReleaseConfig::default(), Utc::now())
    }
}

/// The (component, architecture) pairs whose Packages index is listed in
/// `release`.
pub fn known_pairs(release: &Release) -> BTreeSet<IndexPair> {
    release
        .files
        .iter()
        .filter_map(|file| parse_index_entry(&file.path))
        .collect()
}

fn parse_index_entry(path: &str) -> Option<IndexPair> {
    let dir = path
        .strip_suffix("/Packages")
        .or_else(|| path.strip_suffix("/Packages.gz"))?;
    let (component, binary) = dir.rsplit_once('/')?;
    let architecture = binary.strip_prefix("binary-")?;
    if component.is_empty() || architecture.is_empty() {
        return None;
    }
    Some((component.to_string(), architecture.to_string()))
}

/// Build the Release for `codename` from the bytes of its indexes.
///
/// Every pair in `known` must have bytes in `indexes`; pairs only present in
/// `indexes` are listed too. Nothing is fetched: callers supply the bytes.
pub fn aggregate(
    codename: &str,
    indexes: &BTreeMap<IndexPair, IndexBytes>,
    known: &BTreeSet<IndexPair>,
    metadata: &ReleaseMetadata,
) -> Result<Release> {
    if let Some((component, architecture)) = known.iter().find(|pair| !indexes.contains_key(*pair))
    {
        return Err(Error::IncompleteAggregate {
            codename: codename.to_string(),
            component: component.clone(),
            architecture: architecture.clone(),
        });
    }

    let mut files = Vec::new();
    let mut components = BTreeSet::new();
    let mut architectures = BTreeSet::new();
    for ((component, architecture), bytes) in indexes {
        let key = ManifestKey::new(codename, component.as_str(), architecture.as_str());
        files.push(HashedFile::from_data(
            key.release_entry(Compression::None),
            &bytes.packages,
            DEFAULT_HASH_ALGORITHMS,
        ));
        if let Some(gz) = &bytes.packages_gz {
            files.push(HashedFile::from_data(
                key.release_entry(Compression::Gzip),
                gz,
                DEFAULT_HASH_ALGORITHMS,
            ));
        }
        components.insert(component.clone());
        architectures.insert(architecture.clone());
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let mut builder = ReleaseBuilder::new()
        .codename(codename)
        .suite(metadata.suite.as_deref().unwrap_or(codename))
        .date(metadata.date)
        .architectures(architectures.into_iter().collect())
        .components(components.into_iter().collect());
    if let Some(origin) = &metadata.origin {
        builder = builder.origin(origin.as_str());
    }
    if let Some(label) = &metadata.label {
        builder = builder.label(label.as_str());
    }
    if let Some(description) = &metadata.description {
        builder = builder.description(description.as_str());
    }
    for file in files {
        builder = builder.add_file(file);
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apt_repository::{hash, HashAlgorithm};
    use chrono::TimeZone;

    fn pair(component: &str, architecture: &str) -> IndexPair {
        (component.to_string(), architecture.to_string())
    }

    fn metadata() -> ReleaseMetadata {
        ReleaseMetadata {
            origin: Some("Example".to_string()),
            label: None,
            suite: None,
            description: None,
            date: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    fn bytes(text: &str) -> IndexBytes {
        IndexBytes {
            packages: text.as_bytes().to_vec(),
            packages_gz: Some(Compression::Gzip.compress(text.as_bytes()).unwrap()),
        }
    }

    #[test]
    fn test_aggregate_lists_every_index() {
        let mut indexes = BTreeMap::new();
        indexes.insert(pair("main", "amd64"), bytes("Package: foo\n"));
        indexes.insert(pair("main", "i386"), bytes("Package: bar\n"));
        let known = [pair("main", "i386")].into_iter().collect();

        let release = aggregate("stable", &indexes, &known, &metadata()).unwrap();
        assert_eq!(release.codename.as_deref(), Some("stable"));
        assert_eq!(release.suite.as_deref(), Some("stable"));
        assert_eq!(release.origin.as_deref(), Some("Example"));
        assert_eq!(release.components, vec!["main"]);
        assert_eq!(release.architectures, vec!["amd64", "i386"]);

        let paths: Vec<_> = release.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "main/binary-amd64/Packages",
                "main/binary-amd64/Packages.gz",
                "main/binary-i386/Packages",
                "main/binary-i386/Packages.gz",
            ]
        );

        let entry = release.get_file("main/binary-i386/Packages").unwrap();
        let (size, hashes) = hash::hash_data(b"Package: bar\n", DEFAULT_HASH_ALGORITHMS);
        assert_eq!(entry.size, size);
        assert_eq!(entry.hashes, hashes);
        assert!(entry.get_hash(&HashAlgorithm::Sha512).is_some());
    }

    #[test]
    fn test_aggregate_missing_known_pair() {
        let mut indexes = BTreeMap::new();
        indexes.insert(pair("main", "amd64"), bytes("Package: foo\n"));
        let known = [pair("main", "amd64"), pair("contrib", "amd64")]
            .into_iter()
            .collect();

        match aggregate("stable", &indexes, &known, &metadata()) {
            Err(Error::IncompleteAggregate {
                codename,
                component,
                architecture,
            }) => {
                assert_eq!(codename, "stable");
                assert_eq!(component, "contrib");
                assert_eq!(architecture, "amd64");
            }
            other => panic!("unexpected result {:?}", other.map(|r| r.to_string())),
        }
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let mut indexes = BTreeMap::new();
        indexes.insert(pair("main", "amd64"), bytes("Package: foo\n"));
        indexes.insert(pair("contrib", "arm64"), bytes(""));
        let known = BTreeSet::new();

        let first = aggregate("stable", &indexes, &known, &metadata()).unwrap();
        let second = aggregate("stable", &indexes, &known, &metadata()).unwrap();
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(first.components, vec!["contrib", "main"]);
    }

    #[test]
    fn test_paths_sort_lexically() {
        let mut indexes = BTreeMap::new();
        indexes.insert(pair("main", "amd64"), bytes("a"));
        indexes.insert(pair("main-extra", "amd64"), bytes("b"));
        let release = aggregate("stable", &indexes, &BTreeSet::new(), &metadata()).unwrap();
        let paths: Vec<_> = release.files.iter().map(|f| f.path.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn test_known_pairs_from_release() {
        let text = "\
Codename: stable
Date: Fri, 01 Mar 2024 12:00:00 +0000
SHA256:
 aaaa 10 main/binary-amd64/Packages
 bbbb 20 main/binary-amd64/Packages.gz
 cccc 30 contrib/binary-i386/Packages.gz
 dddd 40 main/source/Sources
 eeee 50 main/i18n/Translation-en
";
        let release: Release = text.parse().unwrap();
        let pairs = known_pairs(&release);
        assert_eq!(
            pairs,
            [pair("contrib", "i386"), pair("main", "amd64")]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn test_aggregate_then_known_pairs() {
        let mut indexes = BTreeMap::new();
        indexes.insert(pair("main", "amd64"), bytes("x"));
        indexes.insert(pair("updates/main", "arm64"), bytes("y"));
        let release = aggregate("stable", &indexes, &BTreeSet::new(), &metadata()).unwrap();
        let reparsed: Release = release.to_string().parse().unwrap();
        assert_eq!(
            known_pairs(&reparsed),
            indexes.keys().cloned().collect::<BTreeSet<_>>()
        );
    }
}
