//! The read-merge-write cycle that adds one package to the repository.
//!
//! A publish holds the lock for its index while it reads the current
//! `Packages` file and merges the new record. It then also takes the
//! codename's lock, since every index of a codename shares one `Release`,
//! rebuilds that Release from every index it lists, and writes the payload,
//! the index and the Release back in that order. A failure at any step stops
//! the publish; the Release is always written last, so clients never see it
//! reference index bytes that were not stored.

use apt_repository::{
    hash, Compression, Package, Release, DEFAULT_HASH_ALGORITHMS,
};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, known_pairs, IndexBytes, IndexPair, ReleaseMetadata};
use crate::config::{validate_name, Config, LockConfig, LockScope, ReleaseConfig};
use crate::control::ControlExtractor;
use crate::error::{Error, Result};
use crate::lock::{DistributedLock, LockGuard};
use crate::manifest::{Manifest, ManifestKey};
use crate::store::{ObjectStore, Visibility};

/// Content type of uploaded package files.
pub const DEB_CONTENT_TYPE: &str = "application/vnd.debian.binary-package";

/// Called with the object path of every object as it is transferred.
pub type ProgressFn = dyn Fn(&str) + Send + Sync;

/// One package to publish.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub codename: String,
    pub component: String,
    /// Index to publish into; the package's own architecture when unset.
    pub architecture: Option<String>,
    pub package_file: PathBuf,
    pub visibility: Visibility,
}

impl PublishRequest {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(codename: S, component: S, package_file: P) -> Self {
        Self {
            codename: codename.into(),
            component: component.into(),
            architecture: None,
            package_file: package_file.into(),
            visibility: Visibility::default(),
        }
    }

    pub fn architecture<S: Into<String>>(mut self, architecture: S) -> Self {
        self.architecture = Some(architecture.into());
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

/// What a successful publish did.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub key: ManifestKey,
    /// The record now in the index.
    pub package: Package,
    /// The record it replaced, if any.
    pub replaced: Option<Package>,
    /// Object paths written, in order.
    pub written: Vec<String>,
    pub release: Release,
}

/// Publishes packages into one object store.
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    extractor: Arc<dyn ControlExtractor>,
    lock: LockConfig,
    release: ReleaseConfig,
    progress: Option<Arc<ProgressFn>>,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>, extractor: Arc<dyn ControlExtractor>) -> Self {
        Self {
            store,
            extractor,
            lock: LockConfig::default(),
            release: ReleaseConfig::default(),
            progress: None,
        }
    }

    /// A publisher using the lock and Release settings of `config`.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        extractor: Arc<dyn ControlExtractor>,
    ) -> Self {
        Self::new(store, extractor)
            .with_lock_config(config.lock.clone())
            .with_release_config(config.release.clone())
    }

    pub fn with_lock_config(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_release_config(mut self, release: ReleaseConfig) -> Self {
        self.release = release;
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Add the package in `request` to its index and regenerate the Release.
    pub async fn publish(&self, request: &PublishRequest) -> Result<PublishResult> {
        validate_name("codename", &request.codename)?;
        validate_name("component", &request.component)?;

        let control = self.extractor.extract(&request.package_file).await?;
        let architecture = match &request.architecture {
            Some(architecture) => architecture.clone(),
            None => control
                .get("Architecture")
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::MalformedMetadata(format!(
                        "{}: no architecture given and none in the control file",
                        request.package_file.display()
                    ))
                })?,
        };
        validate_name("architecture", &architecture)?;

        let key = ManifestKey::new(
            request.codename.as_str(),
            request.component.as_str(),
            architecture.as_str(),
        );
        let package = self
            .build_record(&control, &request.package_file, &request.component)
            .await?;
        info!(
            "Publishing {} {} into {}",
            package.package, package.version, key
        );

        let lock = DistributedLock::new(
            self.store.clone(),
            key.lock_path(self.lock.scope),
            &self.lock,
        );
        let guard = lock.acquire().await?;

        let outcome = self.publish_locked(&key, package, request).await;
        release_lock(guard).await;
        outcome
    }

    async fn build_record(
        &self,
        control: &apt_repository::Stanza,
        package_file: &Path,
        component: &str,
    ) -> Result<Package> {
        let file = tokio::fs::File::open(package_file).await?;
        let (size, hashes) = hash::hash_async_reader(file, DEFAULT_HASH_ALGORITHMS).await?;
        let mut package = Package::from_control(control, hashes, "", size)?;
        package.filename = package.pool_path(component);
        Ok(package)
    }

    async fn fetch_manifest(&self, key: &ManifestKey) -> Result<Manifest> {
        match self.store.get(&key.packages_path()).await? {
            Some(data) => Manifest::from_bytes(key.clone(), &data),
            None => {
                debug!("No existing index for {}; starting empty", key);
                Ok(Manifest::empty(key.clone()))
            }
        }
    }

    async fn fetch_known_pairs(&self, key: &ManifestKey) -> Result<BTreeSet<IndexPair>> {
        let path = key.release_path();
        let Some(data) = self.store.get(&path).await? else {
            debug!("No existing Release for {}", key.codename);
            return Ok(BTreeSet::new());
        };
        let text = std::str::from_utf8(&data).map_err(|e| Error::CorruptIndex {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let release: Release = text.parse().map_err(|e| Error::from_index(&path, e))?;
        Ok(known_pairs(&release))
    }

    async fn publish_locked(
        &self,
        key: &ManifestKey,
        package: Package,
        request: &PublishRequest,
    ) -> Result<PublishResult> {
        let mut manifest = self.fetch_manifest(key).await?;
        let replaced = manifest.insert(package.clone());
        match &replaced {
            Some(old) if old.version > package.version => warn!(
                "Replacing {} {} with older version {}",
                package.key(),
                old.version,
                package.version
            ),
            Some(old) => info!(
                "Replacing {} {} with {}",
                package.key(),
                old.version,
                package.version
            ),
            None => debug!("Adding {} to {}", package.key(), key),
        }
        let current = IndexBytes::from_manifest(&manifest)?;

        let release_guard = match self.lock.scope {
            LockScope::Codename => None,
            LockScope::Architecture => Some(
                DistributedLock::new(
                    self.store.clone(),
                    key.lock_path(LockScope::Codename),
                    &self.lock,
                )
                .acquire()
                .await?,
            ),
        };
        let outcome = self
            .write_locked(key, package, replaced, current, request)
            .await;
        if let Some(guard) = release_guard {
            release_lock(guard).await;
        }
        outcome
    }

    /// Rebuild the Release around `current` and write everything. Callers
    /// hold the codename's lock.
    async fn write_locked(
        &self,
        key: &ManifestKey,
        package: Package,
        replaced: Option<Package>,
        current: IndexBytes,
        request: &PublishRequest,
    ) -> Result<PublishResult> {
        let ours: IndexPair = (key.component.clone(), key.architecture.clone());
        let known = self.fetch_known_pairs(key).await?;
        let mut indexes = BTreeMap::new();
        for pair in known.iter().filter(|pair| **pair != ours) {
            let other = ManifestKey::new(key.codename.as_str(), pair.0.as_str(), pair.1.as_str());
            match self.store.get(&other.packages_path()).await? {
                Some(packages) => {
                    let packages_gz = self.store.get(&other.packages_gz_path()).await?;
                    indexes.insert(pair.clone(), IndexBytes { packages, packages_gz });
                }
                None => warn!(
                    "Release for {} lists {} but it is missing from the store",
                    key.codename,
                    other.packages_path()
                ),
            }
        }
        indexes.insert(ours, current.clone());

        let metadata = ReleaseMetadata::new(&self.release, Utc::now());
        let release = aggregate(&key.codename, &indexes, &known, &metadata)?;

        let mut written = Vec::new();
        let visibility = request.visibility;

        self.transferring(&package.filename);
        self.store
            .put_file(
                &package.filename,
                &request.package_file,
                DEB_CONTENT_TYPE,
                visibility,
            )
            .await?;
        written.push(package.filename.clone());

        let mut uploads = vec![(
            key.packages_path(),
            current.packages,
            Compression::None.mime_type(),
        )];
        if let Some(gz) = current.packages_gz {
            uploads.push((key.packages_gz_path(), gz, Compression::Gzip.mime_type()));
        }
        uploads.push((key.release_path(), release.to_string().into_bytes(), "text/plain"));

        for (path, data, content_type) in uploads {
            self.transferring(&path);
            self.store.put(&path, data, content_type, visibility).await?;
            written.push(path);
        }

        info!("Published {} {} into {}", package.package, package.version, key);

        Ok(PublishResult {
            key: key.clone(),
            package,
            replaced,
            written,
            release,
        })
    }

    fn transferring(&self, path: &str) {
        debug!("Transferring {} to {} store", path, self.store.name());
        if let Some(progress) = &self.progress {
            progress(path);
        }
    }
}

async fn release_lock(guard: LockGuard) {
    let path = guard.path().to_string();
    if let Err(e) = guard.release().await {
        warn!("Failed to release lock {}: {}", path, e);
    }
}
