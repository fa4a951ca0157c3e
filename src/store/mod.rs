//! Object store backends.
//!
//! The repository lives entirely in an object store that only offers
//! eventually-consistent get/put/delete. Every backend implements
//! [`ObjectStore`]; nothing here provides compare-and-swap, which is why
//! [`crate::lock`] has to tolerate races explicitly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::{MemoryStore, StoredObject};

#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "s3")]
pub use self::s3::S3Store;

use crate::config::StoreConfig;

/// Errors reported by an object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or returned a server error.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The credentials in use may not access the object.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The object path is not acceptable to the store.
    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Access policy applied to every object written by a publish.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Anyone may read the object.
    #[default]
    Public,
    /// Only the bucket owner may read the object.
    Private,
    /// Any authenticated principal may read the object.
    Authenticated,
}

impl Visibility {
    /// The S3 canned ACL implementing this policy.
    pub fn canned_acl(&self) -> &'static str {
        match self {
            Visibility::Public => "public-read",
            Visibility::Private => "private",
            Visibility::Authenticated => "authenticated-read",
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
            Visibility::Authenticated => write!(f, "authenticated"),
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "authenticated" => Ok(Visibility::Authenticated),
            _ => Err(format!(
                "invalid visibility {}: expected public, private, or authenticated",
                s
            )),
        }
    }
}

/// An eventually-consistent key-value object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. An absent object is `Ok(None)`.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Create or overwrite an object.
    async fn put(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<(), StoreError>;

    /// Upload a local file. Backends that can stream override this.
    async fn put_file(
        &self,
        path: &str,
        local_path: &Path,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<(), StoreError> {
        let data = tokio::fs::read(local_path).await?;
        self.put(path, data, content_type, visibility).await
    }

    /// Delete an object. Deleting an absent object succeeds.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Short backend name for log messages.
    fn name(&self) -> &'static str;
}

/// Open the store described by `config`.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match config {
        StoreConfig::Local { path } => Ok(Arc::new(LocalStore::new(path)?)),
        #[cfg(feature = "s3")]
        StoreConfig::S3(s3_config) => Ok(Arc::new(S3Store::new(s3_config).await?)),
        #[cfg(not(feature = "s3"))]
        StoreConfig::S3(_) => Err(StoreError::Other(
            "S3 support was not compiled in".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_parse() {
        assert_eq!("public".parse::<Visibility>(), Ok(Visibility::Public));
        assert_eq!("private".parse::<Visibility>(), Ok(Visibility::Private));
        assert_eq!(
            "authenticated".parse::<Visibility>(),
            Ok(Visibility::Authenticated)
        );
        assert!("world".parse::<Visibility>().is_err());
    }

    #[test]
    fn test_visibility_acl() {
        assert_eq!(Visibility::Public.canned_acl(), "public-read");
        assert_eq!(Visibility::Private.canned_acl(), "private");
        assert_eq!(Visibility::Authenticated.canned_acl(), "authenticated-read");
    }

    #[test]
    fn test_visibility_serde() {
        let v: Visibility = serde_json::from_str("\"authenticated\"").unwrap();
        assert_eq!(v, Visibility::Authenticated);
        assert_eq!(serde_json::to_string(&Visibility::Private).unwrap(), "\"private\"");
    }
}
