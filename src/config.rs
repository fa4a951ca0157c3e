//! Configuration for publishing into a repository.
//!
//! A configuration file is JSON; every section except `store` is optional.
//!
//! ```json
//! {
//!   "store": {"type": "s3", "bucket": "apt.example.com", "region": "eu-west-1"},
//!   "codename": "bookworm",
//!   "lock": {"stale_after_secs": 600, "scope": "codename"},
//!   "release": {"origin": "Example", "label": "Example"}
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::store::Visibility;

/// Environment variable consulted when no access key id is configured.
pub const ACCESS_KEY_ENV: &str = "AMAZON_ACCESS_KEY_ID";

/// Environment variable consulted when no secret access key is configured.
pub const SECRET_KEY_ENV: &str = "AMAZON_SECRET_ACCESS_KEY";

/// Where the repository objects live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// A directory on the local filesystem.
    Local {
        /// Root directory of the mirrored bucket.
        path: PathBuf,
    },
    /// An S3 or S3-compatible bucket.
    S3(S3Config),
}

/// S3 bucket settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name.
    pub bucket: String,
    /// Region; the AWS default chain decides when unset.
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint of an S3-compatible service. Implies path-style addressing.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Access key id.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Secret access key.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Key prefix under which the repository lives.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl S3Config {
    pub fn new<S: Into<String>>(bucket: S) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// The configured access key id, or the one from the environment.
    pub fn access_key_id(&self) -> Option<String> {
        self.access_key_id
            .clone()
            .or_else(|| std::env::var(ACCESS_KEY_ENV).ok())
            .filter(|k| !k.is_empty())
    }

    /// The configured secret access key, or the one from the environment.
    pub fn secret_access_key(&self) -> Option<String> {
        self.secret_access_key
            .clone()
            .or_else(|| std::env::var(SECRET_KEY_ENV).ok())
            .filter(|k| !k.is_empty())
    }
}

/// What a lock token protects.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    /// One lock per codename, component and architecture.
    #[default]
    Architecture,
    /// One lock per codename.
    Codename,
}

/// Lock acquisition tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Age after which a token is considered abandoned.
    pub stale_after_secs: u64,
    /// Longest time to keep trying before giving up.
    pub max_wait_secs: u64,
    /// Delay between writing a token and reading it back.
    pub settle_ms: u64,
    /// First backoff delay.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
    /// Granularity of the lock.
    pub scope: LockScope,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300,
            max_wait_secs: 60,
            settle_ms: 100,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            scope: LockScope::Architecture,
        }
    }
}

impl LockConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stale_after_secs == 0 {
            return Err(Error::Configuration(
                "lock.stale_after_secs must be positive".to_string(),
            ));
        }
        if self.initial_backoff_ms == 0 {
            return Err(Error::Configuration(
                "lock.initial_backoff_ms must be positive".to_string(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(Error::Configuration(format!(
                "lock.max_backoff_ms ({}) is smaller than lock.initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Header fields of generated Release files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    pub origin: Option<String>,
    pub label: Option<String>,
    /// Suite name; the codename is used when unset.
    pub suite: Option<String>,
    pub description: Option<String>,
}

fn default_codename() -> String {
    "stable".to_string()
}

fn default_component() -> String {
    "main".to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default = "default_codename")]
    pub codename: String,
    #[serde(default = "default_component")]
    pub component: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
}

impl Config {
    /// A configuration with defaults for everything but the store.
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            codename: default_codename(),
            component: default_component(),
            visibility: Visibility::default(),
            lock: LockConfig::default(),
            release: ReleaseConfig::default(),
        }
    }

    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match &self.store {
            StoreConfig::Local { path } => {
                if path.as_os_str().is_empty() {
                    return Err(Error::Configuration(
                        "store.path cannot be empty".to_string(),
                    ));
                }
            }
            StoreConfig::S3(s3) => {
                if s3.bucket.is_empty() {
                    return Err(Error::Configuration(
                        "store.bucket cannot be empty".to_string(),
                    ));
                }
            }
        }
        validate_name("codename", &self.codename)?;
        validate_name("component", &self.component)?;
        self.lock.validate()
    }
}

/// Check that `value` can be used as a single object path segment.
pub fn validate_name(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Configuration(format!("{} cannot be empty", what)));
    }
    let bad_char = |c: char| c == '/' || c == '\\' || c.is_whitespace();
    if value == "." || value == ".." || value.contains(bad_char) {
        return Err(Error::Configuration(format!(
            "invalid {}: {:?}",
            what, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"store": {"type": "local", "path": "/srv/apt"}}"#).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Local {
                path: PathBuf::from("/srv/apt")
            }
        );
        assert_eq!(config.codename, "stable");
        assert_eq!(config.component, "main");
        assert_eq!(config.visibility, Visibility::Public);
        assert_eq!(config.lock, LockConfig::default());
        assert_eq!(config.lock.stale_after(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_s3_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "store": {"type": "s3", "bucket": "apt.example.com", "endpoint": "http://localhost:9000"},
                "visibility": "private",
                "lock": {"max_wait_secs": 5, "scope": "codename"},
                "release": {"origin": "Example"}
            }"#,
        )
        .unwrap();
        match &config.store {
            StoreConfig::S3(s3) => {
                assert_eq!(s3.bucket, "apt.example.com");
                assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
                assert_eq!(s3.region, None);
            }
            other => panic!("unexpected store {:?}", other),
        }
        assert_eq!(config.visibility, Visibility::Private);
        assert_eq!(config.lock.max_wait_secs, 5);
        assert_eq!(config.lock.stale_after_secs, 300);
        assert_eq!(config.lock.scope, LockScope::Codename);
        assert_eq!(config.release.origin.as_deref(), Some("Example"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apt-s3.json");
        std::fs::write(
            &path,
            r#"{"store": {"type": "s3", "bucket": "b"}, "codename": "bookworm"}"#,
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.codename, "bookworm");

        std::fs::write(&path, r#"{"store": {"type": "s3", "bucket": ""}}"#).unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(Error::Configuration(_))
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_lock_config() {
        let mut config = Config::new(StoreConfig::S3(S3Config::new("bucket")));
        config.lock.max_backoff_ms = 10;
        config.lock.initial_backoff_ms = 100;
        assert!(config.validate().is_err());

        config.lock = LockConfig::default();
        config.lock.stale_after_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("codename", "bookworm").is_ok());
        assert!(validate_name("codename", "").is_err());
        assert!(validate_name("codename", "..").is_err());
        assert!(validate_name("component", "main/extra").is_err());
        assert!(validate_name("component", "main extra").is_err());
    }

    #[test]
    fn test_explicit_credentials_win() {
        let mut s3 = S3Config::new("bucket");
        s3.access_key_id = Some("AKIAEXAMPLE".to_string());
        s3.secret_access_key = Some("secret".to_string());
        assert_eq!(s3.access_key_id().as_deref(), Some("AKIAEXAMPLE"));
        assert_eq!(s3.secret_access_key().as_deref(), Some("secret"));
    }
}
