//! Advisory lock kept as an object in the store.
//!
//! The store has no compare-and-swap, so acquisition is optimistic: write a
//! token naming ourselves, wait for the write to settle, and read it back. If
//! the token still names us the lock is held; otherwise someone raced us and
//! we back off. Tokens older than the staleness threshold are treated as
//! abandoned and overwritten.
//!
//! Two holders at once remain possible when clocks disagree by more than the
//! staleness threshold, or when a write takes longer than the settle delay to
//! become visible.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LockConfig;
use crate::error::{Error, Result};
use crate::store::{ObjectStore, StoreError, Visibility};

/// Contents of a lock object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    /// `<uuid>@<hostname>` of the holder.
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockToken {
    pub fn new<S: Into<String>>(owner: S) -> Self {
        Self {
            owner: owner.into(),
            acquired_at: Utc::now(),
        }
    }

    /// How long ago the token was written. Tokens from the future are zero
    /// seconds old.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.acquired_at).to_std().unwrap_or(Duration::ZERO)
    }

    fn to_bytes(&self) -> Vec<u8> {
        // Serializing a struct of strings cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// A fresh owner identity for this process.
pub fn new_owner_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}@{}", uuid::Uuid::new_v4(), host)
}

enum Attempt {
    Held,
    Contended(Option<String>),
}

/// A lock on one object path.
pub struct DistributedLock {
    store: Arc<dyn ObjectStore>,
    path: String,
    owner: String,
    config: LockConfig,
}

impl DistributedLock {
    pub fn new<S: Into<String>>(store: Arc<dyn ObjectStore>, path: S, config: &LockConfig) -> Self {
        Self::with_owner(store, path, new_owner_id(), config)
    }

    pub fn with_owner<S: Into<String>, O: Into<String>>(
        store: Arc<dyn ObjectStore>,
        path: S,
        owner: O,
        config: &LockConfig,
    ) -> Self {
        Self {
            store,
            path: path.into(),
            owner: owner.into(),
            config: config.clone(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    async fn read_token(&self) -> std::result::Result<Option<LockToken>, StoreError> {
        let Some(data) = self.store.get(&self.path).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<LockToken>(&data) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!("Ignoring unreadable lock token at {}: {}", self.path, e);
                Ok(None)
            }
        }
    }

    async fn attempt(&self) -> Result<Attempt> {
        match self.read_token().await? {
            Some(token) if token.owner == self.owner => {
                debug!("Lock token at {} is already ours", self.path);
            }
            Some(token) => {
                let age = token.age(Utc::now());
                if age < self.config.stale_after() {
                    return Ok(Attempt::Contended(Some(token.owner)));
                }
                warn!(
                    "Reclaiming stale lock {} held by {} for {}s",
                    self.path,
                    token.owner,
                    age.as_secs()
                );
                self.write_token().await?;
            }
            None => self.write_token().await?,
        }

        tokio::time::sleep(self.config.settle()).await;

        match self.read_token().await {
            Ok(Some(token)) if token.owner == self.owner => Ok(Attempt::Held),
            Ok(token) => Ok(Attempt::Contended(token.map(|t| t.owner))),
            Err(e) => {
                debug!("Re-reading lock {} failed: {}", self.path, e);
                Ok(Attempt::Contended(None))
            }
        }
    }

    async fn write_token(&self) -> Result<()> {
        let token = LockToken::new(self.owner.as_str());
        self.store
            .put(
                &self.path,
                token.to_bytes(),
                "application/json",
                Visibility::Private,
            )
            .await?;
        Ok(())
    }

    async fn abandon(&self) {
        match release_if_owned(&*self.store, &self.path, &self.owner).await {
            Ok(true) => debug!("Removed our token from {} after giving up", self.path),
            Ok(false) => {}
            Err(e) => warn!("Failed to clean up lock {}: {}", self.path, e),
        }
    }

    /// Acquire the lock, retrying with jittered exponential backoff until
    /// the configured maximum wait has passed.
    pub async fn acquire(&self) -> Result<LockGuard> {
        let start = tokio::time::Instant::now();
        let max_wait = self.config.max_wait();
        let mut backoff = self.config.initial_backoff();

        loop {
            let attempt = match self.attempt().await {
                Ok(attempt) => attempt,
                Err(e) => {
                    // An earlier round may have left our token behind.
                    self.abandon().await;
                    return Err(e);
                }
            };
            match attempt {
                Attempt::Held => {
                    info!("Acquired lock {}", self.path);
                    return Ok(LockGuard {
                        store: self.store.clone(),
                        path: self.path.clone(),
                        owner: self.owner.clone(),
                        released: false,
                    });
                }
                Attempt::Contended(holder) => {
                    let waited = start.elapsed();
                    if waited >= max_wait {
                        self.abandon().await;
                        return Err(Error::LockTimeout {
                            path: self.path.clone(),
                            waited,
                        });
                    }
                    let ceiling = backoff.as_millis() as u64;
                    let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
                        .min(max_wait - waited);
                    debug!(
                        "Lock {} is held by {}; retrying in {:?}",
                        self.path,
                        holder.as_deref().unwrap_or("unknown"),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(self.config.max_backoff());
                }
            }
        }
    }
}

/// Delete the token at `path` if `owner` still holds it. Returns whether a
/// token was deleted.
async fn release_if_owned(
    store: &dyn ObjectStore,
    path: &str,
    owner: &str,
) -> std::result::Result<bool, StoreError> {
    let Some(data) = store.get(path).await? else {
        return Ok(false);
    };
    match serde_json::from_slice::<LockToken>(&data) {
        Ok(token) if token.owner == owner => {
            store.delete(path).await?;
            Ok(true)
        }
        Ok(token) => {
            warn!(
                "Lock {} was reclaimed by {}; leaving it in place",
                path, token.owner
            );
            Ok(false)
        }
        Err(_) => Ok(false),
    }
}

/// A held lock. Dropping it without calling [`LockGuard::release`] deletes
/// the token in the background.
pub struct LockGuard {
    store: Arc<dyn ObjectStore>,
    path: String,
    owner: String,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Release the lock, leaving it alone if someone else reclaimed it.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        if release_if_owned(&*self.store, &self.path, &self.owner).await? {
            info!("Released lock {}", self.path);
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let path = std::mem::take(&mut self.path);
        let owner = std::mem::take(&mut self.owner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = release_if_owned(&*store, &path, &owner).await {
                        warn!("Failed to release lock {}: {}", path, e);
                    }
                });
            }
            Err(_) => {
                warn!(
                    "Lock {} dropped outside a runtime; it will expire after the staleness threshold",
                    path
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn fast_config() -> LockConfig {
        LockConfig {
            stale_after_secs: 300,
            max_wait_secs: 30,
            settle_ms: 5,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            ..Default::default()
        }
    }

    fn seed_token(store: &MemoryStore, path: &str, owner: &str, age: chrono::Duration) {
        let token = LockToken {
            owner: owner.to_string(),
            acquired_at: Utc::now() - age,
        };
        store.insert(path, serde_json::to_vec(&token).unwrap());
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = Arc::new(MemoryStore::new());
        let lock = DistributedLock::with_owner(store.clone(), "dists/stable/lock", "me@host", &fast_config());

        let guard = lock.acquire().await.unwrap();
        assert_eq!(guard.owner(), "me@host");
        let token: LockToken =
            serde_json::from_slice(&store.object("dists/stable/lock").unwrap().data).unwrap();
        assert_eq!(token.owner, "me@host");
        assert_eq!(
            store.object("dists/stable/lock").unwrap().visibility,
            Visibility::Private
        );

        guard.release().await.unwrap();
        assert!(store.object("dists/stable/lock").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_token_times_out() {
        let store = Arc::new(MemoryStore::new());
        seed_token(&store, "lock", "other@host", chrono::Duration::seconds(1));

        let mut config = fast_config();
        config.max_wait_secs = 1;
        let lock = DistributedLock::with_owner(store.clone(), "lock", "me@host", &config);

        match lock.acquire().await {
            Err(Error::LockTimeout { path, waited }) => {
                assert_eq!(path, "lock");
                assert!(waited >= Duration::from_secs(1));
            }
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("acquired a lock held by someone else"),
        }

        let token: LockToken = serde_json::from_slice(&store.object("lock").unwrap().data).unwrap();
        assert_eq!(token.owner, "other@host");
    }

    #[tokio::test]
    async fn test_stale_token_is_reclaimed() {
        let store = Arc::new(MemoryStore::new());
        seed_token(&store, "lock", "crashed@host", chrono::Duration::hours(1));

        let lock = DistributedLock::with_owner(store.clone(), "lock", "me@host", &fast_config());
        let guard = lock.acquire().await.unwrap();
        let token: LockToken = serde_json::from_slice(&store.object("lock").unwrap().data).unwrap();
        assert_eq!(token.owner, "me@host");
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_token_is_overwritten() {
        let store = Arc::new(MemoryStore::new());
        store.insert("lock", "garbage");

        let lock = DistributedLock::with_owner(store.clone(), "lock", "me@host", &fast_config());
        let guard = lock.acquire().await.unwrap();
        guard.release().await.unwrap();
        assert!(store.object("lock").is_none());
    }

    #[tokio::test]
    async fn test_release_leaves_reclaimed_token() {
        let store = Arc::new(MemoryStore::new());
        let lock = DistributedLock::with_owner(store.clone(), "lock", "me@host", &fast_config());
        let guard = lock.acquire().await.unwrap();

        seed_token(&store, "lock", "newcomer@host", chrono::Duration::zero());
        guard.release().await.unwrap();

        let token: LockToken = serde_json::from_slice(&store.object("lock").unwrap().data).unwrap();
        assert_eq!(token.owner, "newcomer@host");
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let store = Arc::new(MemoryStore::new());
        let lock = DistributedLock::with_owner(store.clone(), "lock", "me@host", &fast_config());
        let guard = lock.acquire().await.unwrap();
        drop(guard);

        for _ in 0..10 {
            if store.object("lock").is_none() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("lock token survived the guard being dropped");
    }

    #[tokio::test]
    async fn test_second_acquirer_waits_for_release() {
        let store = Arc::new(MemoryStore::new());
        let first = DistributedLock::with_owner(store.clone(), "lock", "first@host", &fast_config());
        let second = DistributedLock::with_owner(store.clone(), "lock", "second@host", &fast_config());

        let guard = first.acquire().await.unwrap();
        let waiter = tokio::spawn(async move { second.acquire().await.map(|g| g.owner().to_string()) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        guard.release().await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), "second@host");
    }

    #[tokio::test]
    async fn test_failed_acquire_removes_own_token() {
        let store = Arc::new(MemoryStore::new());
        // The first attempt writes our token and cannot confirm it; the
        // second cannot even read the path.
        store.fail_reads_of("lock", [2, 3]);

        let lock = DistributedLock::with_owner(store.clone(), "lock", "me@host", &fast_config());
        match lock.acquire().await {
            Err(Error::Store(StoreError::ServiceUnavailable(_))) => {}
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("acquired a lock through failed reads"),
        }
        assert_eq!(store.write_log(), vec!["lock"]);
        assert!(store.object("lock").is_none());
    }

    #[test]
    fn test_token_age() {
        let token = LockToken {
            owner: "x".to_string(),
            acquired_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert_eq!(token.age(Utc::now()), Duration::ZERO);
    }

    #[test]
    fn test_owner_id_is_unique() {
        let a = new_owner_id();
        let b = new_owner_id();
        assert_ne!(a, b);
        assert!(a.contains('@'));
    }
}
