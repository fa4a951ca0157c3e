use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::store::{ObjectStore, StoreError, Visibility};

/// An object held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
    pub visibility: Visibility,
}

#[derive(Debug)]
struct Entry {
    current: Option<StoredObject>,
    previous: Option<StoredObject>,
    changed_at: Instant,
}

#[derive(Debug, Default)]
struct ReadFaults {
    counts: BTreeMap<String, usize>,
    failing: BTreeMap<String, BTreeSet<usize>>,
    delays: BTreeMap<String, Duration>,
}

/// In-process store used for tests and publish simulations.
///
/// By default reads see every completed write. [`MemoryStore::with_read_lag`]
/// makes it eventually consistent instead: for a while after a put or delete,
/// reads of that path still return what was there before. Puts to paths
/// registered with [`MemoryStore::fail_puts_to`] fail, as do the reads
/// selected with [`MemoryStore::fail_reads_of`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Entry>>,
    failing: Mutex<BTreeSet<String>>,
    reads: Mutex<ReadFaults>,
    writes: Mutex<Vec<String>>,
    read_lag: Duration,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose reads return the previous value of a path until `lag`
    /// has passed since it last changed.
    pub fn with_read_lag(lag: Duration) -> Self {
        Self {
            read_lag: lag,
            ..Self::default()
        }
    }

    /// Seed an object without going through [`ObjectStore::put`]. Seeded
    /// objects are visible immediately, whatever the read lag.
    pub fn insert(&self, path: &str, data: impl Into<Vec<u8>>) {
        let object = StoredObject {
            data: data.into(),
            content_type: "application/octet-stream".to_string(),
            visibility: Visibility::Private,
        };
        locked(&self.objects).insert(
            path.to_string(),
            Entry {
                current: Some(object.clone()),
                previous: Some(object),
                changed_at: Instant::now(),
            },
        );
    }

    pub fn object(&self, path: &str) -> Option<StoredObject> {
        locked(&self.objects)
            .get(path)
            .and_then(|entry| entry.current.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        locked(&self.objects)
            .iter()
            .filter(|(_, entry)| entry.current.is_some())
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Make every later put to `path` fail.
    pub fn fail_puts_to(&self, path: &str) {
        locked(&self.failing).insert(path.to_string());
    }

    /// Make the given reads of `path` fail, counting from 1 for the first
    /// read of that path.
    pub fn fail_reads_of(&self, path: &str, calls: impl IntoIterator<Item = usize>) {
        locked(&self.reads)
            .failing
            .entry(path.to_string())
            .or_default()
            .extend(calls);
    }

    /// Hold every read of `path` for `delay` before answering with what the
    /// store had when the read started.
    pub fn delay_reads_of(&self, path: &str, delay: Duration) {
        locked(&self.reads).delays.insert(path.to_string(), delay);
    }

    /// Paths of successful puts, in order.
    pub fn write_log(&self) -> Vec<String> {
        locked(&self.writes).clone()
    }

    fn replace(&self, path: &str, object: Option<StoredObject>) {
        let mut objects = locked(&self.objects);
        let previous = objects.remove(path).and_then(|entry| entry.current);
        objects.insert(
            path.to_string(),
            Entry {
                current: object,
                previous,
                changed_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let delay = {
            let mut reads = locked(&self.reads);
            let count = reads.counts.entry(path.to_string()).or_insert(0);
            *count += 1;
            let call = *count;
            if reads
                .failing
                .get(path)
                .is_some_and(|calls| calls.contains(&call))
            {
                return Err(StoreError::ServiceUnavailable(format!(
                    "injected failure reading {}",
                    path
                )));
            }
            reads.delays.get(path).copied()
        };

        let data = locked(&self.objects).get(path).and_then(|entry| {
            let visible = if entry.changed_at.elapsed() < self.read_lag {
                &entry.previous
            } else {
                &entry.current
            };
            visible.as_ref().map(|o| o.data.clone())
        });

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(data)
    }

    async fn put(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<(), StoreError> {
        if locked(&self.failing).contains(path) {
            return Err(StoreError::ServiceUnavailable(format!(
                "injected failure writing {}",
                path
            )));
        }
        self.replace(
            path,
            Some(StoredObject {
                data,
                content_type: content_type.to_string(),
                visibility,
            }),
        );
        locked(&self.writes).push(path.to_string());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.replace(path, None);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
