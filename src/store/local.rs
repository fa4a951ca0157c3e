use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::store::{ObjectStore, StoreError, Visibility};

/// A bucket mirrored into a local directory.
///
/// Writes go to a temporary sibling and are renamed into place, so readers
/// never observe a half-written object.
#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if !path.is_dir() {
            std::fs::create_dir_all(path)?;
        }
        Ok(Self {
            path: path.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.path
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.path.join(relative))
    }

    async fn prepare(&self, target: &Path) -> Result<PathBuf, StoreError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::InvalidPath(target.display().to_string()))?;
        Ok(target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4())))
    }

    async fn commit(
        &self,
        temp: &Path,
        target: &Path,
        visibility: Visibility,
    ) -> Result<(), StoreError> {
        set_mode(temp, visibility).await?;
        if let Err(e) = tokio::fs::rename(temp, target).await {
            let _ = tokio::fs::remove_file(temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, visibility: Visibility) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = match visibility {
        Visibility::Public => 0o644,
        Visibility::Private | Visibility::Authenticated => 0o600,
    };
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _visibility: Visibility) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                Err(StoreError::PermissionDenied(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        path: &str,
        data: Vec<u8>,
        _content_type: &str,
        visibility: Visibility,
    ) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        let temp = self.prepare(&target).await?;
        tokio::fs::write(&temp, &data).await?;
        self.commit(&temp, &target, visibility).await
    }

    async fn put_file(
        &self,
        path: &str,
        local_path: &Path,
        _content_type: &str,
        visibility: Visibility,
    ) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        let temp = self.prepare(&target).await?;
        tokio::fs::copy(local_path, &temp).await?;
        self.commit(&temp, &target, visibility).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();

        assert_eq!(store.get("dists/stable/Release").await.unwrap(), None);
        store
            .put(
                "dists/stable/Release",
                b"Codename: stable\n".to_vec(),
                "text/plain",
                Visibility::Public,
            )
            .await
            .unwrap();
        assert_eq!(
            store.get("dists/stable/Release").await.unwrap().as_deref(),
            Some(&b"Codename: stable\n"[..])
        );
        assert!(dir.path().join("dists/stable/Release").is_file());

        store.delete("dists/stable/Release").await.unwrap();
        store.delete("dists/stable/Release").await.unwrap();
        assert_eq!(store.get("dists/stable/Release").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_temp_files_left() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        store
            .put("a/b", b"x".to_vec(), "text/plain", Visibility::Private)
            .await
            .unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path().join("a"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_put_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(source.path(), b"payload").unwrap();

        let store = LocalStore::new(&dir.path().join("bucket")).unwrap();
        store
            .put_file(
                "pool/main/f/foo/foo_1.0_amd64.deb",
                source.path(),
                "application/vnd.debian.binary-package",
                Visibility::Public,
            )
            .await
            .unwrap();
        assert_eq!(
            store
                .get("pool/main/f/foo/foo_1.0_amd64.deb")
                .await
                .unwrap()
                .as_deref(),
            Some(&b"payload"[..])
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_visibility_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        store
            .put("public", vec![], "text/plain", Visibility::Public)
            .await
            .unwrap();
        store
            .put("private", vec![], "text/plain", Visibility::Private)
            .await
            .unwrap();
        let mode = |name: &str| {
            std::fs::metadata(dir.path().join(name))
                .unwrap()
                .permissions()
                .mode()
                & 0o777
        };
        assert_eq!(mode("public"), 0o644);
        assert_eq!(mode("private"), 0o600);
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        for path in ["../outside", "/etc/passwd", "a/../../b", ""] {
            assert!(matches!(
                store.get(path).await,
                Err(StoreError::InvalidPath(_))
            ));
        }
    }
}
