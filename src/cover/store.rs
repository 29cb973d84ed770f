//! Cover files on disk.
//!
//! One file per album identity: `<cover_dir>/<album_id>.<ext>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use super::embedded::{extension_for, select_picture};
use crate::error::{Error, Result};
use crate::metadata::EmbeddedPicture;

/// Cover directory handle.
#[derive(Debug, Clone)]
pub struct CoverStore {
    cover_dir: PathBuf,
}

impl CoverStore {
    /// Use `cover_dir` for cover files, creating it if needed.
    pub fn new(cover_dir: impl Into<PathBuf>) -> Result<Self> {
        let cover_dir = cover_dir.into();
        std::fs::create_dir_all(&cover_dir)?;
        Ok(Self { cover_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.cover_dir
    }

    /// Path the cover of `album_id` gets for the given picture.
    pub fn cover_path(&self, picture: &EmbeddedPicture, album_id: &str) -> PathBuf {
        self.cover_dir
            .join(format!("{}.{}", album_id, extension_for(picture)))
    }

    /// Write the best of `pictures` as the cover of `album_id`.
    ///
    /// Returns `None` when there is nothing to write. When the target file
    /// already exists it is left untouched and its path is returned.
    pub async fn materialize(
        &self,
        pictures: &[EmbeddedPicture],
        album_id: &str,
    ) -> Result<Option<PathBuf>> {
        let Some(picture) = select_picture(pictures) else {
            return Ok(None);
        };
        let path = self.cover_path(picture, album_id);

        // create_new makes the existence check and the create one step
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        match file {
            Ok(mut file) => {
                file.write_all(&picture.data).await?;
                file.flush().await?;
                tracing::debug!(target: "cover::store", album_id, path = %path.display(), "Cover written");
                Ok(Some(path))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(Some(path)),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a cover file. Already absent counts as success.
    pub async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!(target: "cover::store", path = %path.display(), "Cover removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Raw bytes of a stored cover.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        read_file(path).await
    }
}

/// Read a whole file, mapping a missing file to [`Error::NotFound`].
pub(crate) async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::not_found(path),
        _ => Error::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn jpeg(data: &[u8]) -> EmbeddedPicture {
        EmbeddedPicture {
            data: data.to_vec(),
            mime_type: Some("image/jpeg".to_string()),
            front_cover: true,
        }
    }

    #[tokio::test]
    async fn test_materialize_writes_cover() {
        let temp = TempDir::new().unwrap();
        let store = CoverStore::new(temp.path().join("covers")).unwrap();

        let path = store
            .materialize(&[jpeg(b"fake jpeg data")], "album-1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(path, temp.path().join("covers").join("album-1.jpeg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"fake jpeg data");
    }

    #[tokio::test]
    async fn test_materialize_never_overwrites() {
        let temp = TempDir::new().unwrap();
        let store = CoverStore::new(temp.path()).unwrap();

        let first = store.materialize(&[jpeg(b"first")], "album-1").await.unwrap();
        let second = store.materialize(&[jpeg(b"second")], "album-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(first.unwrap()).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_materialize_without_picture() {
        let temp = TempDir::new().unwrap();
        let store = CoverStore::new(temp.path()).unwrap();

        assert!(store.materialize(&[], "album-1").await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = CoverStore::new(temp.path()).unwrap();
        let path = store
            .materialize(&[jpeg(b"x")], "album-1")
            .await
            .unwrap()
            .unwrap();

        store.remove(&path).await.unwrap();
        assert!(!path.exists());
        store.remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_missing_cover_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = CoverStore::new(temp.path()).unwrap();
        let err = store.read(&temp.path().join("nope.jpg")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
