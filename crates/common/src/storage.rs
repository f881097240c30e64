//! File storage abstraction for message attachments.

use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_util::io::ReaderStream;

use crate::{AppError, AppResult, IdGenerator};

/// Stream of file contents.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Uploaded file metadata.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Storage key (path relative to the disk root).
    pub key: String,
    /// Public URL to access the file.
    pub url: String,
    /// File size in bytes.
    pub size: u64,
    /// MIME content type.
    pub content_type: String,
    /// MD5 hash of the file.
    pub md5: String,
}

/// Storage backend trait.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the disk, recorded alongside every stored key.
    fn disk(&self) -> &str;

    /// Upload a file.
    async fn upload(&self, key: &str, data: &[u8], content_type: &str)
    -> AppResult<UploadedFile>;

    /// Open a file for streaming.
    async fn open(&self, key: &str) -> AppResult<ByteStream>;

    /// Read a whole file into memory.
    async fn read(&self, key: &str) -> AppResult<Vec<u8>>;

    /// Delete a file. Missing files are not an error.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Get the public URL for a key.
    fn public_url(&self, key: &str) -> String;

    /// Check if a file exists.
    async fn exists(&self, key: &str) -> AppResult<bool>;
}

/// Local filesystem storage backend.
pub struct LocalStorage {
    disk: String,
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Create a new local storage backend.
    #[must_use]
    pub const fn new(disk: String, base_path: PathBuf, base_url: String) -> Self {
        Self {
            disk,
            base_path,
            base_url,
        }
    }

    fn resolve(&self, key: &str) -> AppResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(AppError::Storage(format!("Invalid storage key: {key}")));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait::async_trait]
impl StorageBackend for LocalStorage {
    fn disk(&self) -> &str {
        &self.disk
    }

    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> AppResult<UploadedFile> {
        let path = self.resolve(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to create directory: {e}")))?;
        }

        tokio::fs::write(&path, data)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write file: {e}")))?;

        let md5 = format!("{:x}", md5::compute(data));

        Ok(UploadedFile {
            key: key.to_string(),
            url: self.public_url(key),
            size: data.len() as u64,
            content_type: content_type.to_string(),
            md5,
        })
    }

    async fn open(&self, key: &str) -> AppResult<ByteStream> {
        let path = self.resolve(key)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(format!("File {key}")),
            _ => AppError::Storage(format!("Failed to open file: {e}")),
        })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn read(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(format!("File {key}")),
            _ => AppError::Storage(format!("Failed to read file: {e}")),
        })
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!("Failed to delete file: {e}"))),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let path = self.resolve(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to stat file: {e}")))
    }
}

/// Generate a unique storage key under `directory`, keeping the original extension.
#[must_use]
pub fn generate_storage_key(directory: &str, original_name: &str) -> String {
    use chrono::Utc;

    let date_path = Utc::now().format("%Y/%m/%d").to_string();

    let extension = original_name
        .rfind('.')
        .filter(|&pos| pos > 0 && pos < original_name.len() - 1)
        .map(|pos| &original_name[pos + 1..])
        .filter(|ext| ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin")
        .to_ascii_lowercase();

    format!(
        "{}/{}/{}.{}",
        directory.trim_matches('/'),
        date_path,
        IdGenerator::new().generate(),
        extension
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[test]
    fn test_generate_storage_key() {
        let key = generate_storage_key("messages/attachments", "photo.JPG");
        assert!(key.starts_with("messages/attachments/"));
        assert!(key.ends_with(".jpg"));
    }

    #[test]
    fn test_generate_storage_key_no_extension() {
        let key = generate_storage_key("messages/attachments", "file");
        assert!(key.ends_with(".bin"));
        let key = generate_storage_key("messages/attachments", "evil.sh/../x");
        assert!(key.ends_with(".bin"));
    }

    #[test]
    fn test_generate_storage_key_unique() {
        let a = generate_storage_key("a", "x.png");
        let b = generate_storage_key("a", "x.png");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_local_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(
            "local".to_string(),
            dir.path().to_path_buf(),
            "/files".to_string(),
        );

        let uploaded = storage
            .upload("a/b/hello.txt", b"hello", "text/plain")
            .await
            .unwrap();
        assert_eq!(uploaded.size, 5);
        assert_eq!(uploaded.url, "/files/a/b/hello.txt");
        assert!(storage.exists("a/b/hello.txt").await.unwrap());

        let chunks: Vec<Bytes> = storage
            .open("a/b/hello.txt")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"hello");

        storage.delete("a/b/hello.txt").await.unwrap();
        storage.delete("a/b/hello.txt").await.unwrap();
        assert!(!storage.exists("a/b/hello.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_storage_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(
            "local".to_string(),
            dir.path().to_path_buf(),
            "/files".to_string(),
        );

        let err = storage.read("../secret").await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        let err = storage.read("missing.txt").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
