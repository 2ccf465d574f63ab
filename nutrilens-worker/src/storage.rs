//! Read-only access to submitted images.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::providers::InlineImage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An opened object: a byte stream plus its metadata.
pub struct BlobObject {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    pub size: u64,
    pub content_type: String,
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn open(&self, key: &str) -> Result<BlobObject, StorageError>;
}

/// Read an object fully into memory as a base64 inline image.
pub async fn load_inline_image(
    store: &dyn BlobStore,
    key: &str,
) -> Result<InlineImage, StorageError> {
    let BlobObject {
        mut reader,
        size,
        content_type,
    } = store.open(key).await?;

    let mut bytes = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
    reader.read_to_end(&mut bytes).await?;

    Ok(InlineImage {
        mime_type: content_type,
        data: STANDARD.encode(&bytes),
    })
}

/// Blob store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let well_formed = !key.trim().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !well_formed {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn open(&self, key: &str) -> Result<BlobObject, StorageError> {
        let path = self.resolve(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(BlobObject {
            reader: Box::pin(file),
            size: metadata.len(),
            content_type: content_type_for(&path).to_string(),
        })
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_object_as_inline_image() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("2026/10")).unwrap();
        std::fs::write(dir.path().join("2026/10/meal.JPG"), b"\xff\xd8\xff").unwrap();

        let store = FsBlobStore::new(dir.path());
        let object = store.open("2026/10/meal.JPG").await.unwrap();
        assert_eq!(object.size, 3);
        assert_eq!(object.content_type, "image/jpeg");

        let image = load_inline_image(&store, "2026/10/meal.JPG").await.unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.data, "/9j/");
    }

    #[tokio::test]
    async fn missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(matches!(
            store.open("nope.png").await,
            Err(StorageError::NotFound(key)) if key == "nope.png"
        ));
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        for key in ["../secret.png", "/etc/passwd", "a/../../b.png", "", "./x.png"] {
            assert!(
                matches!(store.open(key).await, Err(StorageError::InvalidKey(_))),
                "{key}"
            );
        }
    }
}
