//! Poster images.
//!
//! [`FsImageFetcher`] serves files from a single directory. Locations are
//! relative paths inside that directory; anything that resolves outside it
//! is refused.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::mcp::error::HandlerError;

/// Errors raised by an [`ImageFetcher`].
#[derive(Debug, Error)]
pub enum ImageError {
    /// Nothing at that location.
    #[error("image not found: {0}")]
    NotFound(String),

    /// The location escapes the image root.
    #[error("Access denied: image location is outside the poster directory")]
    OutsideRoot,

    /// The file extension is not a known image type.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The image could not be read.
    #[error("failed to read image: {location}")]
    Io {
        /// The requested location.
        location: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl From<ImageError> for HandlerError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::NotFound(location) => Self::NotFound {
                entity: "poster",
                key: location,
            },
            ImageError::OutsideRoot | ImageError::UnsupportedFormat(_) => {
                Self::InvalidArguments(err.to_string())
            }
            ImageError::Io { .. } => Self::Internal(err.to_string()),
        }
    }
}

/// Raw image bytes with their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Fetches image bytes by location.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Loads the image at `location`.
    async fn fetch(&self, location: &str) -> Result<Image, ImageError>;
}

/// Reads images from a directory on disk.
#[derive(Debug, Clone)]
pub struct FsImageFetcher {
    root: PathBuf,
}

impl FsImageFetcher {
    /// Serves images from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `location` to a path inside the root.
    async fn resolve(&self, location: &str) -> Result<PathBuf, ImageError> {
        let relative = Path::new(location);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ImageError::OutsideRoot);
        }

        let candidate = self.root.join(relative);
        let canonical = match tokio::fs::canonicalize(&candidate).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ImageError::NotFound(location.to_string()))
            }
            Err(source) => {
                return Err(ImageError::Io {
                    location: location.to_string(),
                    source,
                })
            }
        };
        let canonical_root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|source| ImageError::Io {
                location: location.to_string(),
                source,
            })?;

        // Symlinks may still point outside
        if !canonical.starts_with(&canonical_root) {
            return Err(ImageError::OutsideRoot);
        }
        Ok(canonical)
    }
}

#[async_trait]
impl ImageFetcher for FsImageFetcher {
    async fn fetch(&self, location: &str) -> Result<Image, ImageError> {
        let mime_type = mime_type_for(location)
            .ok_or_else(|| ImageError::UnsupportedFormat(location.to_string()))?;
        let path = self.resolve(location).await?;
        let bytes = tokio::fs::read(&path).await.map_err(|source| ImageError::Io {
            location: location.to_string(),
            source,
        })?;
        tracing::debug!(location, bytes = bytes.len(), "Loaded poster");
        Ok(Image {
            bytes,
            mime_type: mime_type.to_string(),
        })
    }
}

/// MIME type for an image file, from its extension.
#[must_use]
pub fn mime_type_for(location: &str) -> Option<&'static str> {
    let extension = Path::new(location).extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_types() {
        assert_eq!(mime_type_for("heat.PNG"), Some("image/png"));
        assert_eq!(mime_type_for("a/b/heat.jpeg"), Some("image/jpeg"));
        assert_eq!(mime_type_for("heat.txt"), None);
        assert_eq!(mime_type_for("heat"), None);
    }

    #[tokio::test]
    async fn fetches_files_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("heat.png"), [0x89, b'P', b'N', b'G']).unwrap();

        let fetcher = FsImageFetcher::new(dir.path());
        let image = fetcher.fetch("heat.png").await.unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn refuses_traversal_and_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FsImageFetcher::new(dir.path());

        assert!(matches!(
            fetcher.fetch("../secret.png").await,
            Err(ImageError::OutsideRoot)
        ));
        assert!(matches!(
            fetcher.fetch("/etc/passwd.png").await,
            Err(ImageError::OutsideRoot)
        ));
    }

    #[tokio::test]
    async fn missing_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FsImageFetcher::new(dir.path());

        assert!(matches!(
            fetcher.fetch("nope.png").await,
            Err(ImageError::NotFound(_))
        ));
        assert!(matches!(
            fetcher.fetch("notes.txt").await,
            Err(ImageError::UnsupportedFormat(_))
        ));
    }
}
