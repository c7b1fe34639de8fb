//! # Artifact Store
//!
//! Read-only access to the subtitle files the worker writes into the output
//! directory. Artifacts are never modified or expired here.
//!
//! ## Containment:
//! Download filenames come straight from the URL. Anything that is not a
//! single plain path component (`..`, separators, absolute paths, NUL) is
//! rejected before touching the filesystem, so resolution can never leave the
//! output directory.

use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("invalid artifact name: {0:?}")]
    InvalidName(String),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("failed to open artifact {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a download filename to an existing artifact path.
    ///
    /// Side-effect free: resolving the same name twice yields the same path.
    pub async fn resolve(&self, filename: &str) -> Result<PathBuf, ArtifactError> {
        validate_name(filename)?;

        let path = self.root.join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(ArtifactError::NotFound(filename.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(filename.to_string()))
            }
            Err(source) => Err(ArtifactError::Io { path, source }),
        }
    }

    /// Open a resolved artifact as a byte stream.
    pub async fn open_for_read(&self, path: &Path) -> Result<ReaderStream<File>, ArtifactError> {
        let file = File::open(path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ArtifactError::NotFound(path.display().to_string())
            } else {
                ArtifactError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Ok(ReaderStream::new(file))
    }
}

fn validate_name(filename: &str) -> Result<(), ArtifactError> {
    let invalid = || ArtifactError::InvalidName(filename.to_string());

    if filename.is_empty() || filename.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
        return Err(invalid());
    }

    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tempfile::TempDir;

    fn store_with(files: &[(&str, &str)]) -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        for (name, contents) in files {
            std::fs::write(dir.path().join(name), contents).unwrap();
        }
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_resolve_existing_is_idempotent() {
        let (_dir, store) = store_with(&[("clip.srt", "1\n")]);

        let first = store.resolve("clip.srt").await.unwrap();
        let second = store.resolve("clip.srt").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, store.root().join("clip.srt"));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        let (_dir, store) = store_with(&[]);
        let err = store.resolve("never-produced.srt").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let parent = TempDir::new().unwrap();
        std::fs::write(parent.path().join("secret.txt"), "top secret").unwrap();
        let output = parent.path().join("output");
        std::fs::create_dir(&output).unwrap();
        let store = ArtifactStore::new(&output);

        for name in ["../secret.txt", "..", ".", "", "a/../../secret.txt", "/etc/passwd", "..\\secret.txt"] {
            let err = store.resolve(name).await.unwrap_err();
            assert!(matches!(err, ArtifactError::InvalidName(_)), "accepted {:?}", name);
        }
    }

    #[tokio::test]
    async fn test_directory_is_not_an_artifact() {
        let (dir, store) = store_with(&[]);
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        assert!(matches!(
            store.resolve("nested").await.unwrap_err(),
            ArtifactError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_open_for_read_streams_contents() {
        let (_dir, store) = store_with(&[("clip.srt", "1\n00:00:00,000 --> 00:00:01,000\nhi\n")]);
        let path = store.resolve("clip.srt").await.unwrap();

        let mut stream = store.open_for_read(&path).await.unwrap();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(String::from_utf8(bytes).unwrap(), "1\n00:00:00,000 --> 00:00:01,000\nhi\n");
    }
}
