//! Blob sources polled by [`BackgroundPoller`](super::BackgroundPoller).
//!
//! Every method is blocking: implementations are only ever called from the
//! poller's dedicated thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};

/// Metadata checked before deciding whether to download a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobMetadata {
    pub size: u64,
    pub last_modified: SystemTime,
}

/// A large, whole-document resource that can only be fetched in full.
pub trait BlobSource: Send + 'static {
    /// Human-readable location, used in logs.
    fn describe(&self) -> String;

    fn exists(&self) -> Result<bool>;

    fn metadata(&self) -> Result<BlobMetadata>;

    fn download(&self) -> Result<Vec<u8>>;
}

impl<S: BlobSource + ?Sized> BlobSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn exists(&self) -> Result<bool> {
        (**self).exists()
    }

    fn metadata(&self) -> Result<BlobMetadata> {
        (**self).metadata()
    }

    fn download(&self) -> Result<Vec<u8>> {
        (**self).download()
    }
}

/// Blob stored on the local filesystem (or a mounted object store).
#[derive(Debug, Clone)]
pub struct FileBlobSource {
    path: PathBuf,
}

impl FileBlobSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlobSource for FileBlobSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.path.is_file())
    }

    fn metadata(&self) -> Result<BlobMetadata> {
        let meta = fs::metadata(&self.path)
            .map_err(|e| Error::blob(format!("stat {}: {e}", self.path.display())))?;
        let last_modified = meta
            .modified()
            .map_err(|e| Error::blob(format!("mtime {}: {e}", self.path.display())))?;
        Ok(BlobMetadata {
            size: meta.len(),
            last_modified,
        })
    }

    fn download(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| Error::blob(format!("read {}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_source_reports_metadata_and_contents() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("model.json");
        fs::write(&path, b"{\"weights\":[1,2,3]}").expect("write blob");

        let source = FileBlobSource::new(&path);
        assert!(source.exists().unwrap());
        assert_eq!(source.metadata().unwrap().size, 19);
        assert_eq!(source.download().unwrap(), b"{\"weights\":[1,2,3]}".to_vec());
    }

    #[test]
    fn missing_file_does_not_exist() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let source = FileBlobSource::new(dir.path().join("absent.bin"));
        assert!(!source.exists().unwrap());
        assert!(matches!(source.metadata(), Err(Error::Blob(_))));
    }
}
