//! Filesystem-backed object store: one directory per container.
//!
//! Writes land in a temp file inside the container and are renamed into
//! place, so a reader never observes a partially written object.

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use archivist_types::error::ArchiveError;
use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;

use super::{validate_key, ObjectStore};

/// `ENOSPC` / `EDQUOT` on Linux.
const STORAGE_FULL_OS_ERRORS: [i32; 2] = [28, 122];

/// Object store rooted at a container directory.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    /// Open (and create if needed) the container directory.
    ///
    /// # Errors
    ///
    /// Returns a categorized error if the directory can't be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| map_io_error("open", &root.display().to_string(), &e))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ArchiveError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

/// Map an I/O failure to the retry taxonomy.
fn map_io_error(op: &str, key: &str, e: &io::Error) -> ArchiveError {
    let message = format!("{op} '{key}': {e}");
    if e.raw_os_error().is_some_and(|code| STORAGE_FULL_OS_ERRORS.contains(&code)) {
        return ArchiveError::permanent("STORAGE_FULL", message);
    }
    match e.kind() {
        io::ErrorKind::NotFound => ArchiveError::not_found("NO_OBJECT", message),
        io::ErrorKind::PermissionDenied => ArchiveError::permanent("PERMISSION_DENIED", message),
        io::ErrorKind::InvalidInput => ArchiveError::permanent("INVALID_KEY", message),
        _ => ArchiveError::transient_io("IO_ERROR", message),
    }
}

fn write_atomically(root: &Path, path: &Path, body: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(root);
    std::fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), ArchiveError> {
        let path = self.path_for(key)?;
        let root = self.root.clone();
        let key_owned = key.to_string();
        tokio::task::spawn_blocking(move || write_atomically(&root, &path, &body))
            .await
            .map_err(|e| ArchiveError::transient_io("TASK_FAILED", format!("put task failed: {e}")))?
            .map_err(|e| {
                // A missing directory during put is a write failure, not a miss.
                if e.kind() == io::ErrorKind::NotFound {
                    ArchiveError::transient_io("IO_ERROR", format!("put '{key_owned}': {e}"))
                } else {
                    map_io_error("put", &key_owned, &e)
                }
            })
    }

    async fn get(&self, key: &str) -> Result<Bytes, ArchiveError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| map_io_error("get", key, &e))
    }

    async fn exists(&self, key: &str) -> Result<bool, ArchiveError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| map_io_error("exists", key, &e))
    }
}
