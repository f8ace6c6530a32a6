//! Storage abstraction for the queue index.
//!
//! Vocabulary note:
//! - `flush()` on a writer is a **visibility boundary** (userspace → OS /
//!   underlying backend), not a stable-storage guarantee.
//! - Stable-storage **durability** (survives power loss) requires an
//!   explicit [`Directory::sync_file`] barrier. The index issues that
//!   barrier on segment-handle switch and after ack scatter; the ack
//!   journal deliberately never gets one (a lost journal tail replays as
//!   "ack not yet received", which is safe).

use crate::error::{IndexError, IndexResult};
use std::io::{Read, Write};
use std::path::PathBuf;

/// Trait for directory-like storage backends.
///
/// Paths are relative, `/`-separated, and interpreted against the backend's
/// root. Deleting or truncating a path that does not exist is success; the
/// recovery pipeline relies on both.
pub trait Directory: Send + Sync {
    /// Open an existing file for reading.
    fn open_file(&self, path: &str) -> IndexResult<Box<dyn Read>>;
    /// Open a file for appending (creating it if missing).
    fn append_file(&self, path: &str) -> IndexResult<Box<dyn Write>>;
    /// Return whether a path exists.
    fn exists(&self, path: &str) -> bool;
    /// Delete a file or directory (directories recursively). Missing is ok.
    fn delete(&self, path: &str) -> IndexResult<()>;
    /// Truncate a file to `len` bytes. Missing is ok; `len` past the end
    /// leaves the file unchanged.
    fn truncate_file(&self, path: &str, len: u64) -> IndexResult<()>;
    /// Ask the OS to persist a file to stable storage.
    ///
    /// Backends without a stable-storage distinction (in-memory) treat this
    /// as a no-op: their map *is* their stable storage.
    fn sync_file(&self, path: &str) -> IndexResult<()>;
    /// Create a directory (and parents if needed).
    fn create_dir_all(&self, path: &str) -> IndexResult<()>;
    /// List entries in a directory (sorted; empty if the directory is missing).
    fn list_dir(&self, path: &str) -> IndexResult<Vec<String>>;
    /// Optional filesystem path for backends that support it.
    ///
    /// Tests use this to tamper with raw bytes (torn tails, lost journal
    /// writes); the index itself never does.
    fn file_path(&self, path: &str) -> Option<PathBuf>;
}

/// Filesystem-backed `Directory` rooted at a local path.
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Create (or open) a filesystem directory backend rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> IndexResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Directory for FsDirectory {
    fn open_file(&self, path: &str) -> IndexResult<Box<dyn Read>> {
        let full_path = self.resolve_path(path);
        if !full_path.exists() {
            return Err(IndexError::MissingPath(full_path));
        }
        Ok(Box::new(std::fs::File::open(full_path)?))
    }

    fn append_file(&self, path: &str) -> IndexResult<Box<dyn Write>> {
        let full_path = self.resolve_path(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(full_path)?;
        Ok(Box::new(file))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve_path(path).exists()
    }

    fn delete(&self, path: &str) -> IndexResult<()> {
        let full_path = self.resolve_path(path);
        if full_path.is_dir() {
            std::fs::remove_dir_all(full_path)?;
        } else if full_path.exists() {
            std::fs::remove_file(full_path)?;
        }
        Ok(())
    }

    fn truncate_file(&self, path: &str, len: u64) -> IndexResult<()> {
        let full_path = self.resolve_path(path);
        match std::fs::OpenOptions::new().write(true).open(&full_path) {
            Ok(f) => {
                if f.metadata()?.len() > len {
                    f.set_len(len)?;
                    f.sync_all()?;
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn sync_file(&self, path: &str) -> IndexResult<()> {
        let f = std::fs::OpenOptions::new()
            .read(true)
            .open(self.resolve_path(path))?;
        f.sync_all()?;
        Ok(())
    }

    fn create_dir_all(&self, path: &str) -> IndexResult<()> {
        std::fs::create_dir_all(self.resolve_path(path))?;
        Ok(())
    }

    fn list_dir(&self, path: &str) -> IndexResult<Vec<String>> {
        let full_path = self.resolve_path(path);
        if !full_path.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(full_path)?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            out.push(entry.file_name().to_string_lossy().to_string());
        }
        out.sort();
        Ok(out)
    }

    fn file_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve_path(path))
    }
}

/// In-memory `Directory` used for tests.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    files: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>>,
}

impl MemoryDirectory {
    /// Create an empty in-memory directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_failed() -> IndexError {
        IndexError::LockFailed {
            resource: "memory directory".to_string(),
            reason: "lock poisoned".to_string(),
        }
    }
}

impl Directory for MemoryDirectory {
    fn open_file(&self, path: &str) -> IndexResult<Box<dyn Read>> {
        let files = self.files.read().map_err(|_| Self::lock_failed())?;
        let data = files
            .get(path)
            .ok_or_else(|| IndexError::NotFound(path.to_string()))?
            .clone();
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    fn append_file(&self, path: &str) -> IndexResult<Box<dyn Write>> {
        // Ensure the file exists, then append in-place.
        {
            let mut files = self.files.write().map_err(|_| Self::lock_failed())?;
            files.entry(path.to_string()).or_default();
        }
        Ok(Box::new(MemoryInPlaceWriter {
            files: self.files.clone(),
            path: path.to_string(),
        }))
    }

    fn exists(&self, path: &str) -> bool {
        self.files
            .read()
            .map(|f| f.keys().any(|k| k == path || k.starts_with(&format!("{path}/"))))
            .unwrap_or(false)
    }

    fn delete(&self, path: &str) -> IndexResult<()> {
        let mut files = self.files.write().map_err(|_| Self::lock_failed())?;
        // Directory semantics: also drop everything under `path/`.
        let prefix = format!("{path}/");
        files.retain(|k, _| k != path && !k.starts_with(&prefix));
        Ok(())
    }

    fn truncate_file(&self, path: &str, len: u64) -> IndexResult<()> {
        let mut files = self.files.write().map_err(|_| Self::lock_failed())?;
        if let Some(data) = files.get_mut(path) {
            data.truncate(len as usize);
        }
        Ok(())
    }

    fn sync_file(&self, _path: &str) -> IndexResult<()> {
        Ok(())
    }

    fn create_dir_all(&self, _path: &str) -> IndexResult<()> {
        Ok(())
    }

    fn list_dir(&self, path: &str) -> IndexResult<Vec<String>> {
        let files = self.files.read().map_err(|_| Self::lock_failed())?;
        let prefix = if path.is_empty() {
            "".to_string()
        } else {
            format!("{path}/")
        };
        let mut result: Vec<String> = files
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            // A nested path contributes its first component, like readdir.
            .map(|rest| match rest.split_once('/') {
                Some((first, _)) => first.to_string(),
                None => rest.to_string(),
            })
            .collect();
        result.sort();
        result.dedup();
        Ok(result)
    }

    fn file_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

struct MemoryInPlaceWriter {
    files: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>>,
    path: String,
}

impl Write for MemoryInPlaceWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut files = self
            .files
            .write()
            .map_err(|_| std::io::Error::other("lock poisoned"))?;
        let entry = files.entry(self.path.clone()).or_default();
        entry.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
