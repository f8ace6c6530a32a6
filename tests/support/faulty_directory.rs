//! Filesystem-backed `Directory` wrapper with targeted fault injection.
//!
//! Important: this file lives under `tests/support/` so it is **not**
//! compiled as a standalone integration test target.

use queue_index::storage::{Directory, FsDirectory};
use std::io;
use std::sync::{Arc, Mutex};

/// Fault-injection configuration for segment and journal operations.
#[derive(Default)]
pub struct FaultConfig {
    /// Fail when opening an append handle for segment files.
    pub fail_segment_append: bool,
    /// Fail when deleting segment files (fully-acked deletion).
    pub fail_segment_delete: bool,
    /// Fail when truncating the ack journal.
    pub fail_journal_truncate: bool,
    /// Count of delete calls attempted against segment files.
    pub segment_delete_calls: usize,
}

/// A filesystem-backed `Directory` wrapper with targeted fault injection.
pub struct FaultyDirectory {
    inner: FsDirectory,
    cfg: Arc<Mutex<FaultConfig>>,
}

impl FaultyDirectory {
    /// Wrap an existing `FsDirectory`.
    pub fn new(inner: FsDirectory) -> Self {
        Self {
            inner,
            cfg: Arc::new(Mutex::new(FaultConfig::default())),
        }
    }

    /// Access the shared fault config (for toggling failpoints and reading
    /// counters).
    pub fn cfg(&self) -> Arc<Mutex<FaultConfig>> {
        self.cfg.clone()
    }

    fn is_segment_path(path: &str) -> bool {
        path.ends_with(".idx")
    }

    fn is_journal_path(path: &str) -> bool {
        path.ends_with("ack_journal.jif")
    }
}

impl Directory for FaultyDirectory {
    fn open_file(&self, path: &str) -> queue_index::IndexResult<Box<dyn io::Read>> {
        self.inner.open_file(path)
    }

    fn append_file(&self, path: &str) -> queue_index::IndexResult<Box<dyn io::Write>> {
        let cfg = self.cfg.lock().unwrap();
        if cfg.fail_segment_append && Self::is_segment_path(path) {
            return Err(io::Error::other("injected append failure").into());
        }
        drop(cfg);
        self.inner.append_file(path)
    }

    fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }

    fn delete(&self, path: &str) -> queue_index::IndexResult<()> {
        let mut cfg = self.cfg.lock().unwrap();
        if Self::is_segment_path(path) {
            cfg.segment_delete_calls += 1;
            if cfg.fail_segment_delete {
                return Err(io::Error::other("injected delete failure").into());
            }
        }
        drop(cfg);
        self.inner.delete(path)
    }

    fn truncate_file(&self, path: &str, len: u64) -> queue_index::IndexResult<()> {
        let cfg = self.cfg.lock().unwrap();
        if cfg.fail_journal_truncate && Self::is_journal_path(path) {
            return Err(io::Error::other("injected truncate failure").into());
        }
        drop(cfg);
        self.inner.truncate_file(path, len)
    }

    fn sync_file(&self, path: &str) -> queue_index::IndexResult<()> {
        self.inner.sync_file(path)
    }

    fn create_dir_all(&self, path: &str) -> queue_index::IndexResult<()> {
        self.inner.create_dir_all(path)
    }

    fn list_dir(&self, path: &str) -> queue_index::IndexResult<Vec<String>> {
        self.inner.list_dir(path)
    }

    fn file_path(&self, path: &str) -> Option<std::path::PathBuf> {
        self.inner.file_path(path)
    }
}
