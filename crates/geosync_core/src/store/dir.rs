//! Store directory layout and locking.
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK              # Advisory lock, one process per directory
//! └─ registry.geoj     # Journal
//! ```
//!
//! The lock is taken before the journal is read and released when the last
//! handle on the journal goes away.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// File name of the journal inside a store directory.
pub const JOURNAL_FILE_NAME: &str = "registry.geoj";

/// File name of the advisory lock inside a store directory.
pub const LOCK_FILE_NAME: &str = "LOCK";

/// An exclusively locked store directory.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Creates `path` if needed and takes its lock without blocking.
    ///
    /// # Errors
    ///
    /// [`CoreError::StoreLocked`] if another handle holds the lock.
    pub fn open(path: &Path) -> CoreResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE_NAME))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the journal file.
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE_NAME)
    }
}
