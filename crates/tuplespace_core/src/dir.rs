//! Space directory management.
//!
//! A persistent space lives in a directory:
//!
//! ```text
//! <space_path>/
//! ├─ LOCK              # Advisory lock for single-process access
//! └─ space.log         # Append log of committed batches
//! ```
//!
//! The LOCK file ensures only one process opens the space at a time.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "space.log";

/// An exclusively locked space directory.
///
/// The lock is released when the value is dropped.
///
/// # Example
///
/// ```rust,ignore
/// use tuplespace_core::SpaceDir;
/// use std::path::Path;
///
/// let dir = SpaceDir::open(Path::new("my_space"), true)?;
/// println!("log path: {:?}", dir.log_path());
/// ```
#[derive(Debug)]
pub struct SpaceDir {
    path: PathBuf,
    _lock_file: File,
}

impl SpaceDir {
    /// Opens or creates a space directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (returns `DirectoryLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_operation(format!(
                    "space directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DirectoryLocked);
        }
        debug!(path = %path.display(), "space directory locked");

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the append log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Returns true if nothing was ever committed here.
    #[must_use]
    pub fn is_new(&self) -> bool {
        fs::metadata(self.log_path()).map_or(true, |m| m.len() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("new_space");
        assert!(!path.exists());

        let dir = SpaceDir::open(&path, true).unwrap();
        assert!(path.is_dir());
        assert!(dir.is_new());
        assert_eq!(dir.log_path(), path.join("space.log"));
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = SpaceDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn open_rejects_a_file() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(SpaceDir::open(&file, true).is_err());
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("locked");

        let _first = SpaceDir::open(&path, true).unwrap();
        let second = SpaceDir::open(&path, true);
        assert!(matches!(second, Err(CoreError::DirectoryLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("reopen");
        {
            let _dir = SpaceDir::open(&path, true).unwrap();
        }
        let _again = SpaceDir::open(&path, true).unwrap();
    }
}
