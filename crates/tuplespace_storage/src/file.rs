//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::batch::{WriteBatch, FRAME_MAGIC, FRAME_OVERHEAD};
use crate::error::{StorageError, StorageResult};
use crate::memory::{apply_ops, scan};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Summary of the replay performed when a file is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Frames replayed successfully.
    pub frames: usize,
    /// Bytes of an incomplete trailing frame that were cut off.
    pub discarded_tail_bytes: u64,
}

/// Result of [`FileBackend::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    /// File size before compaction.
    pub bytes_before: u64,
    /// File size after compaction.
    pub bytes_after: u64,
}

/// An append-only log of checksummed batch frames.
///
/// The full key space is held in memory and rebuilt by replaying the
/// log on open. An incomplete or checksum-failing final frame is treated
/// as a torn write and cut off; damage before the final frame is
/// reported as corruption.
///
/// # Durability
///
/// - `apply()` appends one frame and, when sync-on-apply is enabled,
///   calls `File::sync_data()` before returning
/// - `sync()` calls `File::sync_all()`
///
/// # Example
///
/// ```no_run
/// use tuplespace_storage::{FileBackend, StorageBackend, WriteBatch};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("space.log")).unwrap();
/// let mut batch = WriteBatch::new();
/// batch.put(b"k".to_vec(), b"v".to_vec());
/// backend.apply(&batch).unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<Option<File>>,
    size: RwLock<u64>,
    index: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    sync_on_apply: AtomicBool,
    report: ReplayReport,
}

impl FileBackend {
    /// Opens or creates a log file and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, or if a frame
    /// before the last one is damaged.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut index = BTreeMap::new();
        let (valid_len, frames) = replay(&data, &mut index)?;
        let discarded = data.len() - valid_len;
        if discarded > 0 {
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
            size: RwLock::new(valid_len as u64),
            index: RwLock::new(index),
            sync_on_apply: AtomicBool::new(true),
            report: ReplayReport {
                frames,
                discarded_tail_bytes: discarded as u64,
            },
        })
    }

    /// Opens or creates a log file, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What happened while replaying the file on open.
    #[must_use]
    pub fn replay_report(&self) -> ReplayReport {
        self.report
    }

    /// Current file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        *self.size.read()
    }

    /// Enables or disables `sync_data` after every applied batch.
    pub fn set_sync_on_apply(&self, enabled: bool) {
        self.sync_on_apply.store(enabled, Ordering::Relaxed);
    }

    /// Rewrites the log as a single frame holding the live key space.
    ///
    /// The new log is written beside the old one and renamed over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or any I/O step fails.
    /// The old log stays in place on failure.
    pub fn compact(&self) -> StorageResult<CompactStats> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            return Err(StorageError::Closed);
        }
        let bytes_before = *self.size.read();

        let mut snapshot = WriteBatch::new();
        for (k, v) in self.index.read().iter() {
            snapshot.put(k.clone(), v.clone());
        }
        let frame = snapshot.encode_frame();

        let tmp = self.path.with_extension("compact");
        {
            let mut out = File::create(&tmp)?;
            out.write_all(&frame)?;
            out.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        *guard = Some(file);
        let bytes_after = frame.len() as u64;
        *self.size.write() = bytes_after;

        Ok(CompactStats {
            bytes_before,
            bytes_after,
        })
    }

    /// Closes the file. Later calls fail with `Closed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub fn close(&self) -> StorageResult<()> {
        if let Some(file) = self.file.lock().take() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.file.lock().is_none() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

fn replay(data: &[u8], index: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> StorageResult<(usize, usize)> {
    let mut offset = 0usize;
    let mut frames = 0usize;
    while offset < data.len() {
        let rest = &data[offset..];
        match WriteBatch::decode_frame(rest, offset as u64) {
            Ok((batch, consumed)) => {
                apply_ops(index, &batch);
                offset += consumed;
                frames += 1;
            }
            Err(StorageError::Truncated { .. }) => break,
            Err(StorageError::Corrupted(msg)) => {
                if reaches_end(rest) {
                    break;
                }
                return Err(StorageError::Corrupted(msg));
            }
            Err(e) => return Err(e),
        }
    }
    Ok((offset, frames))
}

/// True when `rest` holds exactly one frame by its header's length.
fn reaches_end(rest: &[u8]) -> bool {
    if rest.len() < 8 || rest[..4] != FRAME_MAGIC {
        return false;
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&rest[4..8]);
    u32::from_le_bytes(len) as usize + FRAME_OVERHEAD == rest.len()
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.index.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        Ok(scan(&self.index.read(), prefix))
    }

    fn apply(&self, batch: &WriteBatch) -> StorageResult<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StorageError::Closed)?;
        let frame = batch.encode_frame();

        let mut size = self.size.write();
        file.seek(SeekFrom::Start(*size))?;
        if let Err(e) = file.write_all(&frame) {
            // Drop whatever part of the frame made it out.
            let _ = file.set_len(*size);
            return Err(e.into());
        }
        if self.sync_on_apply.load(Ordering::Relaxed) {
            file.sync_data()?;
        }
        *size += frame.len() as u64;

        apply_ops(&mut self.index.write(), batch);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StorageError::Closed)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self.index.read().len())
    }
}
