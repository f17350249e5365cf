//! Compact command implementation.

use std::path::Path;

use tracing::info;
use tuplespace_core::SpaceDir;
use tuplespace_storage::{FileBackend, StorageBackend, WriteBatch};

use super::{format_size, CliResult, LogScan};

/// Sizes before and after compaction.
#[derive(Debug)]
pub struct CompactReport {
    /// Live keys kept.
    pub live_keys: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction (estimated on a dry run).
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> CliResult<()> {
    println!("Compacting space at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let report = compact(path, dry_run)?;
    let saved = report.bytes_before.saturating_sub(report.bytes_after);
    println!("  Live keys:   {}", report.live_keys);
    println!("  Size before: {}", format_size(report.bytes_before));
    println!("  Size after:  {}", format_size(report.bytes_after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(saved),
        if report.bytes_before > 0 {
            saved as f64 / report.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
    if !dry_run {
        println!();
        println!("✓ Compaction complete");
    }
    Ok(())
}

/// Compacts the log, holding the directory lock so no space is open on it.
pub fn compact(path: &Path, dry_run: bool) -> CliResult<CompactReport> {
    let dir = SpaceDir::open(path, false)?;
    let log = super::log_path(dir.path())?;

    if dry_run {
        let scan = LogScan::read(&log)?;
        let mut snapshot = WriteBatch::new();
        for (k, v) in scan.backend.snapshot() {
            snapshot.put(k, v);
        }
        return Ok(CompactReport {
            live_keys: snapshot.len(),
            bytes_before: scan.file_size,
            bytes_after: snapshot.encode_frame().len() as u64,
        });
    }

    let backend = FileBackend::open(&log)?;
    let live_keys = backend.len()?;
    let stats = backend.compact()?;
    backend.close()?;
    info!(
        bytes_before = stats.bytes_before,
        bytes_after = stats.bytes_after,
        "log compacted"
    );
    Ok(CompactReport {
        live_keys,
        bytes_before: stats.bytes_before,
        bytes_after: stats.bytes_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::sample_space;
    use tuplespace_core::Space;

    #[test]
    fn dry_run_leaves_the_log_alone() {
        let dir = sample_space();
        let log = dir.path().join("space.log");
        let before = std::fs::read(&log).unwrap();

        let report = compact(dir.path(), true).unwrap();
        assert!(report.bytes_after <= report.bytes_before);
        assert_eq!(std::fs::read(&log).unwrap(), before);
    }

    #[test]
    fn compaction_keeps_the_contents() {
        let dir = sample_space();
        let estimate = compact(dir.path(), true).unwrap();
        let report = compact(dir.path(), false).unwrap();
        assert_eq!(report.bytes_after, estimate.bytes_after);
        assert_eq!(report.live_keys, estimate.live_keys);

        let space = Space::open(dir.path()).unwrap();
        assert_eq!(space.containers().len(), 1);
        space.close().unwrap();
    }

    #[test]
    fn open_space_is_not_compacted() {
        let dir = sample_space();
        let space = Space::open(dir.path()).unwrap();
        assert!(compact(dir.path(), false).is_err());
        space.close().unwrap();
    }
}
