//! Verify command implementation.

use std::path::Path;

use super::{log_path, CliError, CliResult, LogScan};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Frames that decoded with a valid checksum.
    pub frames_checked: usize,
    /// Containers that decoded.
    pub containers: usize,
    /// Entries that decoded.
    pub entries: usize,
    /// Bytes of an incomplete final frame, dropped on next open.
    pub torn_tail_bytes: u64,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying space at {:?}", path);
    println!();

    let result = verify(path)?;
    println!("  Frames:     {}", result.frames_checked);
    println!("  Containers: {}", result.containers);
    println!("  Entries:    {}", result.entries);
    if result.torn_tail_bytes > 0 {
        println!(
            "  Warning: {} byte torn tail will be discarded on next open",
            result.torn_tail_bytes
        );
    }
    for error in &result.errors {
        println!("  Error: {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Space verification passed");
        Ok(())
    } else {
        println!("✗ Space verification failed");
        Err(CliError::VerificationFailed(result.errors.len()))
    }
}

/// Checks frames, then decodes every stored record.
pub fn verify(path: &Path) -> CliResult<VerifyResult> {
    let scan = LogScan::read(&log_path(path)?)?;
    let mut result = VerifyResult {
        frames_checked: scan.frames,
        torn_tail_bytes: scan.torn_tail_bytes,
        ..Default::default()
    };

    if let Some(ref corruption) = scan.corruption {
        result.errors.push(format!(
            "{} ({} bytes after the last good frame)",
            corruption,
            scan.file_size - scan.valid_bytes
        ));
    }

    match scan.load() {
        Ok(stored) => {
            result.containers = stored.containers.len();
            result.entries = stored.entries.len();
            if stored.orphans > 0 {
                result
                    .errors
                    .push(format!("{} entries belong to no container", stored.orphans));
            }
        }
        Err(e) => result.errors.push(format!("record decoding failed: {}", e)),
    }

    Ok(result)
}
