//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tuplespace_core::{CoreError, PersistenceContext, StoredSpace, Value};
use tuplespace_storage::{InMemoryBackend, StorageBackend, StorageError, WriteBatch};

/// Errors reported by the commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no space log.
    #[error("no space found at {}", .0.display())]
    NoSpace(PathBuf),

    /// Verification found damage.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),

    /// Unknown `--format` value.
    #[error("unknown output format: {0}")]
    UnknownFormat(String),

    /// Engine error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON output error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for commands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format of the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl std::str::FromStr for Format {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// Path of the log inside a space directory.
///
/// Reads never take the directory lock, so they work on a space another
/// process has open and never modify the log.
pub fn log_path(space: &Path) -> CliResult<PathBuf> {
    let log = space.join("space.log");
    if log.is_file() {
        Ok(log)
    } else {
        Err(CliError::NoSpace(space.to_path_buf()))
    }
}

/// A read-only pass over a log file.
#[derive(Debug)]
pub struct LogScan {
    /// File size in bytes.
    pub file_size: u64,
    /// Frames that decoded.
    pub frames: usize,
    /// Ops across all decoded frames.
    pub ops: usize,
    /// Bytes covered by decoded frames.
    pub valid_bytes: u64,
    /// Bytes of an incomplete final frame.
    pub torn_tail_bytes: u64,
    /// First damaged frame, if any.
    pub corruption: Option<String>,
    /// Key space rebuilt from the decoded frames.
    pub backend: Arc<InMemoryBackend>,
}

impl LogScan {
    /// Decodes every frame of the log at `path`.
    pub fn read(path: &Path) -> CliResult<Self> {
        let data = std::fs::read(path)?;
        let backend = Arc::new(InMemoryBackend::new());
        let mut scan = Self {
            file_size: data.len() as u64,
            frames: 0,
            ops: 0,
            valid_bytes: 0,
            torn_tail_bytes: 0,
            corruption: None,
            backend,
        };

        let mut offset = 0usize;
        while offset < data.len() {
            match WriteBatch::decode_frame(&data[offset..], offset as u64) {
                Ok((batch, consumed)) => {
                    scan.backend.apply(&batch)?;
                    scan.frames += 1;
                    scan.ops += batch.len();
                    offset += consumed;
                }
                Err(StorageError::Truncated { .. }) => {
                    scan.torn_tail_bytes = (data.len() - offset) as u64;
                    break;
                }
                Err(e) => {
                    scan.corruption = Some(e.to_string());
                    break;
                }
            }
        }
        scan.valid_bytes = offset as u64;
        Ok(scan)
    }

    /// Persistence view over the rebuilt key space.
    pub fn persistence(&self) -> PersistenceContext {
        PersistenceContext::new(Arc::clone(&self.backend) as Arc<dyn StorageBackend>, false)
    }

    /// Decodes containers and entries from the rebuilt key space.
    pub fn load(&self) -> CliResult<StoredSpace> {
        Ok(self.persistence().load()?)
    }
}

/// Converts an entry value to JSON.
///
/// Byte strings become arrays of numbers and non-text map keys are
/// rendered with their display form.
pub fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(n) => Json::from(*n),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Bytes(b) => Json::Array(b.iter().map(|x| Json::from(*x)).collect()),
        Value::Text(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(pairs) => Json::Object(
            pairs
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::Text(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key, to_json(v))
                })
                .collect(),
        ),
    }
}

/// Formats a byte count.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
