//! Dump command implementation.

use std::path::Path;

use serde::Serialize;
use tuplespace_core::{CoordinationData, StoredSpace};

use super::{log_path, to_json, CliResult, Format, LogScan};

/// One stored entry as printed by `dump`.
#[derive(Debug, Serialize)]
pub struct DumpedEntry {
    /// Container id.
    pub container: u64,
    /// Container name, if any.
    pub container_name: Option<String>,
    /// Entry id.
    pub entry: u64,
    /// Payload.
    pub value: serde_json::Value,
    /// Coordination data stored with the entry.
    pub coordination: Vec<CoordinationData>,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    container: Option<&str>,
    limit: Option<usize>,
    format: Format,
) -> CliResult<()> {
    let entries = collect(path, container, limit)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        Format::Text => {
            for e in &entries {
                let name = e.container_name.as_deref().unwrap_or("-");
                println!("{}/{} [{}] {}", e.container, e.entry, name, e.value);
            }
            println!("({} entries)", entries.len());
        }
    }
    Ok(())
}

/// Collects the entries `dump` would print, in container then entry order.
pub fn collect(
    path: &Path,
    container: Option<&str>,
    limit: Option<usize>,
) -> CliResult<Vec<DumpedEntry>> {
    let scan = LogScan::read(&log_path(path)?)?;
    let stored = scan.load()?;

    let out = stored
        .entries
        .iter()
        .filter(|(c, _, _)| {
            container.map_or(true, |wanted| matches_container(&stored, c.as_u64(), wanted))
        })
        .take(limit.unwrap_or(usize::MAX))
        .map(|(c, e, entry)| DumpedEntry {
            container: c.as_u64(),
            container_name: container_name(&stored, c.as_u64()),
            entry: e.as_u64(),
            value: to_json(&entry.value),
            coordination: entry.coordination_data.clone(),
        })
        .collect();
    Ok(out)
}

fn container_name(stored: &StoredSpace, id: u64) -> Option<String> {
    stored
        .containers
        .iter()
        .find(|d| d.id.as_u64() == id)
        .and_then(|d| d.name.clone())
}

fn matches_container(stored: &StoredSpace, id: u64, wanted: &str) -> bool {
    match wanted.parse::<u64>() {
        Ok(n) => n == id,
        Err(_) => container_name(stored, id).as_deref() == Some(wanted),
    }
}
