//! Inspect command implementation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tuplespace_core::ContainerDescriptor;

use super::{format_size, log_path, CliResult, Format, LogScan};

/// Space inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Space directory.
    pub path: String,
    /// Persistent space id, if one was ever assigned.
    pub space_id: Option<String>,
    /// Log file size in bytes.
    pub log_size: u64,
    /// Decoded frames.
    pub frame_count: usize,
    /// Puts and deletes across all frames.
    pub op_count: usize,
    /// Bytes of an incomplete final frame.
    pub torn_tail_bytes: u64,
    /// Number of containers.
    pub container_count: usize,
    /// Number of stored entries.
    pub entry_count: usize,
    /// Entries without a container.
    pub orphan_count: usize,
    /// Container details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<ContainerInfo>>,
}

/// Details of one stored container.
#[derive(Debug, Serialize)]
pub struct ContainerInfo {
    /// Container id.
    pub id: u64,
    /// Container name.
    pub name: Option<String>,
    /// Size limit.
    pub size: Option<usize>,
    /// Coordinators as `name:kind`, obligatory first.
    pub coordinators: Vec<String>,
    /// Stored entries.
    pub entry_count: usize,
}

impl ContainerInfo {
    fn new(descriptor: &ContainerDescriptor, entry_count: usize) -> Self {
        Self {
            id: descriptor.id.as_u64(),
            name: descriptor.name.clone(),
            size: descriptor.size,
            coordinators: descriptor
                .coordinators()
                .map(|(spec, obligatory)| {
                    let marker = if obligatory { "" } else { "?" };
                    format!("{}:{}{}", spec.name, spec.kind, marker)
                })
                .collect(),
            entry_count,
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, show_containers: bool, format: Format) -> CliResult<()> {
    let result = inspect(path, show_containers)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

/// Collects the inspection result without printing it.
pub fn inspect(path: &Path, show_containers: bool) -> CliResult<InspectResult> {
    let scan = LogScan::read(&log_path(path)?)?;
    let stored = scan.load()?;
    let space_id = scan.persistence().stored_space_id()?;

    let mut per_container: BTreeMap<u64, usize> = BTreeMap::new();
    for (container, _, _) in &stored.entries {
        *per_container.entry(container.as_u64()).or_default() += 1;
    }

    let containers = show_containers.then(|| {
        stored
            .containers
            .iter()
            .map(|d| {
                let count = per_container.get(&d.id.as_u64()).copied().unwrap_or(0);
                ContainerInfo::new(d, count)
            })
            .collect()
    });

    Ok(InspectResult {
        path: path.display().to_string(),
        space_id: space_id.map(|id| id.to_string()),
        log_size: scan.file_size,
        frame_count: scan.frames,
        op_count: scan.ops,
        torn_tail_bytes: scan.torn_tail_bytes,
        container_count: stored.containers.len(),
        entry_count: stored.entries.len(),
        orphan_count: stored.orphans,
        containers,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Space: {}", result.path);
    println!(
        "Space id: {}",
        result.space_id.as_deref().unwrap_or("(not assigned)")
    );
    println!();
    println!("Storage:");
    println!("  Log size:   {}", format_size(result.log_size));
    println!("  Frames:     {}", result.frame_count);
    println!("  Ops:        {}", result.op_count);
    if result.torn_tail_bytes > 0 {
        println!("  Torn tail:  {} bytes", result.torn_tail_bytes);
    }
    println!();
    println!("Contents:");
    println!("  Containers: {}", result.container_count);
    println!("  Entries:    {}", result.entry_count);
    if result.orphan_count > 0 {
        println!("  Orphans:    {}", result.orphan_count);
    }

    if let Some(ref containers) = result.containers {
        println!();
        println!("Containers:");
        for c in containers {
            let size = c
                .size
                .map_or_else(|| "unbounded".to_string(), |s| s.to_string());
            println!(
                "  [{}] {}: {} entries (size {}) {}",
                c.id,
                c.name.as_deref().unwrap_or("<anonymous>"),
                c.entry_count,
                size,
                c.coordinators.join(", ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::sample_space;

    #[test]
    fn inspect_counts_containers_and_entries() {
        let dir = sample_space();
        let result = inspect(dir.path(), true).unwrap();

        assert!(result.space_id.is_some());
        assert_eq!(result.container_count, 1);
        assert_eq!(result.entry_count, 3);
        assert_eq!(result.orphan_count, 0);

        let containers = result.containers.unwrap();
        assert_eq!(containers[0].name.as_deref(), Some("jobs"));
        assert_eq!(containers[0].entry_count, 3);
        assert_eq!(containers[0].coordinators.len(), 2);
    }

    #[test]
    fn container_details_are_optional() {
        let dir = sample_space();
        let result = inspect(dir.path(), false).unwrap();
        assert!(result.containers.is_none());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("containers").is_none());
    }
}
