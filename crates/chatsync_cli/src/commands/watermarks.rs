//! Watermarks command implementation.

use chatsync_engine::{FileWatermarkStore, WatermarkStore};
use serde::Serialize;
use std::path::Path;

/// Watermark representation for output.
#[derive(Debug, Serialize)]
pub struct WatermarkInfo {
    /// Resource key.
    pub resource: String,
    /// Newest merged `updatedAt`.
    pub timestamp: i64,
    /// Tie-break id (if recorded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
}

/// Runs the watermarks command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("watermark file not found: {}", path.display()).into());
    }

    let entries = read_watermarks(path)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }
    Ok(())
}

/// Loads every watermark in the file, ordered by resource key.
pub fn read_watermarks(path: &Path) -> Result<Vec<WatermarkInfo>, Box<dyn std::error::Error>> {
    let store = FileWatermarkStore::open(path)?;
    Ok(store
        .all()?
        .into_iter()
        .map(|(key, mark)| WatermarkInfo {
            resource: key.to_string(),
            timestamp: mark.timestamp,
            last_id: mark.last_id.map(|id| id.to_string()),
        })
        .collect())
}

fn print_text_output(entries: &[WatermarkInfo]) {
    println!("Watermarks ({} total)", entries.len());
    println!("================");
    println!();

    for entry in entries {
        print!("{:32} {:>15}", entry.resource, entry.timestamp);
        if let Some(ref id) = entry.last_id {
            print!(" after={id}");
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_engine::Watermark;
    use chatsync_protocol::{MessageId, ResourceKey, UpdateCursor};

    #[test]
    fn reads_entries_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marks.json");
        let store = FileWatermarkStore::open(&path).unwrap();
        store
            .set(&ResourceKey::new("zeta").unwrap(), Watermark::at(5))
            .unwrap();
        store
            .set(
                &ResourceKey::new("alpha").unwrap(),
                Watermark::from(UpdateCursor::after_record(9, MessageId::new("m9"))),
            )
            .unwrap();

        let entries = read_watermarks(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].resource, "alpha");
        assert_eq!(entries[0].last_id.as_deref(), Some("m9"));
        assert_eq!(entries[1].timestamp, 5);
    }
}
