//! Sync watermark stores.
//!
//! A watermark is the position of the newest change merged for a resource.
//! It only moves forward: [`WatermarkStore::set`] with an older or equal value
//! is a no-op, which keeps out-of-order completions from rewinding it.

use crate::error::{SyncError, SyncResult};
use chatsync_protocol::{MessageId, ResourceKey, Timestamp, UpdateCursor};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

const FILE_VERSION: u32 = 1;

/// Newest merged position for a resource.
///
/// Ordered by `(timestamp, last_id)`, with a missing id sorting first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    /// `updatedAt` of the newest merged record.
    pub timestamp: Timestamp,
    /// Id of that record, used as the tie-break on the next fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_id: Option<MessageId>,
}

impl Watermark {
    /// Watermark at a bare timestamp.
    pub fn at(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            last_id: None,
        }
    }

    /// Cursor for the next incremental fetch.
    pub fn cursor(&self) -> UpdateCursor {
        UpdateCursor {
            updated_at: self.timestamp,
            id: self.last_id.clone(),
        }
    }
}

impl From<UpdateCursor> for Watermark {
    fn from(cursor: UpdateCursor) -> Self {
        Self {
            timestamp: cursor.updated_at,
            last_id: cursor.id,
        }
    }
}

/// Per-resource watermark persistence.
///
/// Calls are blocking; the engine invokes them off the async executor.
pub trait WatermarkStore: Send + Sync {
    /// Returns the watermark for `key`, if one was ever recorded.
    fn get(&self, key: &ResourceKey) -> SyncResult<Option<Watermark>>;

    /// Advances the watermark for `key`.
    ///
    /// Returns `true` if the stored value moved. A value that is not strictly
    /// newer than the stored one is ignored.
    fn set(&self, key: &ResourceKey, watermark: Watermark) -> SyncResult<bool>;

    /// Returns every recorded watermark.
    fn all(&self) -> SyncResult<BTreeMap<ResourceKey, Watermark>>;
}

fn advances(current: Option<&Watermark>, next: &Watermark) -> bool {
    current.map_or(true, |current| next > current)
}

/// In-memory watermark store.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    marks: Mutex<BTreeMap<ResourceKey, Watermark>>,
}

impl MemoryWatermarkStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn get(&self, key: &ResourceKey) -> SyncResult<Option<Watermark>> {
        Ok(self.marks.lock().get(key).cloned())
    }

    fn set(&self, key: &ResourceKey, watermark: Watermark) -> SyncResult<bool> {
        let mut marks = self.marks.lock();
        if !advances(marks.get(key), &watermark) {
            return Ok(false);
        }
        marks.insert(key.clone(), watermark);
        Ok(true)
    }

    fn all(&self) -> SyncResult<BTreeMap<ResourceKey, Watermark>> {
        Ok(self.marks.lock().clone())
    }
}

#[derive(Serialize, Deserialize)]
struct WatermarkFile {
    version: u32,
    watermarks: BTreeMap<ResourceKey, Watermark>,
}

/// Watermark store persisted as a JSON file.
///
/// The file is read once at open. Every advance rewrites it by writing a
/// temporary file, syncing it and renaming it over the original, so a crash
/// leaves either the old or the new map on disk.
#[derive(Debug)]
pub struct FileWatermarkStore {
    path: PathBuf,
    marks: Mutex<BTreeMap<ResourceKey, Watermark>>,
}

impl FileWatermarkStore {
    /// Opens the store at `path`, creating an empty one if the file is absent.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let marks = if path.exists() {
            Self::load(&path)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            marks: Mutex::new(marks),
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> SyncResult<BTreeMap<ResourceKey, Watermark>> {
        let data = fs::read(path)?;
        let file: WatermarkFile = serde_json::from_slice(&data)
            .map_err(|e| SyncError::Storage(format!("{}: {e}", path.display())))?;
        if file.version != FILE_VERSION {
            return Err(SyncError::Storage(format!(
                "{}: unsupported watermark file version {}",
                path.display(),
                file.version
            )));
        }
        Ok(file.watermarks)
    }

    fn save(&self, marks: &BTreeMap<ResourceKey, Watermark>) -> SyncResult<()> {
        let data = serde_json::to_vec_pretty(&WatermarkFile {
            version: FILE_VERSION,
            watermarks: marks.clone(),
        })
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        sync_parent(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> SyncResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> SyncResult<()> {
    Ok(())
}

impl WatermarkStore for FileWatermarkStore {
    fn get(&self, key: &ResourceKey) -> SyncResult<Option<Watermark>> {
        Ok(self.marks.lock().get(key).cloned())
    }

    fn set(&self, key: &ResourceKey, watermark: Watermark) -> SyncResult<bool> {
        let mut marks = self.marks.lock();
        if !advances(marks.get(key), &watermark) {
            return Ok(false);
        }

        let mut next = marks.clone();
        next.insert(key.clone(), watermark);
        // Memory only moves once the file has.
        self.save(&next)?;
        *marks = next;
        Ok(true)
    }

    fn all(&self) -> SyncResult<BTreeMap<ResourceKey, Watermark>> {
        Ok(self.marks.lock().clone())
    }
}
