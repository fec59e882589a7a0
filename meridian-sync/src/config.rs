use crate::engine::MergeOptions;
use crate::error::SyncResult;
use meridian_types::Oid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Sync service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Merge reference (seed) objects instead of ignoring them.
    pub include_reference_data: bool,
    /// Apply incoming records regardless of timestamp comparison.
    pub force_update: bool,
    /// Identities of shipped reference data.
    pub reference_oids: BTreeSet<Oid>,
    /// Tombstone database file. `None` keeps tombstones in memory.
    pub tombstone_path: Option<PathBuf>,
    /// Directory for derived-cache snapshots. `None` disables persistence.
    pub cache_dir: Option<PathBuf>,
    /// Capacity of the merge-event broadcast channel.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            include_reference_data: false,
            force_update: false,
            reference_oids: BTreeSet::new(),
            tombstone_path: None,
            cache_dir: None,
            event_buffer: 64,
        }
    }
}

impl SyncConfig {
    /// Reads a JSON config file; absent keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            include_reference_data: self.include_reference_data,
            force_update: self.force_update,
        }
    }
}
