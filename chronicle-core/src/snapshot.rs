//! Friend snapshot store — whole-file JSON persistence for the presence map.
//!
//! Unlike the journals this is not append-only: the full `user_id →
//! FriendRecord` map is written wholesale on every bulk update and on
//! shutdown, and read back once on initialize to pre-populate the presence
//! tracker. Writes swap a temp file into place so a crash mid-write never
//! leaves a half-snapshot behind.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ChronicleError, Result};
use crate::types::FriendRecord;

/// Whole-file JSON store for the friend presence map.
#[derive(Debug, Default)]
pub struct FriendSnapshotStore {
    path: Option<PathBuf>,
}

impl FriendSnapshotStore {
    /// Snapshot file name inside a per-user storage directory.
    pub const FILE_NAME: &'static str = "friends.json";

    /// Create an unbound store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to a per-user storage root.
    pub fn initialize(&mut self, storage_root: &Path) {
        self.path = Some(storage_root.join(Self::FILE_NAME));
    }

    /// Whether the store is bound to a file.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.path.is_some()
    }

    /// Release the file binding. Safe to call when never initialized.
    pub fn shutdown(&mut self) {
        self.path = None;
    }

    /// Load the last snapshot. A missing, unbound, or unreadable file yields
    /// an empty map — presence falls back to live updates.
    #[must_use]
    pub fn load(&self) -> HashMap<String, FriendRecord> {
        let Some(path) = &self.path else {
            return HashMap::new();
        };
        if !path.exists() {
            return HashMap::new();
        }
        match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "friend snapshot unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "friend snapshot read failed, starting empty");
                HashMap::new()
            }
        }
    }

    /// Persist the full map atomically (temp file + rename).
    ///
    /// # Errors
    /// Returns [`ChronicleError::NotInitialized`] when unbound, or the
    /// underlying I/O / serialization error.
    pub fn save(&self, friends: &HashMap<String, FriendRecord>) -> Result<()> {
        let path = self.path.as_ref().ok_or(ChronicleError::NotInitialized {
            component: "friend-snapshot",
        })?;

        let json = serde_json::to_vec(friends)
            .map_err(|e| ChronicleError::Serialization(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, path)?;

        debug!(
            path = %path.display(),
            friends = friends.len(),
            bytes = json.len(),
            "friend snapshot written"
        );
        Ok(())
    }
}
