//! Social-activity journal — friend presence transitions and relationship
//! changes as a durable feed.
//!
//! Entries are derived from the presence tracker's `friend-state-changed`
//! diffs and from relationship events. Social entries are never retried or
//! duplicated at the source, so the id only needs uniqueness, not
//! determinism: `(timestamp, random-suffix)`.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JournalConfig;
use crate::error::Result;
use crate::events::{FriendStateChanged, RelationshipEvent};
use crate::journal::{JournalRecord, JournalStats, JournalStore, QueryFilter};
use crate::types::TimestampMs;

/// Social feed entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialKind {
    /// Friend came online.
    Online,
    /// Friend went offline.
    Offline,
    /// Friend moved to a different location.
    Location,
    /// Friend changed status or status description.
    Status,
    /// Friendship created.
    Add,
    /// Friendship ended.
    Remove,
    /// Friend changed avatar.
    Avatar,
}

impl fmt::Display for SocialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Location => "location",
            Self::Status => "status",
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Avatar => "avatar",
        };
        write!(f, "{s}")
    }
}

/// One social feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialRecord {
    /// Unique entry id (`timestamp_randomsuffix`).
    pub id: String,
    /// Entry type.
    #[serde(rename = "type")]
    pub kind: SocialKind,
    /// Platform user id of the friend.
    pub user_id: String,
    /// Display name at the time of the entry.
    pub display_name: String,
    /// When the change happened (epoch ms).
    pub timestamp: TimestampMs,
    /// Human-readable detail (new location, status line, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Structured extras (world name, avatar id, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JournalRecord for SocialRecord {
    fn record_id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn timestamp_ms(&self) -> TimestampMs {
        self.timestamp
    }

    fn matches(&self, filter: &QueryFilter) -> bool {
        if let Some(kind) = &filter.kind {
            if kind != &self.kind.to_string() {
                return false;
            }
        }
        filter.window_contains(self.timestamp)
            && filter.matches_search(&[
                Some(self.display_name.as_str()),
                Some(self.user_id.as_str()),
                self.details.as_deref(),
            ])
    }
}

/// Social entry identity: timestamp plus a random suffix.
#[must_use]
pub fn social_id(timestamp: TimestampMs) -> String {
    format!("{timestamp}_{}", Uuid::new_v4().simple())
}

/// Append-only journal of social activity.
#[derive(Debug)]
pub struct SocialJournal {
    store: JournalStore,
}

impl SocialJournal {
    /// Domain name, also the journal's file stem.
    pub const DOMAIN: &'static str = "social_activity";

    /// Create an unbound journal with dedup and the startup sweep enabled.
    #[must_use]
    pub fn new(config: &JournalConfig) -> Self {
        Self {
            store: JournalStore::new(Self::DOMAIN, config, true, true),
        }
    }

    /// Bind to a per-user storage root.
    ///
    /// # Errors
    /// Propagates storage errors from the underlying store.
    pub fn initialize(&mut self, storage_root: &Path) -> Result<()> {
        self.store.initialize(storage_root)
    }

    /// Release the file binding. Safe to call when never initialized.
    pub fn shutdown(&mut self) {
        self.store.shutdown();
    }

    /// Derive and append feed entries from one presence diff. Returns how
    /// many entries were written.
    pub fn on_state_changed(&mut self, changed: &FriendStateChanged) -> usize {
        let friend = &changed.friend;
        let change = changed.change;
        let timestamp = friend.last_updated;
        let mut written = 0_usize;

        let was_online = changed
            .previous
            .as_ref()
            .is_some_and(|p| p.status.is_online());
        let is_online = friend.status.is_online();

        if change.status && !is_online {
            written += usize::from(self.push(SocialKind::Offline, friend, timestamp, None, None));
        } else if change.status && !was_online {
            let data = friend
                .world_name
                .as_ref()
                .map(|w| serde_json::json!({ "worldName": w }));
            written += usize::from(self.push(
                SocialKind::Online,
                friend,
                timestamp,
                Some(friend.location.clone()),
                data,
            ));
        } else if change.status || change.status_description {
            let details = friend
                .status_description
                .clone()
                .unwrap_or_else(|| friend.status.to_string());
            written +=
                usize::from(self.push(SocialKind::Status, friend, timestamp, Some(details), None));
        }

        if change.location && is_online && !(change.status && !was_online) {
            let data = friend
                .world_name
                .as_ref()
                .map(|w| serde_json::json!({ "worldName": w }));
            written += usize::from(self.push(
                SocialKind::Location,
                friend,
                timestamp,
                Some(friend.location.clone()),
                data,
            ));
        }

        if change.avatar {
            let details = friend
                .current_avatar_id
                .clone()
                .or_else(|| friend.current_avatar_thumbnail_image_url.clone());
            written += usize::from(self.push(SocialKind::Avatar, friend, timestamp, details, None));
        }

        written
    }

    /// Append an `add`/`remove` relationship entry.
    pub fn on_relationship(&mut self, event: &RelationshipEvent, kind: SocialKind) -> bool {
        let record = SocialRecord {
            id: social_id(event.timestamp),
            kind,
            user_id: event.user_id.clone(),
            display_name: event.display_name.clone(),
            timestamp: event.timestamp,
            details: None,
            data: None,
        };
        self.store.append(&record)
    }

    fn push(
        &mut self,
        kind: SocialKind,
        friend: &crate::types::FriendRecord,
        timestamp: TimestampMs,
        details: Option<String>,
        data: Option<serde_json::Value>,
    ) -> bool {
        let record = SocialRecord {
            id: social_id(timestamp),
            kind,
            user_id: friend.user_id.clone(),
            display_name: friend.display_name.clone(),
            timestamp,
            details,
            data,
        };
        self.store.append(&record)
    }

    /// Query the feed, newest first.
    ///
    /// # Errors
    /// Propagates storage errors from the underlying store.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<SocialRecord>> {
        self.store.query(filter)
    }

    /// Timestamp of the earliest `add` entry for `user_id` — the anchor for
    /// "days known". Oldest-first scan in file order; first match wins.
    ///
    /// # Errors
    /// Propagates storage errors from the underlying store.
    pub fn first_add_for(&self, user_id: &str) -> Result<Option<TimestampMs>> {
        let records: Vec<SocialRecord> = self.store.read_all()?;
        Ok(records
            .iter()
            .find(|r| r.kind == SocialKind::Add && r.user_id == user_id)
            .map(|r| r.timestamp))
    }

    /// Store counters for status reporting.
    #[must_use]
    pub fn stats(&self) -> JournalStats {
        self.store.stats()
    }

    /// Administrative bulk clear.
    ///
    /// # Errors
    /// Propagates storage errors from the underlying store.
    pub fn clear(&mut self) -> Result<()> {
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeFlags;
    use crate::types::{FriendRecord, FriendStatus, OFFLINE_LOCATION};

    fn online_friend(user_id: &str, name: &str, ts: TimestampMs) -> FriendRecord {
        let mut rec = FriendRecord::offline(user_id, name);
        rec.status = FriendStatus::Active;
        rec.location = "wrld_a:1".to_string();
        rec.last_updated = ts;
        rec
    }

    fn journal_in(dir: &Path) -> SocialJournal {
        let mut journal = SocialJournal::new(&JournalConfig::default());
        journal.initialize(dir).expect("initialize");
        journal
    }

    #[test]
    fn coming_online_writes_online_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        let friend = online_friend("usr_1", "Alice", 1_000);
        let previous = Some(FriendRecord::offline("usr_1", "Alice"));
        let written = journal.on_state_changed(&FriendStateChanged {
            friend,
            previous,
            change: ChangeFlags {
                status: true,
                location: true,
                ..ChangeFlags::default()
            },
        });

        assert_eq!(written, 1, "online entry absorbs the location change");
        let records = journal.query(&QueryFilter::default()).expect("query");
        assert_eq!(records[0].kind, SocialKind::Online);
        assert_eq!(records[0].details.as_deref(), Some("wrld_a:1"));
    }

    #[test]
    fn going_offline_writes_offline_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        let mut friend = FriendRecord::offline("usr_1", "Alice");
        friend.last_updated = 2_000;
        let previous = Some(online_friend("usr_1", "Alice", 1_000));
        journal.on_state_changed(&FriendStateChanged {
            friend,
            previous,
            change: ChangeFlags {
                status: true,
                location: true,
                ..ChangeFlags::default()
            },
        });

        let records = journal.query(&QueryFilter::default()).expect("query");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, SocialKind::Offline);
    }

    #[test]
    fn moving_instance_writes_location_entry_with_world_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        let mut friend = online_friend("usr_1", "Alice", 2_000);
        friend.location = "wrld_b:7".to_string();
        friend.world_name = Some("Beta".to_string());
        let previous = Some(online_friend("usr_1", "Alice", 1_000));
        journal.on_state_changed(&FriendStateChanged {
            friend,
            previous,
            change: ChangeFlags {
                location: true,
                ..ChangeFlags::default()
            },
        });

        let records = journal.query(&QueryFilter::default()).expect("query");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, SocialKind::Location);
        assert_eq!(records[0].details.as_deref(), Some("wrld_b:7"));
        assert_eq!(
            records[0].data,
            Some(serde_json::json!({ "worldName": "Beta" }))
        );
    }

    #[test]
    fn status_description_change_writes_status_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        let mut friend = online_friend("usr_1", "Alice", 2_000);
        friend.status_description = Some("streaming tonight".to_string());
        let previous = Some(online_friend("usr_1", "Alice", 1_000));
        journal.on_state_changed(&FriendStateChanged {
            friend,
            previous,
            change: ChangeFlags {
                status_description: true,
                ..ChangeFlags::default()
            },
        });

        let records = journal.query(&QueryFilter::default()).expect("query");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, SocialKind::Status);
        assert_eq!(records[0].details.as_deref(), Some("streaming tonight"));
    }

    #[test]
    fn avatar_change_writes_avatar_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        let mut friend = online_friend("usr_1", "Alice", 2_000);
        friend.current_avatar_id = Some("avtr_9".to_string());
        let previous = Some(online_friend("usr_1", "Alice", 1_000));
        journal.on_state_changed(&FriendStateChanged {
            friend,
            previous,
            change: ChangeFlags {
                avatar: true,
                ..ChangeFlags::default()
            },
        });

        let records = journal.query(&QueryFilter::default()).expect("query");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, SocialKind::Avatar);
        assert_eq!(records[0].details.as_deref(), Some("avtr_9"));
    }

    #[test]
    fn first_add_wins_oldest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        journal.on_relationship(
            &RelationshipEvent {
                user_id: "usr_1".into(),
                display_name: "Alice".into(),
                timestamp: 5_000,
            },
            SocialKind::Add,
        );
        journal.on_relationship(
            &RelationshipEvent {
                user_id: "usr_1".into(),
                display_name: "Alice".into(),
                timestamp: 9_000,
            },
            SocialKind::Add,
        );

        assert_eq!(journal.first_add_for("usr_1").expect("scan"), Some(5_000));
        assert_eq!(journal.first_add_for("usr_2").expect("scan"), None);
    }

    #[test]
    fn offline_sentinel_never_leaks_into_location_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        // Location flag set but the friend ended up offline: no entry.
        let mut friend = FriendRecord::offline("usr_1", "Alice");
        friend.location = OFFLINE_LOCATION.to_string();
        friend.last_updated = 2_000;
        let written = journal.on_state_changed(&FriendStateChanged {
            friend,
            previous: Some(online_friend("usr_1", "Alice", 1_000)),
            change: ChangeFlags {
                location: true,
                ..ChangeFlags::default()
            },
        });
        assert_eq!(written, 0);
    }

    #[test]
    fn query_filters_by_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());
        journal.on_relationship(
            &RelationshipEvent {
                user_id: "usr_1".into(),
                display_name: "Alice".into(),
                timestamp: 1_000,
            },
            SocialKind::Add,
        );
        journal.on_relationship(
            &RelationshipEvent {
                user_id: "usr_2".into(),
                display_name: "Bob".into(),
                timestamp: 2_000,
            },
            SocialKind::Remove,
        );

        let filter = QueryFilter {
            kind: Some("add".to_string()),
            ..QueryFilter::default()
        };
        let records = journal.query(&filter).expect("query");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, "usr_1");
    }
}
