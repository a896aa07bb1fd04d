//! Friend presence tracker — the authoritative in-memory friend map.
//!
//! Incoming updates are diffed against the tracked record; a
//! `friend-state-changed` event is produced only when at least one semantic
//! field actually changed. The tracker mutates its map and *returns* the
//! change events; the lifecycle wiring publishes them after releasing the
//! tracker lock, so bus handlers never run under it.
//!
//! Presence is best-effort, never fatal: payloads without a resolvable id
//! are silently dropped.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::events::{ChangeFlags, FriendStateChanged, FriendSummary, FriendUpdate};
use crate::types::{now_ms, FriendRecord, FriendStatus, OFFLINE_LOCATION};

/// Authoritative map of friend id → presence record.
///
/// Owned exclusively by this tracker; every consumer receives clones via
/// events or snapshot accessors, never references into the map.
#[derive(Debug, Default)]
pub struct FriendPresenceTracker {
    friends: HashMap<String, FriendRecord>,
}

impl FriendPresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the map wholesale from a loaded snapshot (restart path).
    pub fn preload(&mut self, friends: HashMap<String, FriendRecord>) {
        debug!(friends = friends.len(), "presence preloaded from snapshot");
        self.friends = friends;
    }

    /// Look up one friend.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&FriendRecord> {
        self.friends.get(user_id)
    }

    /// Whether `user_id` is a tracked friend.
    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.friends.contains_key(user_id)
    }

    /// Number of tracked friends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.friends.len()
    }

    /// Whether no friends are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }

    /// Number of friends currently online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.friends
            .values()
            .filter(|f| f.status.is_online())
            .count()
    }

    /// Clones of every tracked record, sorted by display name for stable
    /// presentation.
    #[must_use]
    pub fn all(&self) -> Vec<FriendRecord> {
        let mut list: Vec<FriendRecord> = self.friends.values().cloned().collect();
        list.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        list
    }

    /// Clone of the full map, the shape the snapshot store persists.
    #[must_use]
    pub fn map_snapshot(&self) -> HashMap<String, FriendRecord> {
        self.friends.clone()
    }

    /// Forget everything (account switch).
    pub fn clear(&mut self) {
        self.friends.clear();
    }

    /// Merge a partial update into the tracked record (or a fresh
    /// offline-defaulted one), returning a change event when any semantic
    /// field actually changed.
    ///
    /// A transition to offline forces the location to the offline sentinel
    /// regardless of what the payload carried.
    pub fn apply_incremental(&mut self, update: &FriendUpdate) -> Option<FriendStateChanged> {
        let user_id = update.user_id.trim();
        if user_id.is_empty() {
            trace!("presence update without user id dropped");
            return None;
        }

        let previous = self.friends.get(user_id).cloned();
        let base = previous.clone().unwrap_or_else(|| {
            FriendRecord::offline(
                user_id,
                update
                    .display_name
                    .clone()
                    .unwrap_or_else(|| user_id.to_string()),
            )
        });

        let mut record = base.clone();
        if let Some(name) = &update.display_name {
            record.display_name = name.clone();
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(location) = &update.location {
            record.location = location.clone();
        }
        if let Some(world_name) = &update.world_name {
            record.world_name = Some(world_name.clone());
        }
        if let Some(description) = &update.status_description {
            record.status_description = Some(description.clone());
        }
        if let Some(group) = &update.represented_group {
            record.represented_group = Some(group.clone());
        }
        if let Some(icon) = &update.user_icon {
            record.user_icon = Some(icon.clone());
        }
        if let Some(pic) = &update.profile_pic_override {
            record.profile_pic_override = Some(pic.clone());
        }
        if let Some(thumb) = &update.current_avatar_thumbnail_image_url {
            record.current_avatar_thumbnail_image_url = Some(thumb.clone());
        }
        if let Some(avatar) = &update.current_avatar_id {
            record.current_avatar_id = Some(avatar.clone());
        }

        if record.status == FriendStatus::Offline {
            record.location = OFFLINE_LOCATION.to_string();
        }

        let change = diff(&base, &record);
        if change.any() {
            record.last_updated = now_ms();
        }
        self.friends.insert(user_id.to_string(), record.clone());

        if change.any() {
            Some(FriendStateChanged {
                friend: record,
                previous,
                change,
            })
        } else {
            None
        }
    }

    /// Reconcile a full externally-fetched friend list: tracked friends
    /// absent from the list and not already offline are marked offline (with
    /// their own change event), then every listed entry is diffed and
    /// upserted exactly as in the incremental path.
    pub fn apply_bulk_replace(&mut self, list: &[FriendSummary]) -> Vec<FriendStateChanged> {
        let listed: HashSet<&str> = list.iter().map(|s| s.id.as_str()).collect();
        let stale: Vec<String> = self
            .friends
            .values()
            .filter(|f| f.status.is_online() && !listed.contains(f.user_id.as_str()))
            .map(|f| f.user_id.clone())
            .collect();

        let mut events = Vec::new();
        for user_id in stale {
            let offline = FriendUpdate {
                user_id,
                status: Some(FriendStatus::Offline),
                ..FriendUpdate::default()
            };
            if let Some(ev) = self.apply_incremental(&offline) {
                events.push(ev);
            }
        }
        for entry in list {
            if let Some(ev) = self.apply_incremental(&entry.as_update()) {
                events.push(ev);
            }
        }
        debug!(
            listed = list.len(),
            changed = events.len(),
            tracked = self.friends.len(),
            "bulk friend list reconciled"
        );
        events
    }
}

fn diff(base: &FriendRecord, updated: &FriendRecord) -> ChangeFlags {
    ChangeFlags {
        status: base.status != updated.status,
        location: base.location != updated.location,
        status_description: base.status_description != updated.status_description,
        represented_group: base.represented_group != updated.represented_group,
        avatar: base.current_avatar_id != updated.current_avatar_id
            || base.current_avatar_thumbnail_image_url
                != updated.current_avatar_thumbnail_image_url
            || base.profile_pic_override != updated.profile_pic_override,
    }
}
