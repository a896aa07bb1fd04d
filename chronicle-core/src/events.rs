//! Event payloads flowing over the bus.
//!
//! Every event the core consumes or emits is one variant of the closed
//! [`Event`] union; subscribers match exhaustively on the variants they care
//! about. Payloads are immutable once published — handlers receive `&Event`
//! and must clone before keeping anything.
//!
//! The `location` / `world-name` / `player-joined` / `player-left` /
//! `game-closed` variants form the contract with the external log-tail
//! parser; `friend-update` / `friend-list` / `friend-added` /
//! `friend-removed` form the contract with the remote friend-list client.

use serde::{Deserialize, Serialize};

use crate::types::{FriendRecord, FriendStatus, TimestampMs};

// ---------------------------------------------------------------------------
// Log-parser contract
// ---------------------------------------------------------------------------

/// The local user changed world/instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEvent {
    /// World id, e.g. `wrld_...`.
    pub world_id: String,
    /// Instance id within the world.
    pub instance_id: String,
    /// Full location string (`worldId:instanceId~...`).
    pub location: String,
    /// World display name, when the parser already knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    /// When the transition was observed (epoch ms).
    pub timestamp: TimestampMs,
}

/// The display name of the current world became known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldNameEvent {
    /// Resolved display name.
    pub name: String,
    /// When the name was observed (epoch ms).
    pub timestamp: TimestampMs,
}

/// A player joined or left the local user's instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEvent {
    /// Display name from the log line.
    pub display_name: String,
    /// Platform user id, when the log line carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// When the join/leave was observed (epoch ms).
    pub timestamp: TimestampMs,
    /// Replayed during startup state reconstruction; excluded from journal
    /// appends to avoid duplicate historical entries.
    #[serde(default)]
    pub is_backfill: bool,
}

// ---------------------------------------------------------------------------
// Friend-list client contract
// ---------------------------------------------------------------------------

/// Partial presence update for one friend. `None` fields were not present in
/// the upstream payload and leave the tracked value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendUpdate {
    /// Platform user id. Updates without a resolvable id are dropped.
    pub user_id: String,
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// New availability status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FriendStatus>,
    /// New location string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// New world display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    /// New free-text status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,
    /// New represented group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub represented_group: Option<String>,
    /// New profile icon URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_icon: Option<String>,
    /// New profile picture override URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic_override: Option<String>,
    /// New avatar thumbnail URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_avatar_thumbnail_image_url: Option<String>,
    /// New avatar id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_avatar_id: Option<String>,
}

/// One entry of a bulk friend-list fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendSummary {
    /// Platform user id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Availability status.
    pub status: FriendStatus,
    /// Location string.
    pub location: String,
    /// Profile icon URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_icon: Option<String>,
    /// Profile picture override URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic_override: Option<String>,
    /// Avatar thumbnail URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_avatar_thumbnail_image_url: Option<String>,
}

impl FriendSummary {
    /// View this bulk entry as an incremental update, so the bulk-replace
    /// path reuses the exact diff/upsert logic of the incremental path.
    #[must_use]
    pub fn as_update(&self) -> FriendUpdate {
        FriendUpdate {
            user_id: self.id.clone(),
            display_name: Some(self.display_name.clone()),
            status: Some(self.status),
            location: Some(self.location.clone()),
            user_icon: self.user_icon.clone(),
            profile_pic_override: self.profile_pic_override.clone(),
            current_avatar_thumbnail_image_url: self.current_avatar_thumbnail_image_url.clone(),
            ..FriendUpdate::default()
        }
    }
}

/// A friendship was created or ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipEvent {
    /// Platform user id.
    pub user_id: String,
    /// Display name at the time of the change.
    pub display_name: String,
    /// When the change was observed (epoch ms).
    pub timestamp: TimestampMs,
}

// ---------------------------------------------------------------------------
// Internally-emitted events
// ---------------------------------------------------------------------------

/// Per-field change flags computed by the presence tracker's diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFlags {
    /// Availability status changed.
    pub status: bool,
    /// Location changed.
    pub location: bool,
    /// Free-text status line changed.
    pub status_description: bool,
    /// Represented group changed.
    pub represented_group: bool,
    /// Worn avatar (id, thumbnail, or override picture) changed.
    pub avatar: bool,
}

impl ChangeFlags {
    /// Whether any field changed. Presence emits no event when this is false.
    #[must_use]
    pub fn any(self) -> bool {
        self.status
            || self.location
            || self.status_description
            || self.represented_group
            || self.avatar
    }
}

/// Emitted by the presence tracker when a friend's state actually changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendStateChanged {
    /// The friend's record after the update.
    pub friend: FriendRecord,
    /// The record before the update; `None` for a friend seen for the first
    /// time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<FriendRecord>,
    /// Which fields changed.
    pub change: ChangeFlags,
}

/// Emitted by the encounter-queue drain after each durable counter upsert,
/// so the UI can live-update without polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsLiveUpdate {
    /// Platform user id.
    pub user_id: String,
    /// Display name at the time of the upsert.
    pub display_name: String,
    /// Encounter count after the upsert.
    pub encounter_count: i64,
    /// Accrued minutes after the upsert.
    pub time_spent_minutes: i64,
}

// ---------------------------------------------------------------------------
// The union
// ---------------------------------------------------------------------------

/// Every event that can flow over the bus.
#[derive(Debug, Clone)]
pub enum Event {
    /// The local user changed world/instance.
    Location(LocationEvent),
    /// The current world's display name became known.
    WorldName(WorldNameEvent),
    /// A player joined the local user's instance.
    PlayerJoined(PlayerEvent),
    /// A player left the local user's instance.
    PlayerLeft(PlayerEvent),
    /// The game process exited.
    GameClosed,
    /// Incremental presence update for one friend.
    FriendUpdate(FriendUpdate),
    /// Full friend list fetched from the remote API.
    FriendList(Vec<FriendSummary>),
    /// A friendship was created.
    FriendAdded(RelationshipEvent),
    /// A friendship was ended.
    FriendRemoved(RelationshipEvent),
    /// A tracked friend's state changed (presence tracker diff output).
    FriendStateChanged(Box<FriendStateChanged>),
    /// Durable counters changed for one user.
    StatsUpdated(StatsLiveUpdate),
}

/// Fieldless discriminant of [`Event`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`Event::Location`].
    Location,
    /// See [`Event::WorldName`].
    WorldName,
    /// See [`Event::PlayerJoined`].
    PlayerJoined,
    /// See [`Event::PlayerLeft`].
    PlayerLeft,
    /// See [`Event::GameClosed`].
    GameClosed,
    /// See [`Event::FriendUpdate`].
    FriendUpdate,
    /// See [`Event::FriendList`].
    FriendList,
    /// See [`Event::FriendAdded`].
    FriendAdded,
    /// See [`Event::FriendRemoved`].
    FriendRemoved,
    /// See [`Event::FriendStateChanged`].
    FriendStateChanged,
    /// See [`Event::StatsUpdated`].
    StatsUpdated,
}

impl Event {
    /// Discriminant of this event, for subscription routing.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Location(_) => EventKind::Location,
            Self::WorldName(_) => EventKind::WorldName,
            Self::PlayerJoined(_) => EventKind::PlayerJoined,
            Self::PlayerLeft(_) => EventKind::PlayerLeft,
            Self::GameClosed => EventKind::GameClosed,
            Self::FriendUpdate(_) => EventKind::FriendUpdate,
            Self::FriendList(_) => EventKind::FriendList,
            Self::FriendAdded(_) => EventKind::FriendAdded,
            Self::FriendRemoved(_) => EventKind::FriendRemoved,
            Self::FriendStateChanged(_) => EventKind::FriendStateChanged,
            Self::StatsUpdated(_) => EventKind::StatsUpdated,
        }
    }

    /// Stable wire-style name, used in publish logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self.kind() {
            EventKind::Location => "location",
            EventKind::WorldName => "world-name",
            EventKind::PlayerJoined => "player-joined",
            EventKind::PlayerLeft => "player-left",
            EventKind::GameClosed => "game-closed",
            EventKind::FriendUpdate => "friend-update",
            EventKind::FriendList => "friend-list",
            EventKind::FriendAdded => "friend-added",
            EventKind::FriendRemoved => "friend-removed",
            EventKind::FriendStateChanged => "friend-state-changed",
            EventKind::StatsUpdated => "stats-updated",
        }
    }
}
