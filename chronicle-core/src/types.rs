//! Core type definitions shared across the chronicle components.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Epoch-millisecond timestamp, matching the on-disk journal line format.
pub type TimestampMs = i64;

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn now_ms() -> TimestampMs {
    Utc::now().timestamp_millis()
}

/// Location string recorded for friends who are not online.
pub const OFFLINE_LOCATION: &str = "offline";

/// World display name used for sessions opened before the name is known.
/// A later `world-name` event replaces it via re-append.
pub const UNKNOWN_WORLD: &str = "Unknown World";

// ---------------------------------------------------------------------------
// Friend presence
// ---------------------------------------------------------------------------

/// Friend availability status as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FriendStatus {
    /// Not connected.
    #[default]
    #[serde(rename = "offline")]
    Offline,
    /// Online and open to anyone.
    #[serde(rename = "active")]
    Active,
    /// Online, invites auto-accepted.
    #[serde(rename = "join me")]
    JoinMe,
    /// Online, invites on request.
    #[serde(rename = "ask me")]
    AskMe,
    /// Online but unavailable.
    #[serde(rename = "busy")]
    Busy,
}

impl FriendStatus {
    /// Whether this status counts as being online.
    #[must_use]
    pub fn is_online(self) -> bool {
        self != Self::Offline
    }
}

impl fmt::Display for FriendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Active => "active",
            Self::JoinMe => "join me",
            Self::AskMe => "ask me",
            Self::Busy => "busy",
        };
        write!(f, "{s}")
    }
}

/// Authoritative presence record for one friend.
///
/// Owned exclusively by the presence tracker; every other component receives
/// clones via events, never references into the tracker's map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRecord {
    /// Platform user id.
    pub user_id: String,
    /// Display name at last update.
    pub display_name: String,
    /// Availability status.
    pub status: FriendStatus,
    /// Current location string (`"offline"` when not online).
    pub location: String,
    /// Display name of the current world, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    /// When this record last changed (epoch ms).
    pub last_updated: TimestampMs,
    /// Profile icon URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_icon: Option<String>,
    /// Explicit profile picture override URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic_override: Option<String>,
    /// Thumbnail of the currently worn avatar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_avatar_thumbnail_image_url: Option<String>,
    /// Id of the currently worn avatar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_avatar_id: Option<String>,
    /// Free-text status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,
    /// Group the friend currently represents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub represented_group: Option<String>,
}

impl FriendRecord {
    /// A fresh record defaulted to offline, used when a partial update
    /// arrives for a friend we have never seen.
    #[must_use]
    pub fn offline(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            status: FriendStatus::Offline,
            location: OFFLINE_LOCATION.to_string(),
            world_name: None,
            last_updated: now_ms(),
            user_icon: None,
            profile_pic_override: None,
            current_avatar_thumbnail_image_url: None,
            current_avatar_id: None,
            status_description: None,
            represented_group: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Durable counters
// ---------------------------------------------------------------------------

/// One durable counter row from the heartbeat store.
///
/// Counters are monotonically non-decreasing; a row is created on first
/// encounter or first heartbeat pulse and never deleted except by the
/// administrative bulk clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterRow {
    /// Platform user id (primary key).
    pub user_id: String,
    /// Display name at last write.
    pub display_name: String,
    /// Minutes accrued by the heartbeat pulse while co-located.
    pub time_spent_minutes: i64,
    /// Physical joins observed for this user.
    pub encounter_count: i64,
    /// Last time the user was seen (epoch ms).
    pub last_seen: TimestampMs,
    /// Last heartbeat pulse that included this user (epoch ms).
    pub last_heartbeat: TimestampMs,
    /// Row creation time (epoch ms).
    pub created_at: TimestampMs,
}
