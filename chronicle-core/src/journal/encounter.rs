//! Player-encounter journal — who shared an instance with the local user.
//!
//! Record ids are a deterministic function of
//! `(timestamp, user-id-or-display-name, type)`: not cryptographically
//! unique, but collision-free for realistic reordering/retry windows, which
//! is exactly what the dedup index needs. Backfill events replayed during
//! startup reconstruction are never appended.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::JournalConfig;
use crate::error::Result;
use crate::events::PlayerEvent;
use crate::journal::{JournalRecord, JournalStats, JournalStore, QueryFilter};
use crate::session::SessionState;
use crate::types::TimestampMs;

/// Whether a player entered or left the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncounterKind {
    /// Player entered the local user's instance.
    Join,
    /// Player left the local user's instance.
    Leave,
}

impl fmt::Display for EncounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join => write!(f, "join"),
            Self::Leave => write!(f, "leave"),
        }
    }
}

/// One join/leave observation, enriched with the current instance context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterRecord {
    /// Deterministic dedup identity.
    pub id: String,
    /// When the join/leave was observed (epoch ms).
    pub timestamp: TimestampMs,
    /// Join or leave.
    #[serde(rename = "type")]
    pub kind: EncounterKind,
    /// Player display name from the log line.
    pub display_name: String,
    /// Platform user id, when the log line carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// World the local user was in at the time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_id: Option<String>,
    /// Instance the local user was in at the time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Full location string at the time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl JournalRecord for EncounterRecord {
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
        if let Some(instance_id) = &filter.instance_id {
            if self.instance_id.as_deref() != Some(instance_id.as_str()) {
                return false;
            }
        }
        filter.window_contains(self.timestamp)
            && filter.matches_search(&[
                Some(self.display_name.as_str()),
                self.user_id.as_deref(),
                self.world_id.as_deref(),
                self.location.as_deref(),
            ])
    }
}

/// Deterministic encounter identity.
#[must_use]
pub fn encounter_id(timestamp: TimestampMs, user_key: &str, kind: EncounterKind) -> String {
    format!("{timestamp}:{user_key}:{kind}")
}

/// Append-only journal of player encounters.
#[derive(Debug)]
pub struct EncounterJournal {
    store: JournalStore,
}

impl EncounterJournal {
    /// Domain name, also the journal's file stem.
    pub const DOMAIN: &'static str = "player_encounters";

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

    /// Record a join/leave observation. Returns `true` when a line was
    /// actually written (backfill and duplicates are not).
    pub fn record(
        &mut self,
        event: &PlayerEvent,
        kind: EncounterKind,
        session: &SessionState,
    ) -> bool {
        if event.is_backfill {
            debug!(player = %event.display_name, %kind, "backfill event excluded");
            return false;
        }

        let user_key = event.user_id.as_deref().unwrap_or(&event.display_name);
        let record = EncounterRecord {
            id: encounter_id(event.timestamp, user_key, kind),
            timestamp: event.timestamp,
            kind,
            display_name: event.display_name.clone(),
            user_id: event.user_id.clone(),
            world_id: session.world_id.clone(),
            instance_id: session.instance_id.clone(),
            location: session.location.clone(),
        };
        self.store.append(&record)
    }

    /// Query encounters, newest first.
    ///
    /// # Errors
    /// Propagates storage errors from the underlying store.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<EncounterRecord>> {
        self.store.query(filter)
    }

    /// Every record for one user, oldest first — the shape the stat
    /// aggregator's join/leave pairing wants.
    ///
    /// # Errors
    /// Propagates storage errors from the underlying store.
    pub fn for_user(&self, user_id: &str) -> Result<Vec<EncounterRecord>> {
        let mut records: Vec<EncounterRecord> = self.store.read_all()?;
        records.retain(|r| r.user_id.as_deref() == Some(user_id));
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
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

    fn player(name: &str, user_id: Option<&str>, ts: TimestampMs) -> PlayerEvent {
        PlayerEvent {
            display_name: name.to_string(),
            user_id: user_id.map(str::to_string),
            timestamp: ts,
            is_backfill: false,
        }
    }

    fn session() -> SessionState {
        SessionState {
            location: Some("wrld_a:1".to_string()),
            world_id: Some("wrld_a".to_string()),
            instance_id: Some("1".to_string()),
        }
    }

    fn journal_in(dir: &Path) -> EncounterJournal {
        let mut journal = EncounterJournal::new(&JournalConfig::default());
        journal.initialize(dir).expect("initialize");
        journal
    }

    #[test]
    fn records_carry_session_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        assert!(journal.record(&player("Alice", Some("usr_1"), 1_000), EncounterKind::Join, &session()));

        let records = journal.query(&QueryFilter::default()).expect("query");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].world_id.as_deref(), Some("wrld_a"));
        assert_eq!(records[0].location.as_deref(), Some("wrld_a:1"));
        assert_eq!(records[0].id, "1000:usr_1:join");
    }

    #[test]
    fn replayed_event_is_deduplicated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());
        let ev = player("Alice", Some("usr_1"), 1_000);

        assert!(journal.record(&ev, EncounterKind::Join, &session()));
        assert!(!journal.record(&ev, EncounterKind::Join, &session()));

        let records = journal.query(&QueryFilter::default()).expect("query");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn join_and_leave_at_same_timestamp_are_distinct() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());
        let ev = player("Alice", Some("usr_1"), 1_000);

        assert!(journal.record(&ev, EncounterKind::Join, &session()));
        assert!(journal.record(&ev, EncounterKind::Leave, &session()));

        let records = journal.query(&QueryFilter::default()).expect("query");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn backfill_events_are_excluded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());
        let mut ev = player("Alice", Some("usr_1"), 1_000);
        ev.is_backfill = true;

        assert!(!journal.record(&ev, EncounterKind::Join, &session()));
        assert!(journal.query(&QueryFilter::default()).expect("query").is_empty());
    }

    #[test]
    fn display_name_keys_identity_when_user_id_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());

        assert!(journal.record(&player("Alice", None, 1_000), EncounterKind::Join, &session()));
        assert!(!journal.record(&player("Alice", None, 1_000), EncounterKind::Join, &session()));
    }

    #[test]
    fn for_user_returns_oldest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());
        journal.record(&player("Alice", Some("usr_1"), 3_000), EncounterKind::Leave, &session());
        journal.record(&player("Alice", Some("usr_1"), 1_000), EncounterKind::Join, &session());
        journal.record(&player("Bob", Some("usr_2"), 2_000), EncounterKind::Join, &session());

        let records = journal.for_user("usr_1").expect("for_user");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, 1_000);
        assert_eq!(records[1].timestamp, 3_000);
    }

    #[test]
    fn query_filters_by_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut journal = journal_in(dir.path());
        journal.record(&player("Alice", Some("usr_1"), 1_000), EncounterKind::Join, &session());
        journal.record(&player("Alice", Some("usr_1"), 2_000), EncounterKind::Leave, &session());

        let filter = QueryFilter {
            kind: Some("join".to_string()),
            ..QueryFilter::default()
        };
        let records = journal.query(&filter).expect("query");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EncounterKind::Join);
    }
}
