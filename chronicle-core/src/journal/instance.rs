//! Instance-history journal — where the local user has been, and for how
//! long.
//!
//! Session closing is a two-state machine per journal instance: either no
//! record is open, or exactly one is. A `location` event with a different
//! location string closes the open record (computing its duration) before
//! opening the new one; an identical location string is a no-op, which
//! absorbs log-parser replay noise. A `game-closed` event and shutdown both
//! close unconditionally.
//!
//! Records are re-appended on every update (world-name backfill, close)
//! rather than rewritten in place; readers dedupe on `(timestamp, location)`
//! and keep the best version of each session.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::JournalConfig;
use crate::error::Result;
use crate::events::{LocationEvent, WorldNameEvent};
use crate::journal::{JournalRecord, JournalStats, JournalStore, QueryFilter};
use crate::types::{TimestampMs, UNKNOWN_WORLD};

/// One visit to a world instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    /// When the instance was entered (epoch ms).
    pub timestamp: TimestampMs,
    /// World id.
    pub world_id: String,
    /// Instance id within the world.
    pub instance_id: String,
    /// Full location string; together with `timestamp` it identifies the
    /// session across re-appends.
    pub location: String,
    /// World display name, or the unknown-world sentinel until backfilled.
    pub world_name: String,
    /// When the instance was left; absent while the record is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leave_timestamp: Option<TimestampMs>,
    /// `leave_timestamp - timestamp`, in ms; absent while open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl InstanceRecord {
    /// Preference rank used by query-time dedup: a closed record beats an
    /// open one, a resolved world name beats the sentinel.
    fn rank(&self) -> u8 {
        let closed = u8::from(self.leave_timestamp.is_some());
        let named = u8::from(self.world_name != UNKNOWN_WORLD);
        closed * 2 + named
    }
}

impl JournalRecord for InstanceRecord {
    fn record_id(&self) -> Option<&str> {
        None
    }

    fn timestamp_ms(&self) -> TimestampMs {
        self.timestamp
    }

    fn matches(&self, filter: &QueryFilter) -> bool {
        if let Some(instance_id) = &filter.instance_id {
            if &self.instance_id != instance_id {
                return false;
            }
        }
        filter.window_contains(self.timestamp)
            && filter.matches_search(&[
                Some(self.world_name.as_str()),
                Some(self.location.as_str()),
                Some(self.world_id.as_str()),
            ])
    }
}

/// Append-only journal of instance visits with open-record tracking.
#[derive(Debug)]
pub struct InstanceJournal {
    store: JournalStore,
    open_record: Option<InstanceRecord>,
}

impl InstanceJournal {
    /// Domain name, also the journal's file stem.
    pub const DOMAIN: &'static str = "instance_history";

    /// Create an unbound journal. No dedup index and no sweep: instance
    /// records carry no id and duplicates are reconciled at query time.
    #[must_use]
    pub fn new(config: &JournalConfig) -> Self {
        Self {
            store: JournalStore::new(Self::DOMAIN, config, false, false),
            open_record: None,
        }
    }

    /// Bind to a per-user storage root.
    ///
    /// # Errors
    /// Propagates storage errors from the underlying store.
    pub fn initialize(&mut self, storage_root: &Path) -> Result<()> {
        self.open_record = None;
        self.store.initialize(storage_root)
    }

    /// Handle a `location` event.
    pub fn on_location(&mut self, event: &LocationEvent) {
        let same_location = self
            .open_record
            .as_ref()
            .is_some_and(|open| open.location == event.location);
        if same_location {
            debug!(location = %event.location, "repeated location, ignoring");
            return;
        }
        self.close_open(event.timestamp);

        let record = InstanceRecord {
            timestamp: event.timestamp,
            world_id: event.world_id.clone(),
            instance_id: event.instance_id.clone(),
            location: event.location.clone(),
            world_name: event
                .world_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_WORLD.to_string()),
            leave_timestamp: None,
            duration: None,
        };
        self.store.append(&record);
        self.open_record = Some(record);
    }

    /// Handle a `world-name` event: backfill the open record's sentinel name
    /// and re-append it. The duplicate is reconciled at query time.
    pub fn on_world_name(&mut self, event: &WorldNameEvent) {
        let Some(open) = self.open_record.as_mut() else {
            return;
        };
        if open.world_name != UNKNOWN_WORLD || event.name.is_empty() {
            return;
        }
        open.world_name = event.name.clone();
        let updated = open.clone();
        self.store.append(&updated);
    }

    /// Handle a `game-closed` event: unconditionally close any open record.
    pub fn on_game_closed(&mut self, now: TimestampMs) {
        self.close_open(now);
    }

    /// Close any open record with `now` as the leave time, then release the
    /// file binding. Safe to call when never initialized.
    pub fn shutdown(&mut self, now: TimestampMs) {
        self.close_open(now);
        self.store.shutdown();
    }

    fn close_open(&mut self, now: TimestampMs) {
        if let Some(mut open) = self.open_record.take() {
            open.leave_timestamp = Some(now);
            open.duration = Some((now - open.timestamp).max(0));
            self.store.append(&open);
        }
    }

    /// Location string of the currently open record, if any.
    #[must_use]
    pub fn open_location(&self) -> Option<&str> {
        self.open_record.as_ref().map(|r| r.location.as_str())
    }

    /// Query visits, newest first. Re-appended versions of the same session
    /// are collapsed to the best one before filtering.
    ///
    /// # Errors
    /// Propagates storage errors from the underlying store.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<InstanceRecord>> {
        let all: Vec<InstanceRecord> = self.store.read_all()?;
        let mut records = dedupe_sessions(all);
        records.retain(|r| r.matches(filter));
        records.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
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
        self.open_record = None;
        self.store.clear()
    }
}

/// Collapse re-appended versions of the same `(timestamp, location)` session,
/// keeping the highest-ranked version. Later lines win ties, so the freshest
/// append of equal rank is the one reported.
fn dedupe_sessions(records: Vec<InstanceRecord>) -> Vec<InstanceRecord> {
    let mut best: HashMap<(TimestampMs, String), InstanceRecord> = HashMap::new();
    for record in records {
        let key = (record.timestamp, record.location.clone());
        match best.get(&key) {
            Some(existing) if record.rank() < existing.rank() => {}
            _ => {
                best.insert(key, record);
            }
        }
    }
    best.into_values().collect()
}
