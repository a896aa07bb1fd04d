//! Lifecycle coordinator — per-user storage provisioning and component
//! fan-out.
//!
//! The coordinator owns every component as an explicitly constructed,
//! injected instance (no ambient globals) and wires the bus subscriptions
//! once at construction. `initialize` binds the whole stack to one logged-in
//! user's storage directory; switching users shuts the previous stack down
//! first — two users' journals are never mixed in memory or on disk.
//!
//! Layering rule enforced here: journals depend only on the bus and on the
//! shared read-only session context, never on each other. Handlers that
//! produce follow-up events (presence) return them and the wiring publishes
//! after releasing the component lock, so no handler ever runs under
//! another component's lock.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::ChronicleConfig;
use crate::error::{ChronicleError, Result};
use crate::events::{Event, EventKind};
use crate::heartbeat::{CounterStore, EncounterQueue, HeartbeatEngine, LiveRoster};
use crate::journal::encounter::{EncounterJournal, EncounterKind};
use crate::journal::instance::InstanceJournal;
use crate::journal::social::{SocialJournal, SocialKind};
use crate::journal::{JournalStats, QueryFilter};
use crate::presence::FriendPresenceTracker;
use crate::session::SessionTracker;
use crate::snapshot::FriendSnapshotStore;
use crate::stats::StatAggregator;
use crate::types::{now_ms, FriendRecord};

/// Queryable journal domains, as named by the external query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Instance history journal.
    InstanceHistory,
    /// Player encounter journal.
    PlayerEncounters,
    /// Social activity journal.
    SocialActivity,
}

impl FromStr for Domain {
    type Err = ChronicleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "instance-history" | "instance_history" => Ok(Self::InstanceHistory),
            "player-encounters" | "player_encounters" => Ok(Self::PlayerEncounters),
            "social-activity" | "social_activity" => Ok(Self::SocialActivity),
            other => Err(ChronicleError::UnknownDomain(other.to_string())),
        }
    }
}

/// Per-journal counters in a status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStatus {
    /// Domain name.
    pub domain: String,
    /// Lines appended since initialize.
    pub appended: u64,
    /// Appends suppressed by dedup since initialize.
    pub deduped: u64,
}

impl DomainStatus {
    fn from_stats(domain: &str, stats: JournalStats) -> Self {
        Self {
            domain: domain.to_string(),
            appended: stats.appended,
            deduped: stats.deduped,
        }
    }
}

/// Snapshot of the coordinator's state for the external query surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Whether a user's stores are currently open.
    pub initialized: bool,
    /// The logged-in user the stores belong to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Whether the heartbeat engine is running.
    pub heartbeat_running: bool,
    /// Friends currently tracked in memory.
    pub friends_tracked: usize,
    /// Tracked friends currently online.
    pub friends_online: usize,
    /// The local user's current location, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_location: Option<String>,
    /// Per-journal counters.
    pub journals: Vec<DomainStatus>,
}

/// The chronicle service: every component, wired and lifecycle-managed.
pub struct ChronicleService {
    config: ChronicleConfig,
    data_root: PathBuf,
    bus: Arc<EventBus>,
    session: Arc<SessionTracker>,
    instance: Arc<Mutex<InstanceJournal>>,
    encounters: Arc<Mutex<EncounterJournal>>,
    social: Arc<Mutex<SocialJournal>>,
    snapshot: Arc<Mutex<FriendSnapshotStore>>,
    presence: Arc<Mutex<FriendPresenceTracker>>,
    counters: Arc<CounterStore>,
    heartbeat: HeartbeatEngine,
    aggregator: StatAggregator,
    current_user: Option<String>,
}

impl std::fmt::Debug for ChronicleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChronicleService")
            .field("data_root", &self.data_root)
            .field("current_user", &self.current_user)
            .finish_non_exhaustive()
    }
}

impl ChronicleService {
    /// Construct and wire the full component stack. Nothing touches disk
    /// until [`ChronicleService::initialize`].
    #[must_use]
    pub fn new(
        config: ChronicleConfig,
        data_root: impl Into<PathBuf>,
        roster: Arc<dyn LiveRoster>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let session = Arc::new(SessionTracker::new());
        let instance = Arc::new(Mutex::new(InstanceJournal::new(&config.journal)));
        let encounters = Arc::new(Mutex::new(EncounterJournal::new(&config.journal)));
        let social = Arc::new(Mutex::new(SocialJournal::new(&config.journal)));
        let snapshot = Arc::new(Mutex::new(FriendSnapshotStore::new()));
        let presence = Arc::new(Mutex::new(FriendPresenceTracker::new()));
        let counters = Arc::new(CounterStore::new(&config.persistence));

        let heartbeat = HeartbeatEngine::new(
            &config.heartbeat,
            Arc::clone(&counters),
            Arc::clone(&presence),
            roster,
            Arc::clone(&bus),
        );

        let aggregator = StatAggregator::new(
            Arc::clone(&encounters),
            Arc::clone(&social),
            Arc::clone(&instance),
            Arc::clone(&counters),
            config.stats.clone(),
        );

        let service = Self {
            config,
            data_root: data_root.into(),
            bus,
            session,
            instance,
            encounters,
            social,
            snapshot,
            presence,
            counters,
            heartbeat,
            aggregator,
            current_user: None,
        };
        service.wire();
        service
    }

    /// Register every component's bus subscriptions (once, at construction).
    fn wire(&self) {
        let queue = self.heartbeat.queue();

        {
            let session = Arc::clone(&self.session);
            let instance = Arc::clone(&self.instance);
            self.bus.subscribe(EventKind::Location, move |event| {
                if let Event::Location(ev) = event {
                    session.apply(ev);
                    instance.lock().on_location(ev);
                }
                Ok(())
            });
        }
        {
            let instance = Arc::clone(&self.instance);
            self.bus.subscribe(EventKind::WorldName, move |event| {
                if let Event::WorldName(ev) = event {
                    instance.lock().on_world_name(ev);
                }
                Ok(())
            });
        }
        {
            let instance = Arc::clone(&self.instance);
            self.bus.subscribe(EventKind::GameClosed, move |_| {
                instance.lock().on_game_closed(now_ms());
                Ok(())
            });
        }
        {
            let session = Arc::clone(&self.session);
            let encounters = Arc::clone(&self.encounters);
            let presence = Arc::clone(&self.presence);
            self.bus.subscribe(EventKind::PlayerJoined, move |event| {
                if let Event::PlayerJoined(ev) = event {
                    let snapshot = session.snapshot();
                    encounters.lock().record(ev, EncounterKind::Join, &snapshot);
                    if !ev.is_backfill {
                        if let Some(user_id) = &ev.user_id {
                            if presence.lock().contains(user_id) {
                                queue.push(user_id.clone());
                            }
                        }
                    }
                }
                Ok(())
            });
        }
        {
            let session = Arc::clone(&self.session);
            let encounters = Arc::clone(&self.encounters);
            self.bus.subscribe(EventKind::PlayerLeft, move |event| {
                if let Event::PlayerLeft(ev) = event {
                    let snapshot = session.snapshot();
                    encounters.lock().record(ev, EncounterKind::Leave, &snapshot);
                }
                Ok(())
            });
        }
        {
            let presence = Arc::clone(&self.presence);
            let bus = Arc::clone(&self.bus);
            self.bus.subscribe(EventKind::FriendUpdate, move |event| {
                if let Event::FriendUpdate(update) = event {
                    let changed = presence.lock().apply_incremental(update);
                    if let Some(changed) = changed {
                        bus.publish(&Event::FriendStateChanged(Box::new(changed)));
                    }
                }
                Ok(())
            });
        }
        {
            let presence = Arc::clone(&self.presence);
            let snapshot = Arc::clone(&self.snapshot);
            let bus = Arc::clone(&self.bus);
            self.bus.subscribe(EventKind::FriendList, move |event| {
                if let Event::FriendList(list) = event {
                    let changes = presence.lock().apply_bulk_replace(list);
                    for changed in changes {
                        bus.publish(&Event::FriendStateChanged(Box::new(changed)));
                    }
                    // Snapshot persists wholesale on every bulk update.
                    let store = snapshot.lock();
                    if store.is_initialized() {
                        let map = presence.lock().map_snapshot();
                        if let Err(e) = store.save(&map) {
                            warn!(error = %e, "friend snapshot write failed");
                        }
                    }
                }
                Ok(())
            });
        }
        {
            let social = Arc::clone(&self.social);
            self.bus.subscribe(EventKind::FriendAdded, move |event| {
                if let Event::FriendAdded(ev) = event {
                    social.lock().on_relationship(ev, SocialKind::Add);
                }
                Ok(())
            });
        }
        {
            let social = Arc::clone(&self.social);
            self.bus.subscribe(EventKind::FriendRemoved, move |event| {
                if let Event::FriendRemoved(ev) = event {
                    social.lock().on_relationship(ev, SocialKind::Remove);
                }
                Ok(())
            });
        }
        {
            let social = Arc::clone(&self.social);
            self.bus.subscribe(EventKind::FriendStateChanged, move |event| {
                if let Event::FriendStateChanged(changed) = event {
                    social.lock().on_state_changed(changed);
                }
                Ok(())
            });
        }
    }

    /// Bind the stack to `user_id`'s storage. A repeat call for the same
    /// user is a no-op; a call for a different user shuts the previous
    /// stack down first. Must be called from within a tokio runtime (the
    /// heartbeat spawns tasks).
    ///
    /// # Errors
    /// Propagates directory provisioning and per-component storage errors.
    pub fn initialize(&mut self, user_id: &str) -> Result<()> {
        if self.current_user.as_deref() == Some(user_id) {
            debug!(user = %user_id, "already initialized");
            return Ok(());
        }
        if self.current_user.is_some() {
            self.shutdown();
        }

        let dir = self.data_root.join(sanitize_user_dir(user_id));
        fs::create_dir_all(&dir)?;

        self.instance.lock().initialize(&dir)?;
        self.encounters.lock().initialize(&dir)?;
        self.social.lock().initialize(&dir)?;
        self.snapshot.lock().initialize(&dir);
        let preloaded = self.snapshot.lock().load();
        self.presence.lock().preload(preloaded);
        self.counters.initialize(dir.join("stats.db"))?;
        if self.config.heartbeat.enabled {
            self.heartbeat.start();
        }

        self.current_user = Some(user_id.to_string());
        info!(user = %user_id, dir = %dir.display(), "chronicle initialized");
        Ok(())
    }

    /// The current user's storage directory.
    ///
    /// # Errors
    /// Returns [`ChronicleError::NotInitialized`] before the first
    /// successful initialize — the signal other components use to decide
    /// whether lazy initialization is needed.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        let user = self
            .current_user
            .as_deref()
            .ok_or(ChronicleError::NotInitialized {
                component: "lifecycle",
            })?;
        Ok(self.data_root.join(sanitize_user_dir(user)))
    }

    /// Shut every component down and clear coordinator state. Every
    /// component's shutdown is independently safe when never initialized,
    /// so this is too.
    pub fn shutdown(&mut self) {
        // Heartbeat first: no pulse may write to a store being closed.
        self.heartbeat.stop();

        let snapshot = self.snapshot.lock();
        if snapshot.is_initialized() {
            let map = self.presence.lock().map_snapshot();
            if let Err(e) = snapshot.save(&map) {
                warn!(error = %e, "final friend snapshot write failed");
            }
        }
        drop(snapshot);

        self.instance.lock().shutdown(now_ms());
        self.encounters.lock().shutdown();
        self.social.lock().shutdown();
        self.snapshot.lock().shutdown();
        self.presence.lock().clear();
        self.session.clear();
        self.counters.shutdown();

        if self.current_user.take().is_some() {
            info!("chronicle shut down");
        }
    }

    /// The bus the host publishes parser/API events into.
    #[must_use]
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Handle for recording encounters directly (the log-watcher host path).
    #[must_use]
    pub fn encounter_queue(&self) -> Arc<EncounterQueue> {
        self.heartbeat.queue()
    }

    /// Read-side stat aggregation.
    #[must_use]
    pub fn stats(&self) -> &StatAggregator {
        &self.aggregator
    }

    /// Clones of every tracked friend record.
    #[must_use]
    pub fn get_full_friends_list(&self) -> Vec<FriendRecord> {
        self.presence.lock().all()
    }

    /// Recent entries of one journal domain as loosely-typed rows for the
    /// IPC surface.
    ///
    /// # Errors
    /// Propagates journal errors; unknown domains were rejected during
    /// [`Domain`] parsing.
    pub fn get_recent_entries(
        &self,
        domain: Domain,
        filter: &QueryFilter,
    ) -> Result<Vec<serde_json::Value>> {
        let to_value = |e| ChronicleError::Serialization(format!("{e}"));
        match domain {
            Domain::InstanceHistory => self
                .instance
                .lock()
                .query(filter)?
                .into_iter()
                .map(|r| serde_json::to_value(r).map_err(to_value))
                .collect(),
            Domain::PlayerEncounters => self
                .encounters
                .lock()
                .query(filter)?
                .into_iter()
                .map(|r| serde_json::to_value(r).map_err(to_value))
                .collect(),
            Domain::SocialActivity => self
                .social
                .lock()
                .query(filter)?
                .into_iter()
                .map(|r| serde_json::to_value(r).map_err(to_value))
                .collect(),
        }
    }

    /// Administrative bulk clear of one journal domain.
    ///
    /// # Errors
    /// Propagates journal errors.
    pub fn clear_domain(&self, domain: Domain) -> Result<()> {
        match domain {
            Domain::InstanceHistory => self.instance.lock().clear(),
            Domain::PlayerEncounters => self.encounters.lock().clear(),
            Domain::SocialActivity => self.social.lock().clear(),
        }
    }

    /// Current coordinator status for the external query surface.
    #[must_use]
    pub fn status(&self) -> StatusReport {
        let presence = self.presence.lock();
        StatusReport {
            initialized: self.current_user.is_some(),
            user_id: self.current_user.clone(),
            heartbeat_running: self.heartbeat.is_running(),
            friends_tracked: presence.len(),
            friends_online: presence.online_count(),
            current_location: self.session.snapshot().location,
            journals: vec![
                DomainStatus::from_stats(InstanceJournal::DOMAIN, self.instance.lock().stats()),
                DomainStatus::from_stats(EncounterJournal::DOMAIN, self.encounters.lock().stats()),
                DomainStatus::from_stats(SocialJournal::DOMAIN, self.social.lock().stats()),
            ],
        }
    }
}

/// User ids become directory names; strip anything path-hostile.
fn sanitize_user_dir(user_id: &str) -> String {
    user_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_parses_both_separators() {
        assert_eq!(
            "instance-history".parse::<Domain>().expect("parse"),
            Domain::InstanceHistory
        );
        assert_eq!(
            "player_encounters".parse::<Domain>().expect("parse"),
            Domain::PlayerEncounters
        );
        assert!(matches!(
            "nonsense".parse::<Domain>(),
            Err(ChronicleError::UnknownDomain(_))
        ));
    }

    #[test]
    fn sanitize_keeps_typical_user_ids() {
        assert_eq!(
            sanitize_user_dir("usr_8a2b-44c1.x"),
            "usr_8a2b-44c1.x".to_string()
        );
        assert_eq!(sanitize_user_dir("usr/../../etc"), "usr_.._.._etc");
    }
}
