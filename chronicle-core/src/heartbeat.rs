//! Heartbeat time-accrual engine and its durable counter store.
//!
//! Time spent with friends is accrued per-pulse rather than computed as
//! `leave - join`: every fixed-interval tick (plus one early warm-up pulse)
//! increments the durable counters of the friends currently co-located with
//! the local user. A crash before a `leave` event is observed therefore
//! loses at most one pulse interval, never the whole session.
//!
//! Encounters are counted through a single-flight queue: callers push user
//! ids onto an unbounded in-memory channel and a drain task upserts one row
//! at a time, serialized so storage writes never contend. A failing id is
//! logged and dropped — one bad id cannot stall the queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::{HeartbeatConfig, PersistenceConfig};
use crate::error::{ChronicleError, Result};
use crate::events::{Event, StatsLiveUpdate};
use crate::presence::FriendPresenceTracker;
use crate::types::{now_ms, CounterRow, TimestampMs};

// ---------------------------------------------------------------------------
// Durable counter store
// ---------------------------------------------------------------------------

/// SQLite-backed store of per-user durable counters.
///
/// One row per user; both counters are monotonically non-decreasing and each
/// increment is a single atomic upsert.
pub struct CounterStore {
    conn: Mutex<Option<Connection>>,
    config: PersistenceConfig,
    db_path: Mutex<Option<PathBuf>>,
}

impl std::fmt::Debug for CounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterStore")
            .field("db_path", &*self.db_path.lock())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS play_counters (
    user_id            TEXT PRIMARY KEY,
    display_name       TEXT NOT NULL,
    time_spent_minutes INTEGER NOT NULL DEFAULT 0,
    encounter_count    INTEGER NOT NULL DEFAULT 0,
    last_seen          INTEGER NOT NULL DEFAULT 0,
    last_heartbeat     INTEGER NOT NULL DEFAULT 0,
    created_at         INTEGER NOT NULL
);";

impl CounterStore {
    /// Create an unbound store. All operations fail with
    /// [`ChronicleError::NotInitialized`] until [`CounterStore::initialize`]
    /// opens a database.
    #[must_use]
    pub fn new(config: &PersistenceConfig) -> Self {
        Self {
            conn: Mutex::new(None),
            config: config.clone(),
            db_path: Mutex::new(None),
        }
    }

    /// Open (or create) the database at `path` and install the schema.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn initialize<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if self.config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};",
            self.config.busy_timeout_ms
        ))?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = self.config.wal_mode, "counter store opened");
        *self.conn.lock() = Some(conn);
        *self.db_path.lock() = Some(db_path);
        Ok(())
    }

    /// Open an in-memory database (tests).
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn initialize_in_memory(&self) -> Result<()> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        *self.conn.lock() = Some(conn);
        *self.db_path.lock() = Some(PathBuf::from(":memory:"));
        Ok(())
    }

    /// Whether a database is currently open.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Close the database. Safe to call when never initialized.
    pub fn shutdown(&self) {
        *self.conn.lock() = None;
        *self.db_path.lock() = None;
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(ChronicleError::NotInitialized {
            component: "counter-store",
        })?;
        f(conn)
    }

    /// Accrue one time-unit for `user_id` from a heartbeat pulse, refreshing
    /// `last_seen` and `last_heartbeat`. Creates the row on first contact.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn accrue_minute(
        &self,
        user_id: &str,
        display_name: &str,
        now: TimestampMs,
    ) -> Result<CounterRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO play_counters
                     (user_id, display_name, time_spent_minutes, encounter_count,
                      last_seen, last_heartbeat, created_at)
                 VALUES (?1, ?2, 1, 0, ?3, ?3, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     time_spent_minutes = play_counters.time_spent_minutes + 1,
                     last_seen = excluded.last_seen,
                     last_heartbeat = excluded.last_heartbeat",
                params![user_id, display_name, now],
            )?;
            Self::fetch_row(conn, user_id)?.ok_or(ChronicleError::Database(
                rusqlite::Error::QueryReturnedNoRows,
            ))
        })
    }

    /// Count one physical join for `user_id`, refreshing `last_seen`.
    /// Creates the row on first contact.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn bump_encounter(
        &self,
        user_id: &str,
        display_name: &str,
        now: TimestampMs,
    ) -> Result<CounterRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO play_counters
                     (user_id, display_name, time_spent_minutes, encounter_count,
                      last_seen, last_heartbeat, created_at)
                 VALUES (?1, ?2, 0, 1, ?3, 0, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     encounter_count = play_counters.encounter_count + 1,
                     last_seen = excluded.last_seen",
                params![user_id, display_name, now],
            )?;
            Self::fetch_row(conn, user_id)?.ok_or(ChronicleError::Database(
                rusqlite::Error::QueryReturnedNoRows,
            ))
        })
    }

    /// Fetch one user's row, if it exists.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn get(&self, user_id: &str) -> Result<Option<CounterRow>> {
        self.with_conn(|conn| Self::fetch_row(conn, user_id))
    }

    /// Every row, unordered.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn all(&self) -> Result<Vec<CounterRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT user_id, display_name, time_spent_minutes, encounter_count,
                        last_seen, last_heartbeat, created_at
                 FROM play_counters",
            )?;
            let rows = stmt.query_map([], Self::row_from_sql)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Administrative bulk clear. Returns how many rows were removed.
    ///
    /// # Errors
    /// Returns [`ChronicleError::Database`] on SQLite failures.
    pub fn clear(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM play_counters", [])?;
            info!(removed, "counter store cleared");
            Ok(removed)
        })
    }

    fn fetch_row(conn: &Connection, user_id: &str) -> Result<Option<CounterRow>> {
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, display_name, time_spent_minutes, encounter_count,
                    last_seen, last_heartbeat, created_at
             FROM play_counters WHERE user_id = ?1",
        )?;
        Ok(stmt
            .query_row(params![user_id], Self::row_from_sql)
            .optional()?)
    }

    fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<CounterRow> {
        Ok(CounterRow {
            user_id: row.get(0)?,
            display_name: row.get(1)?,
            time_spent_minutes: row.get(2)?,
            encounter_count: row.get(3)?,
            last_seen: row.get(4)?,
            last_heartbeat: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Live roster seam
// ---------------------------------------------------------------------------

/// Who is physically in the local user's instance right now.
///
/// The external log watcher owns this roster; the heartbeat engine only
/// reads it, then filters to ids the presence tracker knows.
pub trait LiveRoster: Send + Sync {
    /// User ids currently co-located with the local user.
    fn colocated_user_ids(&self) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// Encounter queue
// ---------------------------------------------------------------------------

/// Cloneable handle for pushing encounter ids into the single-flight queue.
///
/// Pushes while the engine is stopped are dropped with a debug log —
/// encounters are best-effort, never a failure surface for the caller.
#[derive(Default)]
pub struct EncounterQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl std::fmt::Debug for EncounterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncounterQueue")
            .field("running", &self.tx.lock().is_some())
            .finish()
    }
}

impl EncounterQueue {
    /// Enqueue one encounter for `user_id`.
    pub fn push(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        match &*self.tx.lock() {
            Some(tx) => {
                if tx.send(user_id).is_err() {
                    debug!("encounter queue closed, id dropped");
                }
            }
            None => debug!(user = %user_id, "encounter queue not running, id dropped"),
        }
    }
}

// ---------------------------------------------------------------------------
// The engine
// ---------------------------------------------------------------------------

/// Heartbeat time-accrual engine: `stopped → running` on start, with one
/// repeating timer task and one queue-drain task while running.
pub struct HeartbeatEngine {
    store: Arc<CounterStore>,
    presence: Arc<Mutex<FriendPresenceTracker>>,
    roster: Arc<dyn LiveRoster>,
    bus: Arc<EventBus>,
    interval: Duration,
    warmup: Duration,
    running: Arc<AtomicBool>,
    queue: Arc<EncounterQueue>,
    timer_task: Option<JoinHandle<()>>,
    drain_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HeartbeatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatEngine")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl HeartbeatEngine {
    /// Create a stopped engine.
    #[must_use]
    pub fn new(
        config: &HeartbeatConfig,
        store: Arc<CounterStore>,
        presence: Arc<Mutex<FriendPresenceTracker>>,
        roster: Arc<dyn LiveRoster>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            presence,
            roster,
            bus,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            warmup: Duration::from_secs(config.warmup_secs),
            running: Arc::new(AtomicBool::new(false)),
            queue: Arc::new(EncounterQueue::default()),
            timer_task: None,
            drain_task: None,
        }
    }

    /// Handle for enqueueing encounters; usable from bus handlers while the
    /// engine itself stays behind the coordinator.
    #[must_use]
    pub fn queue(&self) -> Arc<EncounterQueue> {
        Arc::clone(&self.queue)
    }

    /// Whether the engine is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the timer and drain tasks. No-op when already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.timer_task.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.queue.tx.lock() = Some(tx);

        let store = Arc::clone(&self.store);
        let presence = Arc::clone(&self.presence);
        let bus = Arc::clone(&self.bus);
        self.drain_task = Some(tokio::spawn(async move {
            while let Some(user_id) = rx.recv().await {
                drain_one(&store, &presence, &bus, &user_id);
            }
        }));

        let store = Arc::clone(&self.store);
        let presence = Arc::clone(&self.presence);
        let roster = Arc::clone(&self.roster);
        let running = Arc::clone(&self.running);
        let warmup = self.warmup;
        let interval = self.interval;
        self.timer_task = Some(tokio::spawn(async move {
            tokio::time::sleep(warmup).await;
            if !running.load(Ordering::SeqCst) {
                return;
            }
            run_pulse(&store, &presence, roster.as_ref());

            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the immediate first tick; the warm-up covered it
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                run_pulse(&store, &presence, roster.as_ref());
            }
        }));

        info!(interval = ?self.interval, warmup = ?self.warmup, "heartbeat started");
    }

    /// Stop the engine. The timer is cancelled before this returns — no
    /// further pulses fire afterwards. The drain may finish the item it is
    /// currently processing; everything still queued is discarded.
    /// Safe to call when never started.
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        *self.queue.tx.lock() = None;
        if let Some(task) = self.timer_task.take() {
            task.abort();
        }
        if let Some(task) = self.drain_task.take() {
            task.abort();
        }
        if was_running {
            info!("heartbeat stopped");
        }
    }

    /// Run one pulse immediately (the warm-up path, also used by tests).
    /// Returns how many users accrued time.
    pub fn pulse_once(&self) -> usize {
        run_pulse(&self.store, &self.presence, self.roster.as_ref())
    }
}

impl Drop for HeartbeatEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One heartbeat pulse: accrue a time-unit for every co-located friend.
///
/// The roster is the log watcher's truth about who is physically present;
/// only ids the presence tracker knows (actual friends) accrue time.
fn run_pulse(
    store: &CounterStore,
    presence: &Mutex<FriendPresenceTracker>,
    roster: &dyn LiveRoster,
) -> usize {
    let now = now_ms();
    let mut accrued = 0_usize;
    for user_id in roster.colocated_user_ids() {
        let friend = presence.lock().get(&user_id).cloned();
        let Some(friend) = friend else { continue };
        match store.accrue_minute(&friend.user_id, &friend.display_name, now) {
            Ok(_) => accrued += 1,
            Err(e) => warn!(user = %user_id, error = %e, "heartbeat accrual failed"),
        }
    }
    debug!(accrued, "heartbeat pulse");
    accrued
}

/// Process one queued encounter: upsert the row, then announce the new
/// counter values. Failures drop the id — it is not retried.
fn drain_one(
    store: &CounterStore,
    presence: &Mutex<FriendPresenceTracker>,
    bus: &EventBus,
    user_id: &str,
) {
    let display_name = presence
        .lock()
        .get(user_id)
        .map(|f| f.display_name.clone())
        .unwrap_or_else(|| user_id.to_string());

    match store.bump_encounter(user_id, &display_name, now_ms()) {
        Ok(row) => {
            bus.publish(&Event::StatsUpdated(StatsLiveUpdate {
                user_id: row.user_id,
                display_name: row.display_name,
                encounter_count: row.encounter_count,
                time_spent_minutes: row.time_spent_minutes,
            }));
        }
        Err(e) => warn!(user = %user_id, error = %e, "encounter upsert failed, id dropped"),
    }
}
