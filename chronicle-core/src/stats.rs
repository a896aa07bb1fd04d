//! Stat aggregation — merging journal history with the durable counters.
//!
//! Two authorities, one answer: the heartbeat store is the authority for
//! time spent, encounter count, and last-seen once it has a row for the
//! user; the encounter journal is the authority for historical detail
//! (first seen, common worlds) the counter store does not retain. The
//! journal-derived figures are computed first and then overlaid.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StatsConfig;
use crate::error::Result;
use crate::heartbeat::CounterStore;
use crate::journal::encounter::{EncounterJournal, EncounterKind};
use crate::journal::instance::InstanceJournal;
use crate::journal::social::SocialJournal;
use crate::journal::QueryFilter;
use crate::types::{now_ms, TimestampMs, UNKNOWN_WORLD};

/// One entry of a player's most-visited-worlds list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldVisit {
    /// World id.
    pub world_id: String,
    /// Joins observed in this world.
    pub count: u64,
}

/// Aggregated statistics for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    /// Platform user id.
    pub user_id: String,
    /// Most recent display name on record.
    pub display_name: String,
    /// Total encounters (durable counter when present, else journal joins).
    pub encounter_count: i64,
    /// Total time together in milliseconds (durable counter when present,
    /// else join/leave pairing).
    pub time_spent_ms: i64,
    /// Earliest journal record (epoch ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<TimestampMs>,
    /// Most recent sighting (epoch ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<TimestampMs>,
    /// Most-visited worlds, by join count.
    pub common_worlds: Vec<WorldVisit>,
}

/// Aggregated statistics for one world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldStats {
    /// World id.
    pub world_id: String,
    /// Best-known display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    /// Number of recorded visits.
    pub visit_count: u64,
    /// Total time spent across closed visits, in milliseconds.
    pub total_time_ms: i64,
    /// First recorded visit (epoch ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_visit: Option<TimestampMs>,
    /// Most recent recorded visit (epoch ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_visit: Option<TimestampMs>,
}

/// Composite ranking score for a friend.
///
/// `encounter_count × 10 + floor(time_spent_ms / 60000) + days_known × 5`.
#[must_use]
pub fn friend_score(encounter_count: i64, time_spent_ms: i64, days_known: i64) -> i64 {
    encounter_count * 10 + time_spent_ms / 60_000 + days_known * 5
}

/// Read-side aggregation over the journals and the counter store.
pub struct StatAggregator {
    encounters: Arc<Mutex<EncounterJournal>>,
    social: Arc<Mutex<SocialJournal>>,
    instances: Arc<Mutex<InstanceJournal>>,
    counters: Arc<CounterStore>,
    config: StatsConfig,
}

impl std::fmt::Debug for StatAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatAggregator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StatAggregator {
    /// Create an aggregator over the given stores.
    #[must_use]
    pub fn new(
        encounters: Arc<Mutex<EncounterJournal>>,
        social: Arc<Mutex<SocialJournal>>,
        instances: Arc<Mutex<InstanceJournal>>,
        counters: Arc<CounterStore>,
        config: StatsConfig,
    ) -> Self {
        Self {
            encounters,
            social,
            instances,
            counters,
            config,
        }
    }

    /// Aggregate statistics for one player.
    ///
    /// # Errors
    /// Propagates journal and counter-store errors (including
    /// not-initialized).
    pub fn get_player_stats(&self, user_id: &str) -> Result<PlayerStats> {
        let records = self.encounters.lock().for_user(user_id)?;

        let display_name = records
            .last()
            .map_or_else(|| user_id.to_string(), |r| r.display_name.clone());
        let first_seen = records.first().map(|r| r.timestamp);
        let mut last_seen = records.last().map(|r| r.timestamp);

        let mut encounter_count: i64 = 0;
        let mut time_spent_ms: i64 = 0;
        let mut world_counts: HashMap<String, u64> = HashMap::new();
        let cap_ms = self.config.session_cap_hours * 3_600_000;

        let mut pending_join: Option<TimestampMs> = None;
        for record in &records {
            match record.kind {
                EncounterKind::Join => {
                    encounter_count += 1;
                    if let Some(world_id) = &record.world_id {
                        *world_counts.entry(world_id.clone()).or_insert(0) += 1;
                    }
                    // An unmatched earlier join means a missed leave; its
                    // time is unrecoverable from the journal alone.
                    pending_join = Some(record.timestamp);
                }
                EncounterKind::Leave => {
                    if let Some(join_ts) = pending_join.take() {
                        let session = (record.timestamp - join_ts).clamp(0, cap_ms);
                        time_spent_ms += session;
                    }
                }
            }
        }

        let mut common_worlds: Vec<WorldVisit> = world_counts
            .into_iter()
            .map(|(world_id, count)| WorldVisit { world_id, count })
            .collect();
        common_worlds.sort_by(|a, b| b.count.cmp(&a.count).then(a.world_id.cmp(&b.world_id)));
        common_worlds.truncate(self.config.common_world_limit);

        // The durable heartbeat store is authoritative once it has data.
        if let Some(row) = self.counters.get(user_id)? {
            debug!(user = %user_id, "overlaying durable counters on journal stats");
            encounter_count = row.encounter_count;
            time_spent_ms = row.time_spent_minutes * 60_000;
            last_seen = Some(row.last_seen);
        }

        Ok(PlayerStats {
            user_id: user_id.to_string(),
            display_name,
            encounter_count,
            time_spent_ms,
            first_seen,
            last_seen,
            common_worlds,
        })
    }

    /// Aggregate statistics for one world from the instance journal.
    ///
    /// # Errors
    /// Propagates journal errors (including not-initialized).
    pub fn get_world_stats(&self, world_id: &str) -> Result<WorldStats> {
        let visits = self.instances.lock().query(&QueryFilter::default())?;
        let visits: Vec<_> = visits.into_iter().filter(|v| v.world_id == world_id).collect();

        let world_name = visits
            .iter()
            .find(|v| v.world_name != UNKNOWN_WORLD)
            .map(|v| v.world_name.clone());
        let total_time_ms = visits.iter().filter_map(|v| v.duration).sum();
        let first_visit = visits.iter().map(|v| v.timestamp).min();
        let last_visit = visits.iter().map(|v| v.timestamp).max();

        Ok(WorldStats {
            world_id: world_id.to_string(),
            world_name,
            visit_count: visits.len() as u64,
            total_time_ms,
            first_visit,
            last_visit,
        })
    }

    /// Composite ranking score for a friend: encounters, time together, and
    /// how long the friendship has existed (earliest `add` entry wins).
    ///
    /// # Errors
    /// Propagates journal and counter-store errors.
    pub fn compute_friend_score(&self, user_id: &str) -> Result<i64> {
        let stats = self.get_player_stats(user_id)?;
        let days_known = match self.social.lock().first_add_for(user_id)? {
            Some(added_at) => ((now_ms() - added_at) / 86_400_000).max(0),
            None => 0,
        };
        Ok(friend_score(
            stats.encounter_count,
            stats.time_spent_ms,
            days_known,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JournalConfig, PersistenceConfig};
    use crate::events::PlayerEvent;
    use crate::session::SessionState;

    fn session_in(world: &str) -> SessionState {
        SessionState {
            location: Some(format!("{world}:1")),
            world_id: Some(world.to_string()),
            instance_id: Some("1".to_string()),
        }
    }

    fn player(user_id: &str, ts: TimestampMs) -> PlayerEvent {
        PlayerEvent {
            display_name: "Alice".to_string(),
            user_id: Some(user_id.to_string()),
            timestamp: ts,
            is_backfill: false,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        aggregator: StatAggregator,
        encounters: Arc<Mutex<EncounterJournal>>,
        social: Arc<Mutex<SocialJournal>>,
        counters: Arc<CounterStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = JournalConfig::default();

        let mut encounters = EncounterJournal::new(&config);
        encounters.initialize(dir.path()).expect("encounters");
        let mut social = SocialJournal::new(&config);
        social.initialize(dir.path()).expect("social");
        let mut instances = InstanceJournal::new(&config);
        instances.initialize(dir.path()).expect("instances");

        let counters = Arc::new(CounterStore::new(&PersistenceConfig::default()));
        counters.initialize_in_memory().expect("counters");

        let encounters = Arc::new(Mutex::new(encounters));
        let social = Arc::new(Mutex::new(social));
        let instances = Arc::new(Mutex::new(instances));

        let aggregator = StatAggregator::new(
            Arc::clone(&encounters),
            Arc::clone(&social),
            Arc::clone(&instances),
            Arc::clone(&counters),
            StatsConfig::default(),
        );
        Fixture {
            _dir: dir,
            aggregator,
            encounters,
            social,
            counters,
        }
    }

    #[test]
    fn friend_score_formula() {
        // 5 encounters, 10 minutes together, known for 2 days.
        assert_eq!(friend_score(5, 600_000, 2), 70);
        assert_eq!(friend_score(0, 0, 0), 0);
        assert_eq!(friend_score(1, 59_999, 0), 10, "sub-minute time floors away");
    }

    #[test]
    fn journal_only_stats_pair_joins_with_leaves() {
        let f = fixture();
        {
            let mut j = f.encounters.lock();
            j.record(&player("usr_1", 1_000), EncounterKind::Join, &session_in("wrld_a"));
            j.record(&player("usr_1", 61_000), EncounterKind::Leave, &session_in("wrld_a"));
            j.record(&player("usr_1", 100_000), EncounterKind::Join, &session_in("wrld_b"));
            j.record(&player("usr_1", 160_000), EncounterKind::Leave, &session_in("wrld_b"));
        }

        let stats = f.aggregator.get_player_stats("usr_1").expect("stats");
        assert_eq!(stats.encounter_count, 2);
        assert_eq!(stats.time_spent_ms, 120_000);
        assert_eq!(stats.first_seen, Some(1_000));
        assert_eq!(stats.last_seen, Some(160_000));
        assert_eq!(stats.common_worlds.len(), 2);
    }

    #[test]
    fn sessions_longer_than_cap_contribute_the_cap() {
        let f = fixture();
        let cap_ms = StatsConfig::default().session_cap_hours * 3_600_000;
        {
            let mut j = f.encounters.lock();
            j.record(&player("usr_1", 0), EncounterKind::Join, &session_in("wrld_a"));
            j.record(
                &player("usr_1", cap_ms + 5_000_000),
                EncounterKind::Leave,
                &session_in("wrld_a"),
            );
        }

        let stats = f.aggregator.get_player_stats("usr_1").expect("stats");
        assert_eq!(stats.time_spent_ms, cap_ms);
    }

    #[test]
    fn durable_counters_overlay_journal_figures() {
        let f = fixture();
        {
            let mut j = f.encounters.lock();
            j.record(&player("usr_1", 1_000), EncounterKind::Join, &session_in("wrld_a"));
            j.record(&player("usr_1", 61_000), EncounterKind::Leave, &session_in("wrld_a"));
        }
        // Heartbeat has seen much more of this user than the journal did.
        for i in 0..7 {
            f.counters
                .accrue_minute("usr_1", "Alice", 200_000 + i)
                .expect("accrue");
        }
        f.counters.bump_encounter("usr_1", "Alice", 300_000).expect("bump");

        let stats = f.aggregator.get_player_stats("usr_1").expect("stats");
        assert_eq!(stats.encounter_count, 1, "durable encounter count wins");
        assert_eq!(stats.time_spent_ms, 7 * 60_000, "durable time wins");
        assert_eq!(stats.last_seen, Some(300_000), "durable last-seen wins");
        assert_eq!(stats.first_seen, Some(1_000), "journal keeps first-seen");
        assert_eq!(stats.common_worlds.len(), 1, "journal keeps common worlds");
    }

    #[test]
    fn common_worlds_rank_by_join_count() {
        let f = fixture();
        {
            let mut j = f.encounters.lock();
            j.record(&player("usr_1", 1_000), EncounterKind::Join, &session_in("wrld_a"));
            j.record(&player("usr_1", 2_000), EncounterKind::Join, &session_in("wrld_b"));
            j.record(&player("usr_1", 3_000), EncounterKind::Join, &session_in("wrld_b"));
        }

        let stats = f.aggregator.get_player_stats("usr_1").expect("stats");
        assert_eq!(stats.common_worlds[0].world_id, "wrld_b");
        assert_eq!(stats.common_worlds[0].count, 2);
    }

    #[test]
    fn score_uses_earliest_add_entry() {
        let f = fixture();
        let two_days_ago = now_ms() - 2 * 86_400_000 - 3_600_000;
        {
            let mut s = f.social.lock();
            s.on_relationship(
                &crate::events::RelationshipEvent {
                    user_id: "usr_1".into(),
                    display_name: "Alice".into(),
                    timestamp: two_days_ago,
                },
                crate::journal::social::SocialKind::Add,
            );
        }
        for _ in 0..10 {
            f.counters
                .accrue_minute("usr_1", "Alice", now_ms())
                .expect("accrue");
        }
        for _ in 0..5 {
            f.counters
                .bump_encounter("usr_1", "Alice", now_ms())
                .expect("bump");
        }

        // 5 encounters × 10 + 10 minutes + 2 days × 5 = 70.
        let score = f.aggregator.compute_friend_score("usr_1").expect("score");
        assert_eq!(score, 70);
    }

    #[test]
    fn unknown_user_scores_zero() {
        let f = fixture();
        let score = f.aggregator.compute_friend_score("usr_nobody").expect("score");
        assert_eq!(score, 0);
    }

    #[test]
    fn world_stats_aggregate_closed_visits() {
        let f = fixture();
        {
            let mut instances = f.aggregator.instances.lock();
            instances.on_location(&crate::events::LocationEvent {
                world_id: "wrld_a".into(),
                instance_id: "1".into(),
                location: "wrld_a:1".into(),
                world_name: Some("Alpha".into()),
                timestamp: 1_000,
            });
            instances.on_location(&crate::events::LocationEvent {
                world_id: "wrld_b".into(),
                instance_id: "1".into(),
                location: "wrld_b:1".into(),
                world_name: Some("Beta".into()),
                timestamp: 61_000,
            });
            instances.on_location(&crate::events::LocationEvent {
                world_id: "wrld_a".into(),
                instance_id: "2".into(),
                location: "wrld_a:2".into(),
                world_name: Some("Alpha".into()),
                timestamp: 121_000,
            });
            instances.on_game_closed(181_000);
        }

        let stats = f.aggregator.get_world_stats("wrld_a").expect("stats");
        assert_eq!(stats.visit_count, 2);
        assert_eq!(stats.world_name.as_deref(), Some("Alpha"));
        assert_eq!(stats.total_time_ms, 60_000 + 60_000);
        assert_eq!(stats.first_visit, Some(1_000));
        assert_eq!(stats.last_visit, Some(121_000));
    }
}
