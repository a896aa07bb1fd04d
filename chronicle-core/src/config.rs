//! Configuration for the chronicle core.
//!
//! Maps directly to `chronicle.toml`; every section has serde defaults so an
//! empty file (or no file) yields a working configuration.

use serde::{Deserialize, Serialize};

/// Top-level chronicle configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChronicleConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Journal store tuning.
    #[serde(default)]
    pub journal: JournalConfig,
    /// Heartbeat time-accrual settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Counter-store persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Stat aggregation tuning.
    #[serde(default)]
    pub stats: StatsConfig,
}

impl ChronicleConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`crate::ChronicleError::Config`] if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::ChronicleError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether history recording is enabled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

/// Journal store tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Bound on the recently-seen-identity dedup index, per journal.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// How many trailing bytes of a journal file are scanned on initialize
    /// to pre-populate the dedup index.
    #[serde(default = "default_tail_window_bytes")]
    pub tail_window_bytes: u64,
    /// Whether the one-time corrupted-line sweep runs on initialize for the
    /// deduplicated domains.
    #[serde(default = "default_true")]
    pub sweep_on_initialize: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: default_dedup_capacity(),
            tail_window_bytes: default_tail_window_bytes(),
            sweep_on_initialize: true,
        }
    }
}

/// Heartbeat time-accrual settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Whether the heartbeat engine starts on initialize.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between pulses. Each pulse accrues one minute of time for
    /// every co-located friend.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Delay before the early warm-up pulse after start.
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            warmup_secs: default_warmup_secs(),
        }
    }
}

/// Counter-store (SQLite) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable WAL journaling for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Stat aggregation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Sanity cap on a single join/leave-paired session, in hours. Sessions
    /// longer than this (a missed leave) contribute the cap instead.
    #[serde(default = "default_session_cap_hours")]
    pub session_cap_hours: i64,
    /// How many of a player's most-visited worlds to report.
    #[serde(default = "default_common_world_limit")]
    pub common_world_limit: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            session_cap_hours: default_session_cap_hours(),
            common_world_limit: default_common_world_limit(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_tail_window_bytes() -> u64 {
    256 * 1024
}

fn default_interval_secs() -> u64 {
    60
}

fn default_warmup_secs() -> u64 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_session_cap_hours() -> i64 {
    24
}

fn default_common_world_limit() -> usize {
    5
}
