//! Append-only line-delimited journal stores.
//!
//! One journal per activity domain, all built on the same pattern:
//!
//! - one `<storage_root>/<domain>.jsonl` file, exclusively owned by its
//!   journal instance (single-writer discipline — readers snapshot-read);
//! - a bounded recently-seen-identity index for idempotent appends, loaded
//!   from only the file's trailing byte window on initialize;
//! - a one-time corrupted-line sweep at initialize for the deduplicated
//!   domains, rewriting the file via an atomic temp-file-then-rename swap;
//! - tolerant full-file queries that skip malformed lines instead of
//!   failing the read.
//!
//! Write failures are logged and swallowed: the in-memory state stays
//! correct, the record may be lost, the append is not retried.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::JournalConfig;
use crate::error::{ChronicleError, Result};
use crate::types::TimestampMs;

pub mod encounter;
pub mod instance;
pub mod social;

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Filter applied by [`JournalStore::query`]. All criteria are conjunctive;
/// an empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Record type, e.g. `"join"` or `"online"`. Ignored by domains whose
    /// records carry no type.
    pub kind: Option<String>,
    /// Case-insensitive free-text search over name/world/detail fields.
    pub search: Option<String>,
    /// Inclusive lower bound on the record timestamp (epoch ms).
    pub from: Option<TimestampMs>,
    /// Inclusive upper bound on the record timestamp (epoch ms).
    pub to: Option<TimestampMs>,
    /// Exact instance id match.
    pub instance_id: Option<String>,
    /// Maximum number of records returned (newest first).
    pub limit: Option<usize>,
}

impl QueryFilter {
    /// Whether `timestamp` falls inside the filter's date range.
    #[must_use]
    pub fn window_contains(&self, timestamp: TimestampMs) -> bool {
        self.from.is_none_or(|from| timestamp >= from)
            && self.to.is_none_or(|to| timestamp <= to)
    }

    /// Whether the free-text term matches any of the given fields.
    /// A filter without a search term matches everything.
    #[must_use]
    pub fn matches_search(&self, fields: &[Option<&str>]) -> bool {
        let Some(term) = &self.search else {
            return true;
        };
        let needle = term.to_lowercase();
        fields
            .iter()
            .flatten()
            .any(|f| f.to_lowercase().contains(&needle))
    }
}

/// Implemented by per-domain record types so the shared store can dedup,
/// sort, and filter them.
pub trait JournalRecord: Serialize + DeserializeOwned {
    /// Deduplication identity. `None` for domains without record ids
    /// (instance history deduplicates at query time instead).
    fn record_id(&self) -> Option<&str>;

    /// Record timestamp (epoch ms), used for sorting and date filters.
    fn timestamp_ms(&self) -> TimestampMs;

    /// Whether the record passes the filter.
    fn matches(&self, filter: &QueryFilter) -> bool;
}

/// Counters exposed for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStats {
    /// Lines appended since initialize.
    pub appended: u64,
    /// Appends suppressed by the dedup index since initialize.
    pub deduped: u64,
    /// Current dedup index size.
    pub indexed: usize,
}

// ---------------------------------------------------------------------------
// The shared store
// ---------------------------------------------------------------------------

/// Shared storage machinery for one journal domain.
///
/// Uninitialized until [`JournalStore::initialize`] binds it to a storage
/// root; appends before that are dropped with a debug log (events can arrive
/// before login), queries fail with
/// [`ChronicleError::NotInitialized`].
pub struct JournalStore {
    domain: &'static str,
    path: Option<PathBuf>,
    seen: LruCache<String, ()>,
    dedup_enabled: bool,
    sweep_enabled: bool,
    tail_window_bytes: u64,
    appended: u64,
    deduped: u64,
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("indexed", &self.seen.len())
            .finish_non_exhaustive()
    }
}

impl JournalStore {
    /// Create an unbound store for `domain`.
    ///
    /// `dedup` enables the recently-seen-identity index; `sweep` enables the
    /// one-time corrupted-line pass on initialize (the two go together for
    /// the player/social domains).
    #[must_use]
    pub fn new(domain: &'static str, config: &JournalConfig, dedup: bool, sweep: bool) -> Self {
        let capacity = NonZeroUsize::new(config.dedup_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            domain,
            path: None,
            seen: LruCache::new(capacity),
            dedup_enabled: dedup,
            sweep_enabled: sweep && config.sweep_on_initialize,
            tail_window_bytes: config.tail_window_bytes,
            appended: 0,
            deduped: 0,
        }
    }

    /// Bind the store to `<storage_root>/<domain>.jsonl`, running the
    /// corrupted-line sweep and loading the dedup index where enabled.
    ///
    /// # Errors
    /// Returns an error if the sweep rewrite or the tail read fails.
    pub fn initialize(&mut self, storage_root: &Path) -> Result<()> {
        let path = storage_root.join(format!("{}.jsonl", self.domain));

        if self.sweep_enabled {
            let dropped = sweep_corrupted_lines(&path)?;
            if dropped > 0 {
                info!(domain = self.domain, dropped, "corrupted journal lines removed");
            }
        }

        self.seen.clear();
        self.appended = 0;
        self.deduped = 0;

        if self.dedup_enabled {
            let ids = load_recent_ids(&path, self.tail_window_bytes, self.seen.cap().get())?;
            for id in ids {
                self.seen.put(id, ());
            }
        }

        info!(
            domain = self.domain,
            path = %path.display(),
            indexed = self.seen.len(),
            "journal initialized"
        );
        self.path = Some(path);
        Ok(())
    }

    /// Whether [`JournalStore::initialize`] has run since the last shutdown.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.path.is_some()
    }

    /// Release the file binding and the dedup index. Safe to call when never
    /// initialized.
    pub fn shutdown(&mut self) {
        self.path = None;
        self.seen.clear();
    }

    /// Idempotent append. Returns `true` when a line was actually written;
    /// `false` when the record was deduplicated, dropped because the store
    /// is not initialized, or lost to a (logged, swallowed) write failure.
    pub fn append<R: JournalRecord>(&mut self, record: &R) -> bool {
        let Some(path) = &self.path else {
            debug!(domain = self.domain, "append before initialize, dropping");
            return false;
        };

        if self.dedup_enabled {
            if let Some(id) = record.record_id() {
                if self.seen.contains(id) {
                    self.deduped += 1;
                    debug!(domain = self.domain, id, "duplicate record suppressed");
                    return false;
                }
            }
        }

        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(domain = self.domain, error = %e, "record serialization failed");
                return false;
            }
        };

        if let Err(e) = append_line(path, &line) {
            warn!(domain = self.domain, error = %e, "journal append failed, record lost");
            return false;
        }

        if self.dedup_enabled {
            if let Some(id) = record.record_id() {
                self.seen.put(id.to_string(), ());
            }
        }
        self.appended += 1;
        true
    }

    /// Read every parseable record in file order, skipping malformed lines.
    ///
    /// # Errors
    /// Returns [`ChronicleError::NotInitialized`] before initialize, or an
    /// I/O error if the file cannot be opened.
    pub fn read_all<R: JournalRecord>(&self) -> Result<Vec<R>> {
        let path = self.path.as_ref().ok_or(ChronicleError::NotInitialized {
            component: "journal",
        })?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        let mut skipped = 0_usize;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<R>(&line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(domain = self.domain, skipped, "malformed journal lines skipped");
        }
        Ok(records)
    }

    /// Filtered query, newest first, optionally limited.
    ///
    /// # Errors
    /// Same as [`JournalStore::read_all`].
    pub fn query<R: JournalRecord>(&self, filter: &QueryFilter) -> Result<Vec<R>> {
        let mut records: Vec<R> = self.read_all()?;
        records.retain(|r| r.matches(filter));
        records.sort_by_key(|r| std::cmp::Reverse(r.timestamp_ms()));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Administrative bulk clear: truncate the file and the dedup index.
    ///
    /// # Errors
    /// Returns [`ChronicleError::NotInitialized`] before initialize, or an
    /// I/O error from the truncation.
    pub fn clear(&mut self) -> Result<()> {
        let path = self.path.as_ref().ok_or(ChronicleError::NotInitialized {
            component: "journal",
        })?;
        if path.exists() {
            fs::write(path, b"")?;
        }
        self.seen.clear();
        info!(domain = self.domain, "journal cleared");
        Ok(())
    }

    /// Current counters for status reporting.
    #[must_use]
    pub fn stats(&self) -> JournalStats {
        JournalStats {
            appended: self.appended,
            deduped: self.deduped,
            indexed: self.seen.len(),
        }
    }

    /// Domain name this store was created for.
    #[must_use]
    pub fn domain(&self) -> &'static str {
        self.domain
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())
}

/// One-time startup pass removing lines that can never parse again: not a
/// JSON object, no usable `id`, or the `displayName: "undefined"` pattern a
/// historical serializer bug produced. Valid lines are preserved byte-exact;
/// the rewrite swaps a temp file into place so a crash mid-sweep never
/// truncates the journal.
fn sweep_corrupted_lines(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }

    let reader = BufReader::new(File::open(path)?);
    let mut kept: Vec<String> = Vec::new();
    let mut dropped = 0_usize;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            dropped += 1;
            continue;
        }
        if line_is_well_formed(&line) {
            kept.push(line);
        } else {
            dropped += 1;
        }
    }

    if dropped == 0 {
        return Ok(0);
    }

    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut out = File::create(&tmp)?;
        for line in &kept {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        out.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(dropped)
}

fn line_is_well_formed(line: &str) -> bool {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) else {
        return false;
    };
    let has_id = matches!(map.get("id"), Some(Value::String(id)) if !id.is_empty());
    let bad_name = matches!(
        map.get("displayName"),
        Some(Value::String(name)) if name == "undefined" || name.is_empty()
    );
    has_id && !bad_name
}

/// Collect the ids of the newest records by reading only the file's trailing
/// `window` bytes. The first line of the window is discarded when the read
/// started mid-file (it is almost certainly truncated).
fn load_recent_ids(path: &Path, window: u64, cap: usize) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(window);
    file.seek(SeekFrom::Start(start))?;

    let mut bytes = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut bytes)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut lines: Vec<&str> = text.lines().collect();
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }

    let mut ids = Vec::new();
    for line in lines {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) {
            if let Some(Value::String(id)) = map.get("id") {
                ids.push(id.clone());
            }
        }
    }
    if ids.len() > cap {
        ids.drain(..ids.len() - cap);
    }
    Ok(ids)
}
