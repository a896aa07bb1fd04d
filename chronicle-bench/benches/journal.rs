//! Chronicle benchmark suite.
//!
//! Hot paths measured:
//!   journal_append_deduped ......... one serialized line + index check
//!   journal_query_10k .............. full-file parse, filter, sort
//!   presence_incremental_diff ...... per-update field diff
//!   presence_bulk_replace_500 ...... full reconcile of a large friend list

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chronicle_core::config::JournalConfig;
use chronicle_core::events::{FriendSummary, FriendUpdate, PlayerEvent};
use chronicle_core::journal::encounter::{EncounterJournal, EncounterKind};
use chronicle_core::journal::QueryFilter;
use chronicle_core::presence::FriendPresenceTracker;
use chronicle_core::session::SessionState;
use chronicle_core::types::FriendStatus;

fn player(i: u64) -> PlayerEvent {
    PlayerEvent {
        display_name: format!("Player{i}"),
        user_id: Some(format!("usr_{i}")),
        timestamp: i as i64 * 1_000,
        is_backfill: false,
    }
}

fn summary(i: u64) -> FriendSummary {
    FriendSummary {
        id: format!("usr_{i}"),
        display_name: format!("Player{i}"),
        status: FriendStatus::Active,
        location: format!("wrld_{}:1", i % 16),
        user_icon: None,
        profile_pic_override: None,
        current_avatar_thumbnail_image_url: None,
    }
}

fn bench_journal_append(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut journal = EncounterJournal::new(&JournalConfig::default());
    journal.initialize(dir.path()).expect("initialize");
    let session = SessionState::default();

    let mut i = 0_u64;
    c.bench_function("journal_append_deduped", |b| {
        b.iter(|| {
            i += 1;
            journal.record(black_box(&player(i)), EncounterKind::Join, &session)
        });
    });
}

fn bench_journal_query(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut journal = EncounterJournal::new(&JournalConfig::default());
    journal.initialize(dir.path()).expect("initialize");
    let session = SessionState::default();
    for i in 0..10_000 {
        journal.record(&player(i), EncounterKind::Join, &session);
    }

    let filter = QueryFilter {
        search: Some("Player42".to_string()),
        limit: Some(100),
        ..QueryFilter::default()
    };
    c.bench_function("journal_query_10k", |b| {
        b.iter(|| journal.query(black_box(&filter)).expect("query"));
    });
}

fn bench_presence_incremental(c: &mut Criterion) {
    let mut tracker = FriendPresenceTracker::new();
    for i in 0..500 {
        tracker.apply_bulk_replace(&[summary(i)]);
    }

    let mut flip = false;
    c.bench_function("presence_incremental_diff", |b| {
        b.iter(|| {
            flip = !flip;
            let update = FriendUpdate {
                user_id: "usr_42".to_string(),
                location: Some(if flip {
                    "wrld_1:1".to_string()
                } else {
                    "wrld_2:1".to_string()
                }),
                ..FriendUpdate::default()
            };
            tracker.apply_incremental(black_box(&update))
        });
    });
}

fn bench_presence_bulk(c: &mut Criterion) {
    let list: Vec<FriendSummary> = (0..500).map(summary).collect();
    let mut tracker = FriendPresenceTracker::new();
    tracker.apply_bulk_replace(&list);

    c.bench_function("presence_bulk_replace_500", |b| {
        b.iter(|| tracker.apply_bulk_replace(black_box(&list)));
    });
}

criterion_group!(
    benches,
    bench_journal_append,
    bench_journal_query,
    bench_presence_incremental,
    bench_presence_bulk
);
criterion_main!(benches);
