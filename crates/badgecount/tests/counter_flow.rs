//! End-to-end counter flows: cache population, mutation + invalidation,
//! talk-flag side effects, and the federation fold over a real summary
//! store.

use std::sync::Arc;

use badgecount::cache::MemoryCacheStore;
use badgecount::counter::UnreadCounter;
use badgecount::gateway::PeerUnreadSummary;
use badgecount::test_support::{
    MapTypeRegistry, MemoryEventStore, MemoryTalkFlag, StaticDirectory, StaticPeerClient,
    block_on,
};
use badgecount_core::model::{CountBucket, GlobalMode};
use badgecount_core::{Config, Section, SectionCounts, USER_TALK_CATEGORY};
use badgecount_db::{DbPool, DbPoolConfig};

type TestCounter = UnreadCounter<
    Arc<MemoryEventStore>,
    MapTypeRegistry,
    StaticDirectory,
    Arc<StaticPeerClient>,
    Arc<MemoryTalkFlag>,
    Arc<MemoryCacheStore<SectionCounts>>,
>;

struct Harness {
    store: Arc<MemoryEventStore>,
    registry: MapTypeRegistry,
    directory: StaticDirectory,
    peers: Arc<StaticPeerClient>,
    flags: Arc<MemoryTalkFlag>,
    cache: Arc<MemoryCacheStore<SectionCounts>>,
    config: Config,
    pool: Option<DbPool>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryEventStore::new()),
            registry: MapTypeRegistry::new()
                .with_section(Section::Alert, &["edit-thank", "mention"])
                .with_section(Section::Message, &[USER_TALK_CATEGORY, "flow-reply"])
                .with_category(USER_TALK_CATEGORY, &[USER_TALK_CATEGORY]),
            directory: StaticDirectory::new(),
            peers: Arc::new(StaticPeerClient::new()),
            flags: Arc::new(MemoryTalkFlag::new()),
            cache: Arc::new(MemoryCacheStore::new()),
            config: Config::default(),
            pool: None,
        }
    }

    fn counter(&self, user_id: i64) -> TestCounter {
        UnreadCounter::new(
            self.config.clone(),
            user_id,
            Arc::clone(&self.store),
            self.registry.clone(),
            self.directory.clone(),
            Arc::clone(&self.peers),
            Arc::clone(&self.flags),
            Arc::clone(&self.cache),
            self.pool.clone(),
        )
    }
}

fn summary_pool(dir: &tempfile::TempDir, name: &str) -> DbPool {
    let db_path = dir.path().join(name);
    DbPool::new(&DbPoolConfig {
        database_url: format!("sqlite:///{}", db_path.display()),
        ..Default::default()
    })
    .expect("create pool")
}

#[test]
fn unregistered_caller_gets_zero_not_an_error() {
    let harness = Harness::new();
    block_on(|cx| async move {
        let mut counter = harness.counter(0);
        let count = counter
            .count(&cx, Section::All, GlobalMode::FollowPreference)
            .await
            .into_result()
            .unwrap();
        assert_eq!(count, 0);
        let ts = counter
            .last_unread_time(&cx, Section::All, GlobalMode::Local)
            .await
            .into_result()
            .unwrap();
        assert_eq!(ts, None);
    });
}

#[test]
fn count_capped_at_badge_ceiling() {
    let harness = Harness::new();
    for i in 0..150 {
        harness.store.insert(1, "mention", 1_000 + i);
    }
    block_on(|cx| async move {
        let mut counter = harness.counter(1);
        let count = counter
            .count(&cx, Section::Alert, GlobalMode::Local)
            .await
            .into_result()
            .unwrap();
        // 150 unread alerts, cap 99: the engine reports the "at least
        // this many" sentinel; a consumer renders it as "99+".
        assert_eq!(count, 100);
    });
}

#[test]
fn count_zero_iff_no_timestamp() {
    let harness = Harness::new();
    harness.store.insert(1, "mention", 500);
    block_on(|cx| async move {
        let mut counter = harness.counter(1);
        for section in [Section::Alert, Section::Message, Section::All] {
            let count = counter
                .count(&cx, section, GlobalMode::Local)
                .await
                .into_result()
                .unwrap();
            let ts = counter
                .last_unread_time(&cx, section, GlobalMode::Local)
                .await
                .into_result()
                .unwrap();
            assert_eq!(count == 0, ts.is_none(), "section {section}");
        }
    });
}

#[test]
fn all_bucket_is_recapped_sum_of_sections() {
    let harness = Harness::new();
    for i in 0..80 {
        harness.store.insert(1, "mention", 1_000 + i);
    }
    for i in 0..80 {
        harness.store.insert(1, "flow-reply", 5_000 + i);
    }
    block_on(|cx| async move {
        let mut counter = harness.counter(1);
        let alert = counter
            .count(&cx, Section::Alert, GlobalMode::Local)
            .await
            .into_result()
            .unwrap();
        let message = counter
            .count(&cx, Section::Message, GlobalMode::Local)
            .await
            .into_result()
            .unwrap();
        let all = counter
            .count(&cx, Section::All, GlobalMode::Local)
            .await
            .into_result()
            .unwrap();
        assert_eq!(alert, 80);
        assert_eq!(message, 80);
        assert_eq!(all, 100, "sum is re-capped, not 160");
    });
}

#[test]
fn mark_read_is_read_after_write_and_idempotent() {
    let harness = Harness::new();
    let id1 = harness.store.insert(1, "mention", 100);
    harness.store.insert(1, "mention", 200);
    harness.store.insert(1, "mention", 300);

    block_on(|cx| async move {
        let mut counter = harness.counter(1);
        let before = counter
            .count(&cx, Section::Alert, GlobalMode::Local)
            .await
            .into_result()
            .unwrap();
        assert_eq!(before, 3);

        let changed = counter.mark_read(&cx, &[id1]).await.into_result().unwrap();
        assert!(changed);

        // Same request context, immediately after the mutation.
        let after = counter
            .count(&cx, Section::Alert, GlobalMode::Local)
            .await
            .into_result()
            .unwrap();
        assert_eq!(after, 2, "mark_read must be visible to the next read");

        // A fresh request context (shared cache) sees it too.
        let mut fresh = harness.counter(1);
        let fresh_count = fresh
            .count(&cx, Section::Alert, GlobalMode::Local)
            .await
            .into_result()
            .unwrap();
        assert_eq!(fresh_count, 2);

        // Second mark of the same id: nothing to do.
        let changed_again = counter.mark_read(&cx, &[id1]).await.into_result().unwrap();
        assert!(!changed_again, "second mark_read must report no change");
    });
}

#[test]
fn malformed_ids_and_read_only_mode_are_no_ops() {
    let harness = Harness::new();
    let id = harness.store.insert(1, "mention", 100);

    block_on(|cx| async move {
        let mut counter = harness.counter(1);

        let changed = counter
            .mark_read(&cx, &[0, -3])
            .await
            .into_result()
            .unwrap();
        assert!(!changed, "nothing well-formed to mark");
        assert_eq!(harness.store.unread_ids(1), vec![id]);

        harness.store.set_read_only(true);
        let changed = counter.mark_read(&cx, &[id]).await.into_result().unwrap();
        assert!(!changed, "read-only mode must be a silent no-op");
        assert_eq!(harness.store.unread_ids(1), vec![id]);
        assert_eq!(harness.flags.write_count(), 0);
    });
}

#[test]
fn talk_flag_clears_only_when_last_talk_event_read() {
    let harness = Harness::new();
    let t1 = harness.store.insert(1, USER_TALK_CATEGORY, 100);
    let t2 = harness.store.insert(1, USER_TALK_CATEGORY, 200);
    let t3 = harness.store.insert(1, USER_TALK_CATEGORY, 300);
    harness.flags.force_set(1);

    block_on(|cx| async move {
        let mut counter = harness.counter(1);

        let changed = counter
            .mark_read(&cx, &[t1, t2])
            .await
            .into_result()
            .unwrap();
        assert!(changed);
        assert!(
            harness.flags.is_set(1),
            "one unread talk event remains; the flag must stay"
        );
        assert_eq!(harness.flags.write_count(), 0);

        let changed = counter.mark_read(&cx, &[t3]).await.into_result().unwrap();
        assert!(changed);
        assert!(!harness.flags.is_set(1), "last talk event read; flag clears");
        assert_eq!(harness.flags.write_count(), 1);
    });
}

#[test]
fn mark_unread_restores_the_talk_flag() {
    let harness = Harness::new();
    let t1 = harness.store.insert(1, USER_TALK_CATEGORY, 100);
    harness.flags.force_set(1);

    block_on(|cx| async move {
        let mut counter = harness.counter(1);
        counter.mark_read(&cx, &[t1]).await.into_result().unwrap();
        assert!(!harness.flags.is_set(1));

        let changed = counter.mark_unread(&cx, &[t1]).await.into_result().unwrap();
        assert!(changed);
        assert!(harness.flags.is_set(1), "unread talk event is back; flag set");
    });
}

#[test]
fn clear_talk_notifications_reads_the_whole_category() {
    let harness = Harness::new();
    harness.store.insert(1, USER_TALK_CATEGORY, 100);
    harness.store.insert(1, USER_TALK_CATEGORY, 200);
    harness.store.insert(1, "mention", 300);
    harness.flags.force_set(1);

    block_on(|cx| async move {
        let mut counter = harness.counter(1);
        let changed = counter
            .clear_talk_notifications(&cx)
            .await
            .into_result()
            .unwrap();
        assert!(changed);
        assert!(!harness.flags.is_set(1));
        // The unrelated alert survives.
        assert_eq!(harness.store.unread_ids(1).len(), 1);
    });
}

#[test]
fn mark_all_read_is_bounded_and_resumable() {
    let mut harness = Harness::new();
    harness.config.max_mark_all_count = 2;
    for i in 0..5 {
        harness.store.insert(1, "mention", 100 + i);
    }

    block_on(|cx| async move {
        let mut counter = harness.counter(1);

        assert!(counter.mark_all_read(&cx, &[]).await.into_result().unwrap());
        assert_eq!(harness.store.unread_ids(1).len(), 3, "only 2 marked per call");

        assert!(counter.mark_all_read(&cx, &[]).await.into_result().unwrap());
        assert_eq!(harness.store.unread_ids(1).len(), 1);

        assert!(
            counter
                .mark_all_read(&cx, &[Section::All])
                .await
                .into_result()
                .unwrap()
        );
        assert!(
            harness.store.unread_ids(1).is_empty(),
            "a later call continues where the previous stopped"
        );

        assert!(
            !counter.mark_all_read(&cx, &[]).await.into_result().unwrap(),
            "nothing left to mark"
        );
    });
}

#[test]
fn global_mode_degrades_to_local_when_feature_disabled() {
    let mut harness = Harness::new();
    harness.config.cross_peer_enabled = false;
    harness.config.peers = vec!["remotewiki".to_string()];
    harness.directory = StaticDirectory::new().with_federation_id(1, 77);
    harness.peers = Arc::new(StaticPeerClient::new().with_summary(
        "remotewiki",
        77,
        PeerUnreadSummary {
            alert: CountBucket::new(9, Some(9_000)),
            message: CountBucket::EMPTY,
        },
    ));
    harness.store.insert(1, "mention", 100);

    block_on(|cx| async move {
        let mut counter = harness.counter(1);
        let global = counter
            .count(&cx, Section::Alert, GlobalMode::Global)
            .await
            .into_result()
            .unwrap();
        assert_eq!(global, 1, "peer data must be ignored while disabled");
    });
}

#[test]
fn unresolved_federation_identity_falls_back_to_local() {
    let mut harness = Harness::new();
    harness.config.cross_peer_enabled = true;
    harness.config.peers = vec!["remotewiki".to_string()];
    // No federation mapping for user 1.
    harness.peers = Arc::new(StaticPeerClient::new().with_summary(
        "remotewiki",
        77,
        PeerUnreadSummary {
            alert: CountBucket::new(9, Some(9_000)),
            message: CountBucket::EMPTY,
        },
    ));
    harness.store.insert(1, "mention", 100);

    block_on(|cx| async move {
        let mut counter = harness.counter(1);
        let global = counter
            .count(&cx, Section::Alert, GlobalMode::Global)
            .await
            .into_result()
            .unwrap();
        let local = counter
            .count(&cx, Section::Alert, GlobalMode::Local)
            .await
            .into_result()
            .unwrap();
        assert_eq!(global, local, "degraded mode, not an error");

        let snapshot = counter
            .counts_and_timestamps(&cx, true)
            .await
            .into_result()
            .unwrap();
        assert!(snapshot.global.is_none());
    });
}

#[test]
fn follow_preference_resolves_the_opt_in() {
    let mut harness = Harness::new();
    harness.config.cross_peer_enabled = true;
    harness.config.peers = vec!["remotewiki".to_string()];
    harness.directory = StaticDirectory::new()
        .with_federation_id(1, 77)
        .with_opt_in(1);
    harness.peers = Arc::new(StaticPeerClient::new().with_summary(
        "remotewiki",
        77,
        PeerUnreadSummary {
            alert: CountBucket::new(4, Some(9_000)),
            message: CountBucket::EMPTY,
        },
    ));
    harness.store.insert(1, "mention", 100);

    block_on(|cx| async move {
        let mut opted_in = harness.counter(1);
        let count = opted_in
            .count(&cx, Section::Alert, GlobalMode::FollowPreference)
            .await
            .into_result()
            .unwrap();
        assert_eq!(count, 5, "opted-in preference includes peers");
    });
}

#[test]
fn preference_without_opt_in_stays_local() {
    let mut harness = Harness::new();
    harness.config.cross_peer_enabled = true;
    harness.config.peers = vec!["remotewiki".to_string()];
    harness.directory = StaticDirectory::new().with_federation_id(1, 77);
    harness.peers = Arc::new(StaticPeerClient::new().with_summary(
        "remotewiki",
        77,
        PeerUnreadSummary {
            alert: CountBucket::new(4, Some(9_000)),
            message: CountBucket::EMPTY,
        },
    ));
    harness.store.insert(1, "mention", 100);

    block_on(|cx| async move {
        let mut counter = harness.counter(1);
        let count = counter
            .count(&cx, Section::Alert, GlobalMode::FollowPreference)
            .await
            .into_result()
            .unwrap();
        assert_eq!(count, 1, "no opt-in, no peer fold");
    });
}

#[test]
fn global_fold_never_decreases_local() {
    let mut harness = Harness::new();
    harness.config.cross_peer_enabled = true;
    harness.config.peers = vec!["remotewiki".to_string()];
    harness.directory = StaticDirectory::new().with_federation_id(1, 77);
    harness.peers = Arc::new(StaticPeerClient::new().with_summary(
        "remotewiki",
        77,
        PeerUnreadSummary {
            alert: CountBucket::new(2, Some(50)),
            message: CountBucket::new(1, Some(9_000)),
        },
    ));
    harness.store.insert(1, "mention", 100);
    harness.store.insert(1, "flow-reply", 200);

    block_on(|cx| async move {
        let mut counter = harness.counter(1);
        let snapshot = counter
            .counts_and_timestamps(&cx, true)
            .await
            .into_result()
            .unwrap();
        let global = snapshot.global.expect("federation identity resolves");
        for section in [Section::Alert, Section::Message, Section::All] {
            let g = global.bucket(section);
            let l = snapshot.local.bucket(section);
            assert!(g.count >= l.count, "section {section}");
            assert!(g.latest_ts_us >= l.latest_ts_us, "section {section}");
        }
    });
}

#[test]
fn mutation_republishes_summary_row_for_peers() {
    let dir = tempfile::tempdir().unwrap();
    let pool = summary_pool(&dir, "federation.db");

    // Node alpha: user 1 has unread alerts and publishes on mutation.
    let mut alpha = Harness::new();
    alpha.config.cross_peer_enabled = true;
    alpha.config.node_name = "alpha".to_string();
    alpha.directory = StaticDirectory::new().with_federation_id(1, 77);
    alpha.pool = Some(pool.clone());
    let a1 = alpha.store.insert(1, "mention", 100);
    alpha.store.insert(1, "mention", 200);
    alpha.store.insert(1, "mention", 300);

    // Node beta: same federation user, nothing unread locally. The two
    // nodes share the summary store and the cache cluster (global cache
    // keys and check keys are federation-wide).
    let mut beta = Harness::new();
    beta.config.cross_peer_enabled = true;
    beta.config.node_name = "beta".to_string();
    beta.directory = StaticDirectory::new().with_federation_id(9, 77);
    beta.pool = Some(pool.clone());
    beta.cache = Arc::clone(&alpha.cache);

    block_on(|cx| async move {
        let mut alpha_counter = alpha.counter(1);
        // Publish alpha's current state (as an external notification
        // insert would).
        alpha_counter.reset_counts(&cx).await.into_result().unwrap();

        let mut beta_counter = beta.counter(9);
        let global = beta_counter
            .count(&cx, Section::Alert, GlobalMode::Global)
            .await
            .into_result()
            .unwrap();
        assert_eq!(global, 3, "beta folds alpha's mirrored summary row");
        let local = beta_counter
            .count(&cx, Section::Alert, GlobalMode::Local)
            .await
            .into_result()
            .unwrap();
        assert_eq!(local, 0);

        // Alpha reads one alert; its row shrinks, and the check-key touch
        // makes beta's cached global stale.
        let changed = alpha_counter
            .mark_read(&cx, &[a1])
            .await
            .into_result()
            .unwrap();
        assert!(changed);

        let mut beta_fresh = beta.counter(9);
        let refreshed = beta_fresh
            .count(&cx, Section::Alert, GlobalMode::Global)
            .await
            .into_result()
            .unwrap();
        assert_eq!(
            refreshed, 2,
            "beta must observe alpha's decrease after the republish"
        );
    });
}

#[test]
fn check_key_touch_invalidates_cached_global_across_requests() {
    let dir = tempfile::tempdir().unwrap();
    let pool = summary_pool(&dir, "touch.db");

    let mut harness = Harness::new();
    harness.config.cross_peer_enabled = true;
    harness.config.node_name = "alpha".to_string();
    harness.directory = StaticDirectory::new().with_federation_id(1, 77);
    harness.pool = Some(pool.clone());
    let id = harness.store.insert(1, "mention", 100);
    harness.store.insert(1, "mention", 200);

    block_on(|cx| async move {
        // Prime the global cache.
        let mut first = harness.counter(1);
        let primed = first
            .count(&cx, Section::Alert, GlobalMode::Global)
            .await
            .into_result()
            .unwrap();
        assert_eq!(primed, 2);

        // A mutation in another request context.
        let mut writer = harness.counter(1);
        writer.mark_read(&cx, &[id]).await.into_result().unwrap();

        // A third context must not see the stale cached global.
        let mut reader = harness.counter(1);
        let refreshed = reader
            .count(&cx, Section::Alert, GlobalMode::Global)
            .await
            .into_result()
            .unwrap();
        assert_eq!(refreshed, 1);
    });
}

#[test]
fn peer_mark_read_delegates_through_the_client() {
    let mut harness = Harness::new();
    harness.config.cross_peer_enabled = true;
    harness.directory = StaticDirectory::new().with_federation_id(1, 77);

    block_on(|cx| async move {
        let counter = harness.counter(1);
        let changed = counter
            .mark_read_on_peer(&cx, "remotewiki", &[4, 0, 5])
            .await
            .into_result()
            .unwrap();
        assert!(changed);
        let calls = harness.peers.mark_read_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "remotewiki");
        assert_eq!(calls[0].1, 77);
        assert_eq!(calls[0].2, vec![4, 5], "malformed ids filtered first");
    });
}

#[test]
fn peer_notification_info_filters_to_requested_ids() {
    let mut harness = Harness::new();
    harness.config.cross_peer_enabled = true;
    harness.directory = StaticDirectory::new().with_federation_id(1, 77);
    harness.peers = Arc::new(StaticPeerClient::new().with_unread_list(
        "remotewiki",
        77,
        vec![
            badgecount_core::model::Event {
                id: 4,
                event_type: "mention".to_string(),
                timestamp_us: 100,
            },
            badgecount_core::model::Event {
                id: 6,
                event_type: "mention".to_string(),
                timestamp_us: 200,
            },
        ],
    ));

    block_on(|cx| async move {
        let counter = harness.counter(1);
        let info = counter
            .peer_notification_info(&cx, "remotewiki", &[6, 99])
            .await
            .into_result()
            .unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].id, 6);
    });
}
