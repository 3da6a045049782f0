//! Federation fold: combine the local node's counts with every peer
//! node's published summary.
//!
//! The normal path reads the mirrored `unread_peers` table (updated
//! asynchronously by each node after its own mutations). When no mirror
//! is available the engine falls back to live peer RPC, bounded by a
//! per-peer timeout; a peer that fails or times out contributes zero to
//! the fold and only marks the result as partial. Cross-node visibility
//! is eventual by design: a write on node A may take up to one refresh
//! cycle to appear in node B's aggregate.

use asupersync::time::{timeout, wall_now};
use asupersync::{Cx, Outcome};

use badgecount_core::model::CountBucket;
use badgecount_core::{Config, Error, SectionCounts};
use badgecount_db::DbPool;

use crate::gateway::PeerClient;

/// A computed federation-wide fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalComputation {
    pub counts: SectionCounts,
    /// True when at least one peer failed or timed out; the aggregate is
    /// a lower bound and should be cached only briefly.
    pub partial: bool,
}

/// Fold the local counts with every peer's summary.
///
/// Folding rule, per section: sum the already-capped per-node counts,
/// re-cap the sum, and take the max timestamp. The fold never loses local
/// data, so for every section `global >= local`.
pub async fn compute_global_counts<P>(
    cx: &Cx,
    pool: Option<&DbPool>,
    peer_client: &P,
    config: &Config,
    global_id: i64,
    local: &SectionCounts,
) -> Outcome<GlobalComputation, Error>
where
    P: PeerClient,
{
    let mut alert = local.alert;
    let mut message = local.message;
    let mut partial = false;

    let mirrored = match pool {
        Some(pool) => {
            let rows = match badgecount_db::list_unread_peers(cx, pool, global_id).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(Error::Store(e.to_string())),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let mut found = false;
            for row in rows {
                if row.peer == config.node_name {
                    // The local node's own row is already represented by
                    // `local` (and fresher there).
                    continue;
                }
                found = true;
                alert = alert.fold(row.alert_bucket());
                message = message.fold(row.message_bucket());
            }
            found
        }
        None => false,
    };

    if !mirrored && !config.peers.is_empty() {
        // No mirrored summary: ask each peer directly, isolating
        // per-peer failures.
        for peer in &config.peers {
            if *peer == config.node_name {
                continue;
            }
            let summary = fetch_peer_summary(cx, peer_client, config, peer, global_id).await;
            match summary {
                Outcome::Ok(Some(summary)) => {
                    alert = alert.fold(summary.alert);
                    message = message.fold(summary.message);
                }
                Outcome::Ok(None) => partial = true,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
    }

    let mut counts = SectionCounts {
        alert: alert.capped(config.max_badge_count),
        message: message.capped(config.max_badge_count),
        all: CountBucket::EMPTY,
    };
    counts.finalize_all(config.max_badge_count);

    Outcome::Ok(GlobalComputation { counts, partial })
}

/// Query one peer with the configured time budget. `Ok(None)` means the
/// peer was unreachable or slow; the caller folds zero and marks the
/// aggregate partial.
async fn fetch_peer_summary<P: PeerClient>(
    cx: &Cx,
    peer_client: &P,
    config: &Config,
    peer: &str,
    global_id: i64,
) -> Outcome<Option<crate::gateway::PeerUnreadSummary>, Error> {
    let fut = Box::pin(peer_client.unread_summary(cx, peer, global_id));
    match timeout(wall_now(), config.peer_timeout, fut).await {
        Ok(Outcome::Ok(summary)) => Outcome::Ok(Some(summary)),
        Ok(Outcome::Err(e)) => {
            tracing::warn!(peer = %peer, error = %e, "peer summary fetch failed; folding zero");
            Outcome::Ok(None)
        }
        Ok(Outcome::Cancelled(r)) => Outcome::Cancelled(r),
        Ok(Outcome::Panicked(p)) => Outcome::Panicked(p),
        Err(_) => {
            tracing::warn!(peer = %peer, "peer summary fetch timed out; folding zero");
            Outcome::Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PeerUnreadSummary;
    use crate::test_support::{StaticPeerClient, block_on};
    use badgecount_core::model::CountBucket;

    fn local_counts() -> SectionCounts {
        let mut counts = SectionCounts {
            alert: CountBucket::new(2, Some(500)),
            message: CountBucket::new(1, Some(300)),
            all: CountBucket::EMPTY,
        };
        counts.finalize_all(99);
        counts
    }

    fn config_with_peers(peers: &[&str]) -> Config {
        Config {
            cross_peer_enabled: true,
            peers: peers.iter().map(ToString::to_string).collect(),
            ..Config::default()
        }
    }

    #[test]
    fn rpc_fallback_folds_peer_summaries() {
        let config = config_with_peers(&["remotewiki"]);
        let peers = StaticPeerClient::new().with_summary(
            "remotewiki",
            7,
            PeerUnreadSummary {
                alert: CountBucket::new(3, Some(900)),
                message: CountBucket::EMPTY,
            },
        );

        let local = local_counts();
        let global = block_on(|cx| async move {
            compute_global_counts(&cx, None, &peers, &config, 7, &local)
                .await
                .into_result()
                .unwrap()
        });

        assert!(!global.partial);
        assert_eq!(global.counts.alert.count, 5);
        assert_eq!(global.counts.alert.latest_ts_us, Some(900));
        assert_eq!(global.counts.message.count, 1);
        assert_eq!(global.counts.all.count, 6);
    }

    #[test]
    fn failing_peer_contributes_zero_and_marks_partial() {
        let config = config_with_peers(&["deadwiki", "livewiki"]);
        let peers = StaticPeerClient::new()
            .with_failure("deadwiki")
            .with_summary(
                "livewiki",
                7,
                PeerUnreadSummary {
                    alert: CountBucket::new(1, Some(800)),
                    message: CountBucket::EMPTY,
                },
            );

        let local = local_counts();
        let global = block_on(|cx| async move {
            compute_global_counts(&cx, None, &peers, &config, 7, &local)
                .await
                .into_result()
                .unwrap()
        });

        assert!(global.partial, "a failing peer must mark the fold partial");
        assert_eq!(global.counts.alert.count, 3, "live peer still folded in");
    }

    #[test]
    fn fold_never_decreases_local() {
        let config = config_with_peers(&["remotewiki"]);
        let peers = StaticPeerClient::new(); // peer returns nothing for this user

        let local = local_counts();
        let global = block_on(|cx| async move {
            compute_global_counts(&cx, None, &peers, &config, 7, &local)
                .await
                .into_result()
                .unwrap()
        });

        for section in badgecount_core::Section::COUNTED {
            let g = global.counts.bucket(section);
            let l = local_counts().bucket(section);
            assert!(g.count >= l.count);
            assert!(g.latest_ts_us >= l.latest_ts_us);
        }
    }

    #[test]
    fn global_sum_is_recapped() {
        let config = config_with_peers(&["remotewiki"]);
        let peers = StaticPeerClient::new().with_summary(
            "remotewiki",
            7,
            PeerUnreadSummary {
                alert: CountBucket::new(99, Some(900)),
                message: CountBucket::new(99, Some(901)),
            },
        );

        let mut local = SectionCounts {
            alert: CountBucket::new(99, Some(500)),
            message: CountBucket::new(99, Some(501)),
            all: CountBucket::EMPTY,
        };
        local.finalize_all(99);

        let global = block_on(|cx| async move {
            compute_global_counts(&cx, None, &peers, &config, 7, &local)
                .await
                .into_result()
                .unwrap()
        });

        assert_eq!(global.counts.alert.count, 100);
        assert_eq!(global.counts.message.count, 100);
        assert_eq!(global.counts.all.count, 100);
    }

    #[test]
    fn no_peers_configured_yields_local() {
        let config = config_with_peers(&[]);
        let peers = StaticPeerClient::new();
        let local = local_counts();
        let expected = local;

        let global = block_on(|cx| async move {
            compute_global_counts(&cx, None, &peers, &config, 7, &local)
                .await
                .into_result()
                .unwrap()
        });

        assert!(!global.partial);
        assert_eq!(global.counts, expected);
    }
}
