//! Local-node aggregation: per-section unread counts and latest-unread
//! timestamps, computed from the authoritative event store.

use asupersync::{Cx, Outcome};

use badgecount_core::model::{CountBucket, DataSource};
use badgecount_core::section::Section;
use badgecount_core::{Config, Error, SectionCounts};

use crate::gateway::{EventGateway, EventTypeRegistry};
use crate::try_out;

/// Compute the local node's counts and timestamps for every counted
/// section.
///
/// Per section: the unread count is capped at `max_badge_count + 1`, the
/// timestamp is that of the single most recent unread event (absent when
/// nothing is unread), and only event types the user has enabled for the
/// section are considered. The `All` bucket is the re-capped sum of the
/// per-section counts and the max of their timestamps.
///
/// `source` must be `Primary` when the caller needs to observe its own
/// just-committed mutation (mark-read republish path).
pub async fn compute_local_counts<G, R>(
    cx: &Cx,
    gateway: &G,
    registry: &R,
    config: &Config,
    user_id: i64,
    source: DataSource,
) -> Outcome<SectionCounts, Error>
where
    G: EventGateway,
    R: EventTypeRegistry,
{
    let mut counts = SectionCounts::default();

    for section in Section::COUNTED {
        let event_types = registry.enabled_types(user_id, &[section]);
        if event_types.is_empty() {
            counts.set_bucket(section, CountBucket::EMPTY);
            continue;
        }

        let count = try_out!(
            gateway
                .count_unread(cx, user_id, &event_types, config.badge_ceiling())
                .await
        );

        let latest_ts_us = if count > 0 {
            let newest =
                try_out!(gateway.fetch_unread(cx, user_id, 1, &event_types, source).await);
            newest.first().map(|event| event.timestamp_us)
        } else {
            None
        };

        counts.set_bucket(section, CountBucket::new(count, latest_ts_us));
    }

    counts.finalize_all(config.max_badge_count);
    Outcome::Ok(counts)
}
