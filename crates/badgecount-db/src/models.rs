//! Row model for the per-peer unread summary table.

use serde::{Deserialize, Serialize};
use sqlmodel::Model;

use badgecount_core::model::CountBucket;
use badgecount_core::timestamps::now_micros;

/// One node's published unread summary for one federation user.
///
/// Counts are stored already capped by the publishing node; `alert_ts` /
/// `message_ts` use `0` for "no unread item" (a convention private to
/// this table; everywhere else absence is `Option`).
#[derive(Model, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[sqlmodel(table = "unread_peers")]
pub struct UnreadPeerRow {
    // Composite primary key: (global_id, peer)
    pub global_id: i64,
    pub peer: String,

    #[sqlmodel(default = "0")]
    pub alert_count: i64,

    #[sqlmodel(default = "0")]
    pub alert_ts: i64,

    #[sqlmodel(default = "0")]
    pub message_count: i64,

    #[sqlmodel(default = "0")]
    pub message_ts: i64,

    /// When the publishing node last wrote this row
    pub updated_ts: i64,
}

impl UnreadPeerRow {
    /// Build a row from section buckets (both already capped).
    #[must_use]
    pub fn from_buckets(
        global_id: i64,
        peer: impl Into<String>,
        alert: CountBucket,
        message: CountBucket,
    ) -> Self {
        Self {
            global_id,
            peer: peer.into(),
            alert_count: alert.count,
            alert_ts: alert.latest_ts_us.unwrap_or(0),
            message_count: message.count,
            message_ts: message.latest_ts_us.unwrap_or(0),
            updated_ts: now_micros(),
        }
    }

    /// The alert section as a bucket.
    #[must_use]
    pub fn alert_bucket(&self) -> CountBucket {
        CountBucket::new(self.alert_count, ts_opt(self.alert_ts))
    }

    /// The message section as a bucket.
    #[must_use]
    pub fn message_bucket(&self) -> CountBucket {
        CountBucket::new(self.message_count, ts_opt(self.message_ts))
    }

    /// Whether this row carries no unread items at all. Empty rows are
    /// deleted instead of stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.alert_count == 0 && self.message_count == 0
    }
}

const fn ts_opt(ts: i64) -> Option<i64> {
    if ts > 0 { Some(ts) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_round_trip_through_row() {
        let alert = CountBucket::new(5, Some(1_000));
        let message = CountBucket::new(2, Some(2_000));
        let row = UnreadPeerRow::from_buckets(42, "remotewiki", alert, message);

        assert_eq!(row.global_id, 42);
        assert_eq!(row.peer, "remotewiki");
        assert_eq!(row.alert_bucket(), alert);
        assert_eq!(row.message_bucket(), message);
        assert!(!row.is_empty());
        assert!(row.updated_ts > 0);
    }

    #[test]
    fn zero_ts_means_absent() {
        let row = UnreadPeerRow::from_buckets(1, "a", CountBucket::EMPTY, CountBucket::EMPTY);
        assert_eq!(row.alert_ts, 0);
        assert_eq!(row.alert_bucket(), CountBucket::EMPTY);
        assert_eq!(row.message_bucket(), CountBucket::EMPTY);
        assert!(row.is_empty());
    }

    #[test]
    fn one_empty_section_is_not_an_empty_row() {
        let row = UnreadPeerRow::from_buckets(
            1,
            "a",
            CountBucket::new(1, Some(10)),
            CountBucket::EMPTY,
        );
        assert!(!row.is_empty());
    }
}
