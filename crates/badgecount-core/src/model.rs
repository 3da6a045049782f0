//! Count buckets, per-section count structures, and cap arithmetic.
//!
//! All timestamps are `i64` microseconds since the Unix epoch. "No unread
//! item" is represented as `None`, not a sentinel value.

use serde::{Deserialize, Serialize};

use crate::section::Section;

/// The reserved event category whose unread state drives the external
/// talk-page flag.
pub const USER_TALK_CATEGORY: &str = "user-talk-edit";

/// Cap a raw count at `max_badge_count + 1`.
///
/// The `+ 1` value is a sentinel meaning "at least this many": a consumer
/// displaying badges renders it as "99+" for the default cap of 99. Every
/// place that sums counts must re-apply this cap; arithmetic elsewhere is
/// never allowed to exceed it.
#[must_use]
pub const fn cap_count(count: i64, max_badge_count: i64) -> i64 {
    if count < 0 {
        0
    } else if count > max_badge_count + 1 {
        max_badge_count + 1
    } else {
        count
    }
}

/// Unread count and latest-unread timestamp for one section.
///
/// Invariant: `count == 0` exactly when `latest_ts_us` is `None`.
/// [`CountBucket::new`] normalizes both directions, so a bucket obtained
/// through it always satisfies the invariant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBucket {
    pub count: i64,
    pub latest_ts_us: Option<i64>,
}

impl CountBucket {
    /// A bucket with nothing unread.
    pub const EMPTY: Self = Self {
        count: 0,
        latest_ts_us: None,
    };

    /// Build a bucket, normalizing the count/timestamp invariant.
    ///
    /// A missing timestamp with a positive count can happen when the count
    /// query and the latest-event fetch race against a replica; the bucket
    /// collapses to empty rather than violating the invariant (the next
    /// recomputation repairs it).
    #[must_use]
    pub fn new(count: i64, latest_ts_us: Option<i64>) -> Self {
        if count <= 0 || latest_ts_us.is_none() {
            Self::EMPTY
        } else {
            Self {
                count,
                latest_ts_us,
            }
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Sum two buckets without capping; the caller re-applies the cap.
    /// The folded timestamp is the max of the two.
    #[must_use]
    pub fn fold(self, other: Self) -> Self {
        let latest_ts_us = match (self.latest_ts_us, other.latest_ts_us) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
        Self::new(self.count + other.count, latest_ts_us)
    }

    /// Re-apply the display cap to this bucket's count.
    #[must_use]
    pub fn capped(self, max_badge_count: i64) -> Self {
        Self::new(cap_count(self.count, max_badge_count), self.latest_ts_us)
    }
}

/// Per-section buckets for one scope (local node, or the federation fold).
///
/// The section set is closed, so this is a plain struct rather than a map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionCounts {
    pub alert: CountBucket,
    pub message: CountBucket,
    pub all: CountBucket,
}

impl SectionCounts {
    #[must_use]
    pub const fn bucket(&self, section: Section) -> CountBucket {
        match section {
            Section::Alert => self.alert,
            Section::Message => self.message,
            Section::All => self.all,
        }
    }

    pub const fn set_bucket(&mut self, section: Section, bucket: CountBucket) {
        match section {
            Section::Alert => self.alert = bucket,
            Section::Message => self.message = bucket,
            Section::All => self.all = bucket,
        }
    }

    /// Derive the `All` bucket from the counted sections.
    ///
    /// `all.count` is the re-capped sum of the per-section counts (which
    /// are themselves already capped), and `all.latest_ts_us` the max of
    /// the per-section timestamps. When sections overlap in underlying
    /// event types the sum can under-count relative to a true union; that
    /// approximation is intentional and load-bearing for consumers.
    pub fn finalize_all(&mut self, max_badge_count: i64) {
        let folded = self.alert.fold(self.message);
        self.all = folded.capped(max_badge_count);
    }
}

/// Cached unit returned to callers: the local node's counts plus, when
/// cross-node aggregation was requested and the user resolves to a
/// federation identity, the federation-wide fold.
///
/// Invariant: when `global` is present, for every section
/// `global.count >= local.count` and `global.latest_ts_us >= local.latest_ts_us`
/// (the fold adds peer data on top of local, it never loses local data).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSnapshot {
    pub local: SectionCounts,
    pub global: Option<SectionCounts>,
}

/// Whether a query should include cross-node data.
///
/// `FollowPreference` resolves to the user's stored opt-in exactly once,
/// at the orchestrator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalMode {
    Local,
    Global,
    FollowPreference,
}

/// Which end of the event store replication pair to read.
///
/// `Primary` is used when a caller needs read-your-write consistency
/// immediately after a mutation; `Replica` is the cheap default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Replica,
    Primary,
}

/// A notification event as surfaced by the event store gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub event_type: String,
    /// Microseconds since Unix epoch
    pub timestamp_us: i64,
}
