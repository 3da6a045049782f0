//! Trait seams for the external collaborators.
//!
//! The engine owns counting, caching, and invalidation; everything else
//! (event rows, identity mapping, peer transport, the talk flag itself)
//! belongs to other subsystems and is reached through these traits.
//! Async methods use the `impl Future + Send` return style so
//! implementations stay object-free and allocation-free.

use std::future::Future;
use std::sync::Arc;

use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};

use badgecount_core::model::{CountBucket, DataSource, Event};
use badgecount_core::section::Section;
use badgecount_core::Error;

/// Authoritative store of notification events (read and mark paths).
///
/// Contract: an empty `event_types` slice matches nothing, not
/// everything. `fetch_unread` returns events most-recent first.
pub trait EventGateway: Send + Sync {
    /// Count unread events of the given types, capped at `cap`.
    fn count_unread(
        &self,
        cx: &Cx,
        user_id: i64,
        event_types: &[String],
        cap: i64,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Fetch up to `limit` unread events of the given types, most-recent
    /// first, from the requested replication source.
    fn fetch_unread(
        &self,
        cx: &Cx,
        user_id: i64,
        limit: usize,
        event_types: &[String],
        source: DataSource,
    ) -> impl Future<Output = Outcome<Vec<Event>, Error>> + Send;

    /// Mark events read. Returns whether anything actually changed.
    fn mark_read(
        &self,
        cx: &Cx,
        user_id: i64,
        event_ids: &[i64],
    ) -> impl Future<Output = Outcome<bool, Error>> + Send;

    /// Mark events unread. Returns whether anything actually changed.
    fn mark_unread(
        &self,
        cx: &Cx,
        user_id: i64,
        event_ids: &[i64],
    ) -> impl Future<Output = Outcome<bool, Error>> + Send;

    /// Whether the store is in read-only maintenance mode.
    fn read_only(&self) -> bool;
}

/// Which event types exist, per section and per category, filtered to
/// what the user has enabled.
pub trait EventTypeRegistry: Send + Sync {
    /// Event types enabled for this user across the given sections.
    fn enabled_types(&self, user_id: i64, sections: &[Section]) -> Vec<String>;

    /// Event types belonging to a category (e.g. the reserved
    /// `user-talk-edit` category).
    fn category_types(&self, category: &str) -> Vec<String>;
}

/// Identity and preference lookups for the notification target user.
pub trait UserDirectory: Send + Sync {
    /// The user's federation-wide identity, if one resolves.
    fn federation_id(&self, user_id: i64) -> Option<i64>;

    /// Whether the user has opted into cross-node aggregation.
    fn cross_peer_opted_in(&self, user_id: i64) -> bool;
}

/// A peer node's already-capped unread summary, as returned by the live
/// RPC fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerUnreadSummary {
    pub alert: CountBucket,
    pub message: CountBucket,
}

/// Authenticated RPC to a peer node. Used only as a fallback when no
/// locally mirrored summary exists, plus for explicit cross-node
/// mark-read requests.
pub trait PeerClient: Send + Sync {
    /// Ask a peer for its capped unread summary for this user.
    fn unread_summary(
        &self,
        cx: &Cx,
        peer: &str,
        global_id: i64,
    ) -> impl Future<Output = Outcome<PeerUnreadSummary, Error>> + Send;

    /// Ask a peer to mark events read. Returns whether anything changed.
    fn mark_read(
        &self,
        cx: &Cx,
        peer: &str,
        global_id: i64,
        event_ids: &[i64],
    ) -> impl Future<Output = Outcome<bool, Error>> + Send;

    /// Ask a peer for its unread event list.
    fn unread_list(
        &self,
        cx: &Cx,
        peer: &str,
        global_id: i64,
    ) -> impl Future<Output = Outcome<Vec<Event>, Error>> + Send;
}

/// The external "has new messages" flag. Owned elsewhere; this engine
/// only reads it and reconciles it after mutations.
pub trait TalkFlagStore: Send + Sync {
    fn has_flag(&self, cx: &Cx, user_id: i64) -> impl Future<Output = Outcome<bool, Error>> + Send;

    fn set_flag(&self, cx: &Cx, user_id: i64) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn clear_flag(&self, cx: &Cx, user_id: i64)
    -> impl Future<Output = Outcome<(), Error>> + Send;
}

// Arc delegation so tests and long-lived services can share collaborators
// with per-request counter instances.

impl<T: EventGateway> EventGateway for Arc<T> {
    fn count_unread(
        &self,
        cx: &Cx,
        user_id: i64,
        event_types: &[String],
        cap: i64,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        (**self).count_unread(cx, user_id, event_types, cap)
    }

    fn fetch_unread(
        &self,
        cx: &Cx,
        user_id: i64,
        limit: usize,
        event_types: &[String],
        source: DataSource,
    ) -> impl Future<Output = Outcome<Vec<Event>, Error>> + Send {
        (**self).fetch_unread(cx, user_id, limit, event_types, source)
    }

    fn mark_read(
        &self,
        cx: &Cx,
        user_id: i64,
        event_ids: &[i64],
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        (**self).mark_read(cx, user_id, event_ids)
    }

    fn mark_unread(
        &self,
        cx: &Cx,
        user_id: i64,
        event_ids: &[i64],
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        (**self).mark_unread(cx, user_id, event_ids)
    }

    fn read_only(&self) -> bool {
        (**self).read_only()
    }
}

impl<T: EventTypeRegistry> EventTypeRegistry for Arc<T> {
    fn enabled_types(&self, user_id: i64, sections: &[Section]) -> Vec<String> {
        (**self).enabled_types(user_id, sections)
    }

    fn category_types(&self, category: &str) -> Vec<String> {
        (**self).category_types(category)
    }
}

impl<T: UserDirectory> UserDirectory for Arc<T> {
    fn federation_id(&self, user_id: i64) -> Option<i64> {
        (**self).federation_id(user_id)
    }

    fn cross_peer_opted_in(&self, user_id: i64) -> bool {
        (**self).cross_peer_opted_in(user_id)
    }
}

impl<T: PeerClient> PeerClient for Arc<T> {
    fn unread_summary(
        &self,
        cx: &Cx,
        peer: &str,
        global_id: i64,
    ) -> impl Future<Output = Outcome<PeerUnreadSummary, Error>> + Send {
        (**self).unread_summary(cx, peer, global_id)
    }

    fn mark_read(
        &self,
        cx: &Cx,
        peer: &str,
        global_id: i64,
        event_ids: &[i64],
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        (**self).mark_read(cx, peer, global_id, event_ids)
    }

    fn unread_list(
        &self,
        cx: &Cx,
        peer: &str,
        global_id: i64,
    ) -> impl Future<Output = Outcome<Vec<Event>, Error>> + Send {
        (**self).unread_list(cx, peer, global_id)
    }
}

impl<T: TalkFlagStore> TalkFlagStore for Arc<T> {
    fn has_flag(&self, cx: &Cx, user_id: i64) -> impl Future<Output = Outcome<bool, Error>> + Send {
        (**self).has_flag(cx, user_id)
    }

    fn set_flag(&self, cx: &Cx, user_id: i64) -> impl Future<Output = Outcome<(), Error>> + Send {
        (**self).set_flag(cx, user_id)
    }

    fn clear_flag(
        &self,
        cx: &Cx,
        user_id: i64,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        (**self).clear_flag(cx, user_id)
    }
}
