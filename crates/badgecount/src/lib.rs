//! Federated unread-notification counting engine.
//!
//! The hard problem here is not storing notifications (the event store is
//! an external collaborator) but the consistency and invalidation
//! discipline around a derived, expensive aggregate: per-section unread
//! counts and latest-unread timestamps, both for the local node and folded
//! across a federation of peer nodes. The aggregate is served from a
//! check-key-invalidated cache, capped to a bounded display value, and
//! invalidated on every mutation, including mutations on peer nodes the
//! local node does not control.
//!
//! Layout:
//! - [`gateway`]: trait seams for the external collaborators
//! - [`cache`]: the check-key count cache and its in-memory store
//! - [`local`]: local-node aggregation from the event store
//! - [`peers`]: federation fold over mirrored peer summaries (RPC fallback)
//! - [`counter`]: the public orchestrator, [`UnreadCounter`]
//! - [`talk_flag`]: talk-page flag reconciliation after mutations
//! - [`test_support`]: in-memory fakes for every collaborator trait

#![forbid(unsafe_code)]

pub mod cache;
pub mod counter;
pub mod gateway;
pub mod local;
pub mod peers;
pub mod talk_flag;
pub mod test_support;

pub use cache::{CacheStore, CachedValue, ComputedValue, CountCache, MemoryCacheStore};
pub use counter::UnreadCounter;
pub use gateway::{
    EventGateway, EventTypeRegistry, PeerClient, PeerUnreadSummary, TalkFlagStore, UserDirectory,
};
pub use local::compute_local_counts;
pub use peers::{GlobalComputation, compute_global_counts};

/// Unwrap an `Outcome`, propagating every non-`Ok` variant to the caller.
macro_rules! try_out {
    ($out:expr) => {
        match $out {
            asupersync::Outcome::Ok(v) => v,
            asupersync::Outcome::Err(e) => return asupersync::Outcome::Err(e),
            asupersync::Outcome::Cancelled(r) => return asupersync::Outcome::Cancelled(r),
            asupersync::Outcome::Panicked(p) => return asupersync::Outcome::Panicked(p),
        }
    };
}
pub(crate) use try_out;
