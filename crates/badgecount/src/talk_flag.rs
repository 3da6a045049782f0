//! Talk-page flag reconciliation.
//!
//! The "has new messages" flag is owned by the user-identity subsystem;
//! this engine only keeps it consistent with unread state in the reserved
//! `user-talk-edit` category after read/unread transitions. The recompute
//! queries the primary source (a replica could still show the old state)
//! and writes the flag only when its current value disagrees with the
//! recomputed truth, avoiding redundant external writes.

use asupersync::{Cx, Outcome};

use badgecount_core::model::DataSource;
use badgecount_core::{Error, USER_TALK_CATEGORY};

use crate::gateway::{EventGateway, EventTypeRegistry, TalkFlagStore};
use crate::try_out;

/// After a mark-read: if the flag is set but no unread talk event
/// remains, clear it.
pub async fn sync_after_mark_read<G, R, T>(
    cx: &Cx,
    gateway: &G,
    registry: &R,
    flags: &T,
    user_id: i64,
) -> Outcome<(), Error>
where
    G: EventGateway,
    R: EventTypeRegistry,
    T: TalkFlagStore,
{
    let has_flag = try_out!(flags.has_flag(cx, user_id).await);
    if !has_flag {
        return Outcome::Ok(());
    }

    if try_out!(any_unread_talk_event(cx, gateway, registry, user_id).await) {
        return Outcome::Ok(());
    }

    tracing::debug!(user_id, "clearing talk-page flag; no unread talk event remains");
    flags.clear_flag(cx, user_id).await
}

/// After a mark-unread: if the flag is clear but an unread talk event now
/// exists, set it.
pub async fn sync_after_mark_unread<G, R, T>(
    cx: &Cx,
    gateway: &G,
    registry: &R,
    flags: &T,
    user_id: i64,
) -> Outcome<(), Error>
where
    G: EventGateway,
    R: EventTypeRegistry,
    T: TalkFlagStore,
{
    let has_flag = try_out!(flags.has_flag(cx, user_id).await);
    if has_flag {
        return Outcome::Ok(());
    }

    if !try_out!(any_unread_talk_event(cx, gateway, registry, user_id).await) {
        return Outcome::Ok(());
    }

    tracing::debug!(user_id, "setting talk-page flag; unread talk event present");
    flags.set_flag(cx, user_id).await
}

/// Whether any unread event in the reserved talk category exists, read
/// from the primary source to dodge the stale-replica race right after a
/// mutation.
async fn any_unread_talk_event<G, R>(
    cx: &Cx,
    gateway: &G,
    registry: &R,
    user_id: i64,
) -> Outcome<bool, Error>
where
    G: EventGateway,
    R: EventTypeRegistry,
{
    let talk_types = registry.category_types(USER_TALK_CATEGORY);
    if talk_types.is_empty() {
        return Outcome::Ok(false);
    }
    let unread = try_out!(
        gateway
            .fetch_unread(cx, user_id, 1, &talk_types, DataSource::Primary)
            .await
    );
    Outcome::Ok(!unread.is_empty())
}
