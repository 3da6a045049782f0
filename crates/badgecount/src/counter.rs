//! The public-facing orchestrator.
//!
//! [`UnreadCounter`] is a short-lived, per-request context object for one
//! notification target user: it memoizes the local and global snapshot
//! halves for its own lifetime, drives cache population through the
//! local/peer aggregators, and implements the read/unread mutations with
//! their invalidation and talk-page-flag side effects. It is never shared
//! across requests; the cache store behind it is the shared state.

use asupersync::time::{timeout, wall_now};
use asupersync::{Cx, Outcome};

use badgecount_core::model::{CountSnapshot, DataSource, Event, GlobalMode};
use badgecount_core::timestamps::now_micros;
use badgecount_core::{Config, Error, Section, SectionCounts};
use badgecount_db::{DbPool, UnreadPeerRow};

use crate::cache::{CacheStore, ComputedValue, CountCache};
use crate::gateway::{EventGateway, EventTypeRegistry, PeerClient, TalkFlagStore, UserDirectory};
use crate::local::compute_local_counts;
use crate::peers::compute_global_counts;
use crate::talk_flag;
use crate::try_out;

/// Per-request unread counting context for one user.
pub struct UnreadCounter<G, R, D, P, T, S>
where
    G: EventGateway,
    R: EventTypeRegistry,
    D: UserDirectory,
    P: PeerClient,
    T: TalkFlagStore,
    S: CacheStore<SectionCounts>,
{
    config: Config,
    user_id: i64,
    gateway: G,
    registry: R,
    directory: D,
    peer_client: P,
    talk_flags: T,
    cache: CountCache<SectionCounts, S>,
    /// Summary store for the federation fold; `None` disables the
    /// mirrored-table path (RPC fallback only).
    pool: Option<DbPool>,
    local_counts: Option<SectionCounts>,
    global_counts: Option<Option<SectionCounts>>,
}

impl<G, R, D, P, T, S> UnreadCounter<G, R, D, P, T, S>
where
    G: EventGateway,
    R: EventTypeRegistry,
    D: UserDirectory,
    P: PeerClient,
    T: TalkFlagStore,
    S: CacheStore<SectionCounts>,
{
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        config: Config,
        user_id: i64,
        gateway: G,
        registry: R,
        directory: D,
        peer_client: P,
        talk_flags: T,
        cache_store: S,
        pool: Option<DbPool>,
    ) -> Self {
        Self {
            config,
            user_id,
            gateway,
            registry,
            directory,
            peer_client,
            talk_flags,
            cache: CountCache::new(cache_store),
            pool,
            local_counts: None,
            global_counts: None,
        }
    }

    /// Whether the caller is a recognized registered identity. Anonymous
    /// callers get zero counts, never an error.
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.user_id > 0
    }

    fn local_cache_key(&self) -> String {
        format!(
            "unread-counts:{}:{}",
            self.user_id, self.config.cache_version
        )
    }

    fn global_cache_key(&self, global_id: i64) -> String {
        format!(
            "unread-counts-global:{global_id}:{}",
            self.config.cache_version
        )
    }

    fn global_check_key(&self, global_id: i64) -> String {
        format!("unread-touched:{global_id}:{}", self.config.cache_version)
    }

    /// Resolve the tri-state mode to a concrete include-global decision,
    /// once, at this boundary.
    fn resolve_global(&self, mode: GlobalMode) -> bool {
        if !self.config.cross_peer_enabled {
            // Feature disabled system-wide: the mode is ignored.
            return false;
        }
        match mode {
            GlobalMode::Local => false,
            GlobalMode::Global => true,
            GlobalMode::FollowPreference => self.directory.cross_peer_opted_in(self.user_id),
        }
    }

    /// Unread count for a section. Falls back to the local value when
    /// global data is requested but no federation identity resolves.
    pub async fn count(
        &mut self,
        cx: &Cx,
        section: Section,
        mode: GlobalMode,
    ) -> Outcome<i64, Error> {
        if !self.is_registered() {
            return Outcome::Ok(0);
        }
        let include_global = self.resolve_global(mode);
        let snapshot = try_out!(self.counts_and_timestamps(cx, include_global).await);
        let counts = if include_global {
            snapshot.global.unwrap_or(snapshot.local)
        } else {
            snapshot.local
        };
        Outcome::Ok(counts.bucket(section).count)
    }

    /// Timestamp of the latest unread notification in a section, or
    /// `None` when nothing is unread. Same fallback rules as [`Self::count`].
    pub async fn last_unread_time(
        &mut self,
        cx: &Cx,
        section: Section,
        mode: GlobalMode,
    ) -> Outcome<Option<i64>, Error> {
        if !self.is_registered() {
            return Outcome::Ok(None);
        }
        let include_global = self.resolve_global(mode);
        let snapshot = try_out!(self.counts_and_timestamps(cx, include_global).await);
        let counts = if include_global {
            snapshot.global.unwrap_or(snapshot.local)
        } else {
            snapshot.local
        };
        Outcome::Ok(counts.bucket(section).latest_ts_us)
    }

    /// Unread alert count using the user's cross-node preference.
    pub async fn alert_count(&mut self, cx: &Cx) -> Outcome<i64, Error> {
        self.count(cx, Section::Alert, GlobalMode::FollowPreference)
            .await
    }

    /// Unread message count using the user's cross-node preference.
    pub async fn message_count(&mut self, cx: &Cx) -> Outcome<i64, Error> {
        self.count(cx, Section::Message, GlobalMode::FollowPreference)
            .await
    }

    /// The raw cached snapshot structure. Most callers want
    /// [`Self::count`] or [`Self::last_unread_time`] instead.
    ///
    /// `snapshot.global` is present only when `include_global` is true
    /// *and* the user resolves to a federation identity.
    pub async fn counts_and_timestamps(
        &mut self,
        cx: &Cx,
        include_global: bool,
    ) -> Outcome<CountSnapshot, Error> {
        if self.local_counts.is_none() {
            let key = self.local_cache_key();
            let gateway = &self.gateway;
            let registry = &self.registry;
            let config = &self.config;
            let user_id = self.user_id;
            let out = self
                .cache
                .get_or_compute(&key, self.config.cache_ttl, &[], move || async move {
                    compute_local_counts(cx, gateway, registry, config, user_id, DataSource::Replica)
                        .await
                        .map(ComputedValue::full)
                })
                .await;
            self.local_counts = Some(try_out!(out));
        }
        let local = self.local_counts.unwrap_or_default();

        if include_global && self.global_counts.is_none() {
            match self.directory.federation_id(self.user_id) {
                None => {
                    // No federation identity: a defined degraded mode,
                    // not an error. Don't compute what we can't key.
                    self.global_counts = Some(None);
                }
                Some(global_id) => {
                    let key = self.global_cache_key(global_id);
                    let check_key = self.global_check_key(global_id);
                    let pool = self.pool.clone();
                    let peer_client = &self.peer_client;
                    let config = &self.config;
                    let out = self
                        .cache
                        .get_or_compute(
                            &key,
                            self.config.cache_ttl,
                            std::slice::from_ref(&check_key),
                            move || async move {
                                compute_global_counts(
                                    cx,
                                    pool.as_ref(),
                                    peer_client,
                                    config,
                                    global_id,
                                    &local,
                                )
                                .await
                                .map(|global| ComputedValue {
                                    value: global.counts,
                                    ttl: global.partial.then(|| config.partial_cache_ttl),
                                })
                            },
                        )
                        .await;
                    self.global_counts = Some(Some(try_out!(out)));
                }
            }
        }

        Outcome::Ok(CountSnapshot {
            local,
            global: if include_global {
                self.global_counts.flatten()
            } else {
                None
            },
        })
    }

    /// Mark notifications read. Returns whether anything changed.
    ///
    /// Malformed (non-positive) ids are filtered, not fatal; an empty
    /// list after filtering and read-only maintenance mode are both
    /// no-ops returning `false`.
    pub async fn mark_read(&mut self, cx: &Cx, event_ids: &[i64]) -> Outcome<bool, Error> {
        let ids = well_formed_ids(event_ids);
        if ids.is_empty() || self.gateway.read_only() {
            return Outcome::Ok(false);
        }

        let changed = try_out!(self.gateway.mark_read(cx, self.user_id, &ids).await);
        if changed {
            try_out!(self.reset_counts(cx).await);
            try_out!(
                talk_flag::sync_after_mark_read(
                    cx,
                    &self.gateway,
                    &self.registry,
                    &self.talk_flags,
                    self.user_id,
                )
                .await
            );
        }
        Outcome::Ok(changed)
    }

    /// Mark notifications unread. Mirror of [`Self::mark_read`].
    pub async fn mark_unread(&mut self, cx: &Cx, event_ids: &[i64]) -> Outcome<bool, Error> {
        let ids = well_formed_ids(event_ids);
        if ids.is_empty() || self.gateway.read_only() {
            return Outcome::Ok(false);
        }

        let changed = try_out!(self.gateway.mark_unread(cx, self.user_id, &ids).await);
        if changed {
            try_out!(self.reset_counts(cx).await);
            try_out!(
                talk_flag::sync_after_mark_unread(
                    cx,
                    &self.gateway,
                    &self.registry,
                    &self.talk_flags,
                    self.user_id,
                )
                .await
            );
        }
        Outcome::Ok(changed)
    }

    /// Mark up to `max_mark_all_count` unread notifications read in the
    /// given sections (`All`, or an empty list, expands to every counted
    /// section). A subsequent call continues where this one stopped, so
    /// no event is skipped permanently.
    pub async fn mark_all_read(&mut self, cx: &Cx, sections: &[Section]) -> Outcome<bool, Error> {
        if self.gateway.read_only() {
            return Outcome::Ok(false);
        }

        let expanded: Vec<Section> = if sections.is_empty() || sections.contains(&Section::All) {
            Section::COUNTED.to_vec()
        } else {
            sections.to_vec()
        };

        let event_types = self.registry.enabled_types(self.user_id, &expanded);
        if event_types.is_empty() {
            return Outcome::Ok(false);
        }

        let unread = try_out!(
            self.gateway
                .fetch_unread(
                    cx,
                    self.user_id,
                    self.config.max_mark_all_count,
                    &event_types,
                    DataSource::Replica,
                )
                .await
        );
        let ids: Vec<i64> = unread.iter().map(|event| event.id).collect();
        self.mark_read(cx, &ids).await
    }

    /// Mark every unread notification in the reserved talk category read.
    /// Called when the user visits their own talk page.
    pub async fn clear_talk_notifications(&mut self, cx: &Cx) -> Outcome<bool, Error> {
        let talk_types = self
            .registry
            .category_types(badgecount_core::USER_TALK_CATEGORY);
        if talk_types.is_empty() {
            return Outcome::Ok(false);
        }
        let unread = try_out!(
            self.gateway
                .fetch_unread(
                    cx,
                    self.user_id,
                    self.config.max_mark_all_count,
                    &talk_types,
                    DataSource::Replica,
                )
                .await
        );
        let ids: Vec<i64> = unread.iter().map(|event| event.id).collect();
        self.mark_read(cx, &ids).await
    }

    /// Explicit invalidation entry point, used by mutations here and by
    /// external actors (e.g. a new notification was inserted) that need
    /// to force staleness.
    ///
    /// Deletes the local cache entry, touches the global check key (a
    /// delete would force an expensive cross-node re-fetch on every
    /// local write), and republishes this node's summary row so peers
    /// fold in the new local state promptly. The republish is
    /// best-effort: peers would converge on the next cycle anyway.
    pub async fn reset_counts(&mut self, cx: &Cx) -> Outcome<(), Error> {
        self.local_counts = None;
        self.global_counts = None;
        self.cache.delete(&self.local_cache_key());

        if !self.config.cross_peer_enabled {
            return Outcome::Ok(());
        }
        let Some(global_id) = self.directory.federation_id(self.user_id) else {
            return Outcome::Ok(());
        };

        // Fresh local counts from the primary, so the row published for
        // peers reflects the mutation that triggered this reset.
        let local = try_out!(
            compute_local_counts(
                cx,
                &self.gateway,
                &self.registry,
                &self.config,
                self.user_id,
                DataSource::Primary,
            )
            .await
        );

        if let Some(pool) = self.pool.clone() {
            let row = UnreadPeerRow::from_buckets(
                global_id,
                self.config.node_name.clone(),
                local.alert,
                local.message,
            );
            match badgecount_db::publish_unread_peer(cx, &pool, &row).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => {
                    tracing::warn!(
                        global_id,
                        error = %e,
                        "failed to republish unread summary row"
                    );
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        self.cache.touch_check_key(&self.global_check_key(global_id));
        Outcome::Ok(())
    }

    /// When the global counts were last invalidated. Returns `None` for a
    /// user with no federation identity; a never-touched key reads as the
    /// current time.
    #[must_use]
    pub fn global_update_time(&self) -> Option<i64> {
        let global_id = self.directory.federation_id(self.user_id)?;
        let touched = self.cache.check_key_time(&self.global_check_key(global_id));
        Some(if touched == 0 { now_micros() } else { touched })
    }

    /// Ask a peer node to mark events read there. No-op (returning
    /// `false`) without a federation identity.
    pub async fn mark_read_on_peer(
        &self,
        cx: &Cx,
        peer: &str,
        event_ids: &[i64],
    ) -> Outcome<bool, Error> {
        let Some(global_id) = self.directory.federation_id(self.user_id) else {
            return Outcome::Ok(false);
        };
        let ids = well_formed_ids(event_ids);
        if ids.is_empty() {
            return Outcome::Ok(false);
        }
        let fut = Box::pin(self.peer_client.mark_read(cx, peer, global_id, &ids));
        match timeout(wall_now(), self.config.peer_timeout, fut).await {
            Ok(out) => out,
            Err(_) => Outcome::Err(Error::PeerTimeout {
                peer: peer.to_string(),
            }),
        }
    }

    /// Fetch a peer's unread notifications restricted to the given event
    /// ids. Only unread notifications can be found.
    pub async fn peer_notification_info(
        &self,
        cx: &Cx,
        peer: &str,
        event_ids: &[i64],
    ) -> Outcome<Vec<Event>, Error> {
        let Some(global_id) = self.directory.federation_id(self.user_id) else {
            return Outcome::Ok(Vec::new());
        };
        let fut = Box::pin(self.peer_client.unread_list(cx, peer, global_id));
        let listed = match timeout(wall_now(), self.config.peer_timeout, fut).await {
            Ok(out) => try_out!(out),
            Err(_) => {
                return Outcome::Err(Error::PeerTimeout {
                    peer: peer.to_string(),
                });
            }
        };
        Outcome::Ok(
            listed
                .into_iter()
                .filter(|event| event_ids.contains(&event.id))
                .collect(),
        )
    }
}

/// Keep only well-formed (positive) event ids, deduplicated, preserving
/// order.
fn well_formed_ids(event_ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    event_ids
        .iter()
        .copied()
        .filter(|id| *id > 0 && seen.insert(*id))
        .collect()
}
