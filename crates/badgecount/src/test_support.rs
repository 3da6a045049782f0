//! In-memory fakes for every collaborator trait, shared by unit tests,
//! integration tests, and downstream crates that embed the engine in
//! their own test harnesses.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use asupersync::{Cx, Outcome};

use badgecount_core::model::{DataSource, Event};
use badgecount_core::section::Section;
use badgecount_core::Error;

use crate::gateway::{
    EventGateway, EventTypeRegistry, PeerClient, PeerUnreadSummary, TalkFlagStore, UserDirectory,
};

/// Run a future on a fresh single-threaded runtime with a testing `Cx`.
pub fn block_on<F, Fut, T>(f: F) -> T
where
    F: FnOnce(Cx) -> Fut,
    Fut: Future<Output = T>,
{
    let cx = Cx::for_testing();
    let rt = asupersync::runtime::RuntimeBuilder::current_thread()
        .build()
        .expect("build runtime");
    rt.block_on(f(cx))
}

#[derive(Debug, Clone)]
struct StoredEvent {
    user_id: i64,
    event: Event,
    read: bool,
}

#[derive(Debug, Default)]
struct EventStoreState {
    next_id: i64,
    events: Vec<StoredEvent>,
}

/// In-memory authoritative event store.
///
/// Single backing vector; `DataSource` is accepted but ignored because
/// there is no replication lag to model.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    state: Mutex<EventStoreState>,
    read_only: AtomicBool,
}

impl MemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an unread event; returns its id.
    pub fn insert(&self, user_id: i64, event_type: &str, timestamp_us: i64) -> i64 {
        let mut state = self.state.lock().expect("event store poisoned");
        state.next_id += 1;
        let id = state.next_id;
        state.events.push(StoredEvent {
            user_id,
            event: Event {
                id,
                event_type: event_type.to_string(),
                timestamp_us,
            },
            read: false,
        });
        id
    }

    /// Mark an event read directly, bypassing the gateway path.
    pub fn force_read(&self, user_id: i64, event_id: i64) {
        let mut state = self.state.lock().expect("event store poisoned");
        for stored in &mut state.events {
            if stored.user_id == user_id && stored.event.id == event_id {
                stored.read = true;
            }
        }
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Ids of every unread event for a user, insertion order.
    #[must_use]
    pub fn unread_ids(&self, user_id: i64) -> Vec<i64> {
        let state = self.state.lock().expect("event store poisoned");
        state
            .events
            .iter()
            .filter(|stored| stored.user_id == user_id && !stored.read)
            .map(|stored| stored.event.id)
            .collect()
    }

    fn unread_matching(&self, user_id: i64, event_types: &[String]) -> Vec<Event> {
        let state = self.state.lock().expect("event store poisoned");
        let mut events: Vec<Event> = state
            .events
            .iter()
            .filter(|stored| {
                stored.user_id == user_id
                    && !stored.read
                    && event_types.contains(&stored.event.event_type)
            })
            .map(|stored| stored.event.clone())
            .collect();
        // Most recent first; newest id wins ties.
        events.sort_by(|a, b| {
            b.timestamp_us
                .cmp(&a.timestamp_us)
                .then_with(|| b.id.cmp(&a.id))
        });
        events
    }
}

impl EventGateway for MemoryEventStore {
    fn count_unread(
        &self,
        _cx: &Cx,
        user_id: i64,
        event_types: &[String],
        cap: i64,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let count = i64::try_from(self.unread_matching(user_id, event_types).len())
            .unwrap_or(i64::MAX)
            .min(cap);
        async move { Outcome::Ok(count) }
    }

    fn fetch_unread(
        &self,
        _cx: &Cx,
        user_id: i64,
        limit: usize,
        event_types: &[String],
        _source: DataSource,
    ) -> impl Future<Output = Outcome<Vec<Event>, Error>> + Send {
        let mut events = self.unread_matching(user_id, event_types);
        events.truncate(limit);
        async move { Outcome::Ok(events) }
    }

    fn mark_read(
        &self,
        _cx: &Cx,
        user_id: i64,
        event_ids: &[i64],
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let mut changed = false;
        {
            let mut state = self.state.lock().expect("event store poisoned");
            for stored in &mut state.events {
                if stored.user_id == user_id && event_ids.contains(&stored.event.id) && !stored.read
                {
                    stored.read = true;
                    changed = true;
                }
            }
        }
        async move { Outcome::Ok(changed) }
    }

    fn mark_unread(
        &self,
        _cx: &Cx,
        user_id: i64,
        event_ids: &[i64],
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let mut changed = false;
        {
            let mut state = self.state.lock().expect("event store poisoned");
            for stored in &mut state.events {
                if stored.user_id == user_id && event_ids.contains(&stored.event.id) && stored.read
                {
                    stored.read = false;
                    changed = true;
                }
            }
        }
        async move { Outcome::Ok(changed) }
    }

    fn read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }
}

/// Static section/category to event-type mapping.
#[derive(Debug, Clone, Default)]
pub struct MapTypeRegistry {
    sections: HashMap<Section, Vec<String>>,
    categories: HashMap<String, Vec<String>>,
}

impl MapTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_section(mut self, section: Section, event_types: &[&str]) -> Self {
        self.sections.insert(
            section,
            event_types.iter().map(ToString::to_string).collect(),
        );
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: &str, event_types: &[&str]) -> Self {
        self.categories.insert(
            category.to_string(),
            event_types.iter().map(ToString::to_string).collect(),
        );
        self
    }
}

impl EventTypeRegistry for MapTypeRegistry {
    fn enabled_types(&self, _user_id: i64, sections: &[Section]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut types = Vec::new();
        for section in sections {
            if let Some(section_types) = self.sections.get(section) {
                for event_type in section_types {
                    if seen.insert(event_type.clone()) {
                        types.push(event_type.clone());
                    }
                }
            }
        }
        types
    }

    fn category_types(&self, category: &str) -> Vec<String> {
        self.categories.get(category).cloned().unwrap_or_default()
    }
}

/// Static identity/preference directory.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    federation: HashMap<i64, i64>,
    opted_in: HashSet<i64>,
}

impl StaticDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_federation_id(mut self, user_id: i64, global_id: i64) -> Self {
        self.federation.insert(user_id, global_id);
        self
    }

    #[must_use]
    pub fn with_opt_in(mut self, user_id: i64) -> Self {
        self.opted_in.insert(user_id);
        self
    }
}

impl UserDirectory for StaticDirectory {
    fn federation_id(&self, user_id: i64) -> Option<i64> {
        self.federation.get(&user_id).copied()
    }

    fn cross_peer_opted_in(&self, user_id: i64) -> bool {
        self.opted_in.contains(&user_id)
    }
}

/// In-memory talk flag with a write counter, so tests can assert the
/// engine never issues redundant external writes.
#[derive(Debug, Default)]
pub struct MemoryTalkFlag {
    flags: Mutex<HashSet<i64>>,
    writes: AtomicU64,
}

impl MemoryTalkFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the flag without counting it as an engine write.
    pub fn force_set(&self, user_id: i64) {
        self.flags.lock().expect("talk flag poisoned").insert(user_id);
    }

    #[must_use]
    pub fn is_set(&self, user_id: i64) -> bool {
        self.flags
            .lock()
            .expect("talk flag poisoned")
            .contains(&user_id)
    }

    /// Number of set/clear writes issued through the trait.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl TalkFlagStore for MemoryTalkFlag {
    fn has_flag(&self, _cx: &Cx, user_id: i64) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let set = self.is_set(user_id);
        async move { Outcome::Ok(set) }
    }

    fn set_flag(&self, _cx: &Cx, user_id: i64) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.flags.lock().expect("talk flag poisoned").insert(user_id);
        self.writes.fetch_add(1, Ordering::SeqCst);
        async move { Outcome::Ok(()) }
    }

    fn clear_flag(
        &self,
        _cx: &Cx,
        user_id: i64,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.flags
            .lock()
            .expect("talk flag poisoned")
            .remove(&user_id);
        self.writes.fetch_add(1, Ordering::SeqCst);
        async move { Outcome::Ok(()) }
    }
}

/// Scripted peer client. Peers without scripted data return an empty
/// summary/list; peers registered with [`Self::with_failure`] error.
#[derive(Debug, Default)]
pub struct StaticPeerClient {
    summaries: HashMap<(String, i64), PeerUnreadSummary>,
    lists: HashMap<(String, i64), Vec<Event>>,
    failures: HashSet<String>,
    mark_read_calls: Mutex<Vec<(String, i64, Vec<i64>)>>,
}

impl StaticPeerClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_summary(mut self, peer: &str, global_id: i64, summary: PeerUnreadSummary) -> Self {
        self.summaries.insert((peer.to_string(), global_id), summary);
        self
    }

    #[must_use]
    pub fn with_unread_list(mut self, peer: &str, global_id: i64, events: Vec<Event>) -> Self {
        self.lists.insert((peer.to_string(), global_id), events);
        self
    }

    #[must_use]
    pub fn with_failure(mut self, peer: &str) -> Self {
        self.failures.insert(peer.to_string());
        self
    }

    /// Every mark-read request issued through this client.
    #[must_use]
    pub fn mark_read_calls(&self) -> Vec<(String, i64, Vec<i64>)> {
        self.mark_read_calls
            .lock()
            .expect("peer client poisoned")
            .clone()
    }

    fn failure(&self, peer: &str) -> Option<Error> {
        self.failures.contains(peer).then(|| Error::PeerRpc {
            peer: peer.to_string(),
            message: "connection refused".to_string(),
        })
    }
}

impl PeerClient for StaticPeerClient {
    fn unread_summary(
        &self,
        _cx: &Cx,
        peer: &str,
        global_id: i64,
    ) -> impl Future<Output = Outcome<PeerUnreadSummary, Error>> + Send {
        let result = self.failure(peer).map_or_else(
            || {
                Outcome::Ok(
                    self.summaries
                        .get(&(peer.to_string(), global_id))
                        .copied()
                        .unwrap_or_default(),
                )
            },
            Outcome::Err,
        );
        async move { result }
    }

    fn mark_read(
        &self,
        _cx: &Cx,
        peer: &str,
        global_id: i64,
        event_ids: &[i64],
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let result = match self.failure(peer) {
            Some(err) => Outcome::Err(err),
            None => {
                self.mark_read_calls
                    .lock()
                    .expect("peer client poisoned")
                    .push((peer.to_string(), global_id, event_ids.to_vec()));
                Outcome::Ok(!event_ids.is_empty())
            }
        };
        async move { result }
    }

    fn unread_list(
        &self,
        _cx: &Cx,
        peer: &str,
        global_id: i64,
    ) -> impl Future<Output = Outcome<Vec<Event>, Error>> + Send {
        let result = match self.failure(peer) {
            Some(err) => Outcome::Err(err),
            None => Outcome::Ok(
                self.lists
                    .get(&(peer.to_string(), global_id))
                    .cloned()
                    .unwrap_or_default(),
            ),
        };
        async move { result }
    }
}
