//! Configuration management for badgecount
//!
//! Configuration is loaded from environment variables. Parsing is
//! tolerant: a missing or malformed value falls back to the default for
//! that option rather than failing startup.

use std::env;
use std::time::Duration;

/// Default display cap; counts above it are stored as `cap + 1` ("99+").
pub const DEFAULT_MAX_BADGE_COUNT: i64 = 99;

/// Default bound on events processed by a single mark-all-read call.
pub const DEFAULT_MAX_MARK_ALL_COUNT: usize = 2000;

/// Default TTL for cached count snapshots (24 hours).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 86_400;

/// Default short TTL for aggregates computed from partial peer data.
pub const DEFAULT_PARTIAL_CACHE_TTL_SECONDS: u64 = 60;

/// Default per-peer RPC budget.
pub const DEFAULT_PEER_TIMEOUT_MS: u64 = 3_000;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether cross-node aggregation is available at all. When false,
    /// `Global`/`FollowPreference` queries silently degrade to local.
    pub cross_peer_enabled: bool,
    /// Display cap; the stored maximum is `max_badge_count + 1`.
    pub max_badge_count: i64,
    /// Upper bound on events marked read by one mark-all-read call.
    pub max_mark_all_count: usize,
    /// TTL for cached count snapshots.
    pub cache_ttl: Duration,
    /// TTL for aggregates based on partial peer data.
    pub partial_cache_ttl: Duration,
    /// Per-peer RPC timeout.
    pub peer_timeout: Duration,
    /// Name of this node in the federation (its summary-row key).
    pub node_name: String,
    /// Peer node names queried by the live RPC fallback.
    pub peers: Vec<String>,
    /// Version stamp mixed into cache keys; bump to orphan old entries.
    pub cache_version: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cross_peer_enabled: false,
            max_badge_count: DEFAULT_MAX_BADGE_COUNT,
            max_mark_all_count: DEFAULT_MAX_MARK_ALL_COUNT,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            partial_cache_ttl: Duration::from_secs(DEFAULT_PARTIAL_CACHE_TTL_SECONDS),
            peer_timeout: Duration::from_millis(DEFAULT_PEER_TIMEOUT_MS),
            node_name: "local".to_string(),
            peers: Vec::new(),
            cache_version: 1,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env_value(key))
    }

    /// Load configuration through an arbitrary key lookup (testable core
    /// of [`Config::from_env`]).
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            cross_peer_enabled: lookup("BADGECOUNT_CROSS_PEER_ENABLED")
                .as_deref()
                .and_then(parse_bool)
                .unwrap_or(defaults.cross_peer_enabled),
            max_badge_count: lookup("BADGECOUNT_MAX_BADGE_COUNT")
                .and_then(|s| s.parse::<i64>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_badge_count),
            max_mark_all_count: lookup("BADGECOUNT_MAX_MARK_ALL_COUNT")
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_mark_all_count),
            cache_ttl: lookup("BADGECOUNT_CACHE_TTL_SECONDS")
                .and_then(|s| s.parse::<u64>().ok())
                .map_or(defaults.cache_ttl, Duration::from_secs),
            partial_cache_ttl: lookup("BADGECOUNT_PARTIAL_CACHE_TTL_SECONDS")
                .and_then(|s| s.parse::<u64>().ok())
                .map_or(defaults.partial_cache_ttl, Duration::from_secs),
            peer_timeout: lookup("BADGECOUNT_PEER_TIMEOUT_MS")
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|n| *n > 0)
                .map_or(defaults.peer_timeout, Duration::from_millis),
            node_name: lookup("BADGECOUNT_NODE_NAME").unwrap_or(defaults.node_name),
            peers: lookup("BADGECOUNT_PEERS")
                .map(|s| parse_list(&s))
                .unwrap_or(defaults.peers),
            cache_version: lookup("BADGECOUNT_CACHE_VERSION")
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(defaults.cache_version),
        }
    }

    /// The stored count ceiling, `max_badge_count + 1`.
    #[must_use]
    pub const fn badge_ceiling(&self) -> i64 {
        self.max_badge_count + 1
    }
}

/// Read a non-empty, trimmed environment value.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(ToString::to_string)
        .collect()
}
