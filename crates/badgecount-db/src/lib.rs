//! Per-peer unread summary storage for badgecount
//!
//! Every node in the federation periodically publishes its own capped
//! unread counts and latest-unread timestamps into the shared
//! `unread_peers` table; the local node reads everyone else's rows to
//! fold a federation-wide aggregate without a fan-out RPC on the read
//! path. This crate provides:
//! - `SQLite` operations via `sqlmodel` on frankensqlite
//! - Connection pooling
//! - Schema migrations
//!
//! # Timestamp Convention
//!
//! All timestamps are stored as `i64` (microseconds since Unix epoch),
//! with `0` meaning "no unread item" inside rows (a row whose counts are
//! all zero is deleted rather than stored).

#![forbid(unsafe_code)]

pub mod error;
pub mod models;
pub mod pool;
pub mod queries;
pub mod schema;

pub use error::{DbError, DbResult, is_lock_error};
pub use models::UnreadPeerRow;
pub use pool::{DbPool, DbPoolConfig, auto_pool_size, get_or_create_pool};
pub use queries::{
    delete_unread_peer, list_unread_peers, publish_unread_peer, purge_unread_user,
};

/// The connection type used by this crate's pool and queries.
///
/// Runtime traffic uses `FrankenConnection` for pure-Rust `SQLite`.
pub type DbConn = sqlmodel_frankensqlite::FrankenConnection;
