//! Connection pool configuration and initialization
//!
//! Uses `sqlmodel_pool` for connection management. File-backed databases
//! run their one-time init (PRAGMAs + migrations) through a C-backed
//! `SqliteConnection` behind a per-file gate before any `FrankenConnection`
//! opens the file; the two must never be open on the same file at the
//! same time.

use crate::DbConn;
use crate::error::{DbError, DbResult};
use crate::schema;
use asupersync::sync::OnceCell;
use asupersync::{Cx, Outcome};
use badgecount_core::config::env_value;
use badgecount_core::{LockLevel, OrderedRwLock};
use sqlmodel_core::Error as SqlError;
use sqlmodel_pool::{Pool, PoolConfig, PooledConnection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Default pool sizing.
///
/// The summary table sees one short read per cache miss and one short
/// write per mutation, so the pool stays small: `min=5, max=20` unless
/// overridden. The acquire timeout fails fast instead of letting callers
/// hang behind a wedged writer.
pub const DEFAULT_POOL_SIZE: usize = 5;
pub const DEFAULT_MAX_OVERFLOW: usize = 15;
pub const DEFAULT_POOL_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_POOL_RECYCLE_MS: u64 = 30 * 60 * 1000; // 30 minutes

/// Auto-detect a reasonable pool size from available CPU parallelism.
///
/// Returns `(min_connections, max_connections)`:
/// `min = clamp(cpus, 4, 16)`, `max = clamp(cpus * 4, 16, 64)`.
/// Used when `DATABASE_POOL_SIZE=auto` (or is unset).
#[must_use]
pub fn auto_pool_size() -> (usize, usize) {
    let cpus = std::thread::available_parallelism().map_or(4, std::num::NonZero::get);
    let min = cpus.clamp(4, 16);
    let max = (cpus * 4).clamp(16, 64);
    (min, max)
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct DbPoolConfig {
    /// Database URL (`sqlite:///path/to/db.sqlite3`)
    pub database_url: String,
    /// Minimum connections to keep open
    pub min_connections: usize,
    /// Maximum connections
    pub max_connections: usize,
    /// Timeout for acquiring a connection (ms)
    pub acquire_timeout_ms: u64,
    /// Max connection lifetime (ms)
    pub max_lifetime_ms: u64,
    /// Run migrations on init
    pub run_migrations: bool,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:///./unread_peers.sqlite3".to_string(),
            min_connections: DEFAULT_POOL_SIZE,
            max_connections: DEFAULT_POOL_SIZE + DEFAULT_MAX_OVERFLOW,
            acquire_timeout_ms: DEFAULT_POOL_TIMEOUT_MS,
            max_lifetime_ms: DEFAULT_POOL_RECYCLE_MS,
            run_migrations: true,
        }
    }
}

impl DbPoolConfig {
    /// Create config from environment.
    ///
    /// Pool sizing honours, in priority order: explicit numeric
    /// `DATABASE_POOL_SIZE` / `DATABASE_MAX_OVERFLOW`, then `auto`
    /// detection from CPU count.
    #[must_use]
    pub fn from_env() -> Self {
        let database_url = env_value("DATABASE_URL")
            .unwrap_or_else(|| "sqlite:///./unread_peers.sqlite3".to_string());

        let pool_timeout = env_value("DATABASE_POOL_TIMEOUT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_POOL_TIMEOUT_MS);

        let explicit_size =
            env_value("DATABASE_POOL_SIZE").and_then(|s| s.parse::<usize>().ok());
        let explicit_overflow =
            env_value("DATABASE_MAX_OVERFLOW").and_then(|s| s.parse::<usize>().ok());

        let (min_conn, max_conn) = match (explicit_size, explicit_overflow) {
            (Some(size), Some(overflow)) => (size, size + overflow),
            (Some(size), None) => (size, size + DEFAULT_MAX_OVERFLOW),
            (None, maybe_overflow) => {
                let (auto_min, auto_max) = auto_pool_size();
                maybe_overflow.map_or((auto_min, auto_max), |overflow| {
                    (auto_min, auto_min + overflow)
                })
            }
        };

        Self {
            database_url,
            min_connections: min_conn,
            max_connections: max_conn,
            acquire_timeout_ms: pool_timeout,
            max_lifetime_ms: DEFAULT_POOL_RECYCLE_MS,
            run_migrations: true,
        }
    }

    /// Parse the `SQLite` path from the database URL.
    pub fn sqlite_path(&self) -> DbResult<String> {
        let rest = self
            .database_url
            .strip_prefix("sqlite:///")
            .or_else(|| self.database_url.strip_prefix("sqlite+aiosqlite:///"))
            .ok_or_else(|| {
                DbError::invalid(
                    "database_url",
                    format!(
                        "Invalid SQLite database URL: {} (expected sqlite:///path/to/db.sqlite3)",
                        self.database_url
                    ),
                )
            })?;

        // Drop query string / fragment
        let rest = rest.split(['?', '#']).next().unwrap_or(rest);

        if rest.is_empty() || rest.starts_with(":memory:") {
            return Ok(":memory:".to_string());
        }
        Ok(rest.to_string())
    }
}

/// A configured `SQLite` connection pool with schema initialization.
#[derive(Clone)]
pub struct DbPool {
    pool: Arc<Pool<DbConn>>,
    sqlite_path: String,
    run_migrations: bool,
}

impl DbPool {
    /// Create a new pool (does not open connections until first acquire).
    pub fn new(config: &DbPoolConfig) -> DbResult<Self> {
        let sqlite_path = config.sqlite_path()?;

        let pool_config = PoolConfig::new(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout_ms)
            .max_lifetime(config.max_lifetime_ms)
            .test_on_checkout(true)
            .test_on_return(false);

        Ok(Self {
            pool: Arc::new(Pool::new(pool_config)),
            sqlite_path,
            run_migrations: config.run_migrations,
        })
    }

    #[must_use]
    pub fn sqlite_path(&self) -> &str {
        &self.sqlite_path
    }

    /// Acquire a pooled connection, creating and initializing a new one
    /// if needed.
    pub async fn acquire(&self, cx: &Cx) -> Outcome<PooledConnection<DbConn>, SqlError> {
        let sqlite_path = self.sqlite_path.clone();
        let run_migrations = self.run_migrations;
        let cx2 = cx.clone();

        self.pool
            .acquire(cx, || {
                let sqlite_path = sqlite_path.clone();
                let cx2 = cx2.clone();
                async move {
                    if sqlite_path != ":memory:" {
                        // Ensure parent directory exists for file-backed DBs.
                        if let Some(parent) = Path::new(&sqlite_path).parent() {
                            if !parent.as_os_str().is_empty() {
                                if let Err(e) = std::fs::create_dir_all(parent) {
                                    return Outcome::Err(SqlError::Custom(format!(
                                        "failed to create db dir {}: {e}",
                                        parent.display()
                                    )));
                                }
                            }
                        }

                        // DB-wide init (PRAGMAs + migrations) runs once per
                        // file through a C-backed SqliteConnection, fully
                        // closed before any FrankenConnection opens the file.
                        let init_gate = sqlite_init_gate(&sqlite_path);
                        let gate_out = init_gate
                            .get_or_try_init(|| {
                                let cx2 = cx2.clone();
                                let sqlite_path = sqlite_path.clone();
                                async move {
                                    let mig_conn =
                                        sqlmodel_sqlite::SqliteConnection::open_file(&sqlite_path)
                                            .map_err(Outcome::<(), SqlError>::Err)?;

                                    if let Err(e) =
                                        mig_conn.execute_raw(schema::PRAGMA_DB_INIT_SQL)
                                    {
                                        return Err(Outcome::Err(e));
                                    }
                                    if run_migrations {
                                        match schema::migrate_to_latest(&cx2, &mig_conn).await {
                                            Outcome::Ok(_) => {}
                                            Outcome::Err(e) => return Err(Outcome::Err(e)),
                                            Outcome::Cancelled(r) => {
                                                return Err(Outcome::Cancelled(r));
                                            }
                                            Outcome::Panicked(p) => {
                                                return Err(Outcome::Panicked(p));
                                            }
                                        }
                                    }
                                    // Close SqliteConnection before
                                    // FrankenConnection opens the file.
                                    drop(mig_conn);
                                    Ok(())
                                }
                            })
                            .await;

                        match gate_out {
                            Ok(()) => {}
                            Err(Outcome::Err(e)) => return Outcome::Err(e),
                            Err(Outcome::Cancelled(r)) => return Outcome::Cancelled(r),
                            Err(Outcome::Panicked(p)) => return Outcome::Panicked(p),
                            Err(Outcome::Ok(())) => {
                                unreachable!("sqlite init gate returned Err(Outcome::Ok(()))")
                            }
                        }
                    }

                    let conn = if sqlite_path == ":memory:" {
                        match DbConn::open_memory() {
                            Ok(c) => c,
                            Err(e) => return Outcome::Err(e),
                        }
                    } else {
                        match DbConn::open_file(&sqlite_path) {
                            Ok(c) => c,
                            Err(e) => return Outcome::Err(e),
                        }
                    };

                    if let Err(e) = conn.execute_raw(schema::PRAGMA_CONN_SQL) {
                        return Outcome::Err(e);
                    }

                    // In-memory connections are each their own database, so
                    // the schema is created directly per connection.
                    if sqlite_path == ":memory:" {
                        if let Err(e) = conn.execute_raw(schema::CREATE_TABLES_SQL) {
                            return Outcome::Err(e);
                        }
                    }

                    Outcome::Ok(conn)
                }
            })
            .await
    }
}

static SQLITE_INIT_GATES: OnceLock<OrderedRwLock<HashMap<String, Arc<OnceCell<()>>>>> =
    OnceLock::new();
static POOL_CACHE: OnceLock<OrderedRwLock<HashMap<String, DbPool>>> = OnceLock::new();

fn sqlite_init_gate(sqlite_path: &str) -> Arc<OnceCell<()>> {
    let gates = SQLITE_INIT_GATES
        .get_or_init(|| OrderedRwLock::new(LockLevel::DbInitGates, HashMap::new()));

    // Fast path: read lock for an existing gate.
    {
        let guard = gates.read();
        if let Some(gate) = guard.get(sqlite_path) {
            return Arc::clone(gate);
        }
    }

    // Slow path: write lock to create the gate (once per SQLite file).
    let mut guard = gates.write();
    if let Some(gate) = guard.get(sqlite_path) {
        return Arc::clone(gate);
    }
    let gate = Arc::new(OnceCell::new());
    guard.insert(sqlite_path.to_string(), Arc::clone(&gate));
    gate
}

/// Get (or create) a cached pool for the given config.
///
/// Read-first / write-on-miss so concurrent callers sharing the same
/// database URL only take a shared read lock on the hot path.
pub fn get_or_create_pool(config: &DbPoolConfig) -> DbResult<DbPool> {
    let cache =
        POOL_CACHE.get_or_init(|| OrderedRwLock::new(LockLevel::DbPoolCache, HashMap::new()));

    {
        let guard = cache.read();
        if let Some(pool) = guard.get(&config.database_url) {
            return Ok(pool.clone());
        }
    }

    let mut guard = cache.write();
    if let Some(pool) = guard.get(&config.database_url) {
        return Ok(pool.clone());
    }

    let pool = DbPool::new(config)?;
    guard.insert(config.database_url.clone(), pool.clone());
    drop(guard);
    Ok(pool)
}
