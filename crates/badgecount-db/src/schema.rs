//! Database schema creation and migrations for the summary store.

use asupersync::{Cx, Outcome};
use sqlmodel_core::{Connection, Error as SqlError};
use sqlmodel_schema::{Migration, MigrationRunner};

/// DDL for the per-peer unread summary table.
///
/// One row per (federation user, node): the node's already-capped unread
/// counts and latest-unread timestamps per section, as last published by
/// that node. `0` in a `_ts` column means "no unread item in that
/// section"; rows with both counts at zero are deleted, not stored.
pub const CREATE_UNREAD_PEERS_SQL: &str = "\
CREATE TABLE IF NOT EXISTS unread_peers (
    global_id INTEGER NOT NULL,
    peer TEXT NOT NULL,
    alert_count INTEGER NOT NULL DEFAULT 0,
    alert_ts INTEGER NOT NULL DEFAULT 0,
    message_count INTEGER NOT NULL DEFAULT 0,
    message_ts INTEGER NOT NULL DEFAULT 0,
    updated_ts INTEGER NOT NULL,
    PRIMARY KEY (global_id, peer)
)";

/// All table DDL, for direct execution on fresh in-memory connections.
pub const CREATE_TABLES_SQL: &str = CREATE_UNREAD_PEERS_SQL;

/// One-time, per-file PRAGMAs applied by the init gate before migrations.
pub const PRAGMA_DB_INIT_SQL: &str = "PRAGMA busy_timeout = 60000;";

/// Per-connection PRAGMAs applied to every pooled connection.
pub const PRAGMA_CONN_SQL: &str = "\
PRAGMA busy_timeout = 60000;
PRAGMA cache_size = -8192;
PRAGMA temp_store = MEMORY;
";

/// Name of the schema migration tracking table.
pub const MIGRATIONS_TABLE_NAME: &str = "badgecount_migrations";

/// The complete list of schema migrations.
///
/// Each `up` is a single `SQLite` statement (compatible with
/// `sqlmodel_sqlite::SqliteConnection::execute_sync`, which only executes
/// the first prepared statement).
#[must_use]
pub fn schema_migrations() -> Vec<Migration> {
    vec![Migration::new(
        "v1_create_table_unread_peers".to_string(),
        "create table unread_peers".to_string(),
        CREATE_UNREAD_PEERS_SQL.trim().to_string(),
        String::new(),
    )]
}

#[must_use]
pub fn migration_runner() -> MigrationRunner {
    MigrationRunner::new(schema_migrations()).table_name(MIGRATIONS_TABLE_NAME)
}

pub async fn init_migrations_table<C: Connection>(cx: &Cx, conn: &C) -> Outcome<(), SqlError> {
    // Duplicate inserts must be ignored: under concurrency, multiple
    // connections may attempt to record the same migration id.
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE_NAME} (
            id TEXT PRIMARY KEY ON CONFLICT IGNORE,
            description TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )"
    );
    conn.execute(cx, &sql, &[]).await.map(|_| ())
}

pub async fn migrate_to_latest<C: Connection>(cx: &Cx, conn: &C) -> Outcome<Vec<String>, SqlError> {
    match init_migrations_table(cx, conn).await {
        Outcome::Ok(()) => {}
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    }
    migration_runner().migrate(cx, conn).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use sqlmodel_sqlite::SqliteConnection;

    fn block_on<F, Fut, T>(f: F) -> T
    where
        F: FnOnce(Cx) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let cx = Cx::for_testing();
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("build runtime");
        rt.block_on(f(cx))
    }

    #[test]
    fn migrations_apply_and_are_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("migrations_apply.db");
        let conn = SqliteConnection::open_file(db_path.display().to_string())
            .expect("open sqlite connection");

        let applied = block_on({
            let conn = &conn;
            move |cx| async move { migrate_to_latest(&cx, conn).await.into_result().unwrap() }
        });
        assert!(
            !applied.is_empty(),
            "fresh DB should apply at least one migration"
        );

        let applied2 = block_on({
            let conn = &conn;
            move |cx| async move { migrate_to_latest(&cx, conn).await.into_result().unwrap() }
        });
        assert!(
            applied2.is_empty(),
            "second migrate call should be idempotent"
        );
    }

    #[test]
    fn migrations_preserve_existing_data() {
        use sqlmodel_core::Value;

        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("migrations_preserve.db");
        let conn = SqliteConnection::open_file(db_path.display().to_string())
            .expect("open sqlite connection");

        // Simulate an older DB that already has the table plus a row.
        conn.execute_sync(CREATE_UNREAD_PEERS_SQL, &[])
            .expect("create unread_peers table");
        conn.execute_sync(
            "INSERT INTO unread_peers (global_id, peer, alert_count, alert_ts, message_count, message_ts, updated_ts) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            &[
                Value::BigInt(7),
                Value::Text("remotewiki".to_string()),
                Value::BigInt(3),
                Value::BigInt(1000),
                Value::BigInt(0),
                Value::BigInt(0),
                Value::BigInt(2000),
            ],
        )
        .expect("insert summary row");

        block_on({
            let conn = &conn;
            move |cx| async move { migrate_to_latest(&cx, conn).await.into_result().unwrap() }
        });

        let rows = conn
            .query_sync("SELECT peer, alert_count FROM unread_peers", &[])
            .expect("query unread_peers");
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get_named::<String>("peer").unwrap_or_default(),
            "remotewiki"
        );
    }
}
