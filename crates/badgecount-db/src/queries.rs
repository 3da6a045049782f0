//! Query operations for the per-peer unread summary table.
//!
//! These functions are the storage truth for peer aggregation: the engine
//! reads every other node's row through [`list_unread_peers`] and
//! republishes the local node's row through [`publish_unread_peer`] after
//! each mutation.

use crate::error::DbError;
use crate::models::UnreadPeerRow;
use crate::pool::DbPool;
use asupersync::{Cx, Outcome};
use sqlmodel::prelude::*;
use sqlmodel_core::{Error as SqlError, Row as SqlRow, Value};
use sqlmodel_query::{raw_execute, raw_query};

fn map_sql_error(e: &SqlError) -> DbError {
    DbError::Sqlite(e.to_string())
}

fn map_sql_outcome<T>(out: Outcome<T, SqlError>) -> Outcome<T, DbError> {
    match out {
        Outcome::Ok(v) => Outcome::Ok(v),
        Outcome::Err(e) => Outcome::Err(map_sql_error(&e)),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

async fn acquire_conn(
    cx: &Cx,
    pool: &DbPool,
) -> Outcome<sqlmodel_pool::PooledConnection<crate::DbConn>, DbError> {
    map_sql_outcome(pool.acquire(cx).await)
}

fn get_i64(row: &SqlRow, idx: usize) -> i64 {
    row.get(idx)
        .and_then(|v| match v {
            Value::BigInt(n) => Some(*n),
            Value::Int(n) => Some(i64::from(*n)),
            _ => None,
        })
        .unwrap_or(0)
}

fn get_string(row: &SqlRow, idx: usize) -> String {
    row.get(idx)
        .and_then(|v| match v {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Decode an `UnreadPeerRow` using positional column access.
/// Expected column order: `global_id`, `peer`, `alert_count`, `alert_ts`,
/// `message_count`, `message_ts`, `updated_ts`.
fn decode_unread_peer_row(row: &SqlRow) -> UnreadPeerRow {
    UnreadPeerRow {
        global_id: get_i64(row, 0),
        peer: get_string(row, 1),
        alert_count: get_i64(row, 2),
        alert_ts: get_i64(row, 3),
        message_count: get_i64(row, 4),
        message_ts: get_i64(row, 5),
        updated_ts: get_i64(row, 6),
    }
}

const UNREAD_PEER_SELECT_SQL: &str = "SELECT global_id, peer, alert_count, alert_ts, \
     message_count, message_ts, updated_ts \
     FROM unread_peers WHERE global_id = ? ORDER BY peer ASC";

/// Rollback the current transaction (best-effort, errors ignored).
async fn rollback_tx(cx: &Cx, conn: &crate::DbConn) {
    let _ = raw_execute(cx, conn, "ROLLBACK", &[]).await;
}

/// Unwrap an `Outcome` inside a transaction: on non-`Ok`, rollback and
/// return early.
macro_rules! try_in_tx {
    ($cx:expr, $conn:expr, $out:expr) => {
        match $out {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => {
                rollback_tx($cx, $conn).await;
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => {
                rollback_tx($cx, $conn).await;
                return Outcome::Cancelled(r);
            }
            Outcome::Panicked(p) => {
                rollback_tx($cx, $conn).await;
                return Outcome::Panicked(p);
            }
        }
    };
}

/// List every node's published summary row for a federation user,
/// ordered by peer name.
pub async fn list_unread_peers(
    cx: &Cx,
    pool: &DbPool,
    global_id: i64,
) -> Outcome<Vec<UnreadPeerRow>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let params = [Value::BigInt(global_id)];
    match map_sql_outcome(raw_query(cx, &*conn, UNREAD_PEER_SELECT_SQL, &params).await) {
        Outcome::Ok(rows) => Outcome::Ok(rows.iter().map(decode_unread_peer_row).collect()),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Publish (replace) one node's summary row for a federation user.
///
/// A row with all counts at zero deletes any existing row instead of
/// storing zeros, so readers can treat row presence as "this node has
/// something unread".
pub async fn publish_unread_peer(
    cx: &Cx,
    pool: &DbPool,
    row: &UnreadPeerRow,
) -> Outcome<(), DbError> {
    if row.peer.is_empty() {
        return Outcome::Err(DbError::invalid("peer", "peer name must not be empty"));
    }

    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    // Replace = delete + conditional insert, batched in one transaction.
    try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(raw_execute(cx, &*conn, "BEGIN IMMEDIATE", &[]).await)
    );

    let delete_params = [
        Value::BigInt(row.global_id),
        Value::Text(row.peer.clone()),
    ];
    try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            raw_execute(
                cx,
                &*conn,
                "DELETE FROM unread_peers WHERE global_id = ? AND peer = ?",
                &delete_params,
            )
            .await
        )
    );

    if row.is_empty() {
        tracing::debug!(
            global_id = row.global_id,
            peer = %row.peer,
            "published empty summary; row removed"
        );
    } else {
        try_in_tx!(
            cx,
            &conn,
            map_sql_outcome(insert!(row).execute(cx, &*conn).await)
        );
    }

    try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(raw_execute(cx, &*conn, "COMMIT", &[]).await)
    );
    Outcome::Ok(())
}

/// Delete one node's summary row. Returns whether a row was removed.
pub async fn delete_unread_peer(
    cx: &Cx,
    pool: &DbPool,
    global_id: i64,
    peer: &str,
) -> Outcome<bool, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let params = [Value::BigInt(global_id), Value::Text(peer.to_string())];
    match map_sql_outcome(
        raw_execute(
            cx,
            &*conn,
            "DELETE FROM unread_peers WHERE global_id = ? AND peer = ?",
            &params,
        )
        .await,
    ) {
        Outcome::Ok(rows) => Outcome::Ok(rows > 0),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Remove every summary row for a federation user (account deletion,
/// identity unlinking). Returns the number of rows removed.
pub async fn purge_unread_user(
    cx: &Cx,
    pool: &DbPool,
    global_id: i64,
) -> Outcome<u64, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let params = [Value::BigInt(global_id)];
    map_sql_outcome(
        raw_execute(
            cx,
            &*conn,
            "DELETE FROM unread_peers WHERE global_id = ?",
            &params,
        )
        .await,
    )
}
