//! Table and partition lifecycle: initial `CREATE TABLE`, rolling forward
//! new partitions, and dropping the oldest ones once retention is exceeded.
//! Issues DDL built by `tidb-slow-query-core::schema` over a live connection.

use chrono::{DateTime, Utc};
use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use snafu::ResultExt;
use tidb_slow_query_core::schema;

use crate::error::{DdlSnafu, ListPartitionsSnafu, Result};

/// Creates `table` with an initial set of `roll_step` day partitions
/// starting from `at`, and reports it to TiFlash as a columnar replica.
pub async fn create_table(
    conn: &mut Conn,
    database: &str,
    table: &str,
    at: DateTime<Utc>,
    roll_step: u32,
) -> Result<()> {
    let boundaries = schema::partition_boundaries(at, roll_step);
    let stmt = schema::create_table_stmt(database, table, &boundaries);
    conn.query_drop(&stmt)
        .await
        .context(DdlSnafu { table: table.to_string() })?;

    let tiflash_stmt = schema::enable_columnar_replica_stmt(database, table);
    // Best-effort: a cluster without TiFlash nodes configured will error
    // here and that's fine, the row table still exists and is writable.
    let _ = conn.query_drop(&tiflash_stmt).await;
    Ok(())
}

/// Rolls `table` forward: adds `roll_step` new day partitions starting from
/// `at`, dropping the oldest ones first if doing so would otherwise exceed
/// `retention` partitions.
pub async fn create_partitions(
    conn: &mut Conn,
    database: &str,
    table: &str,
    at: DateTime<Utc>,
    roll_step: u32,
    retention: u32,
) -> Result<()> {
    let existing = list_partitions(conn, database, table).await?;
    if existing.len() as u32 + roll_step > retention {
        let to_drop = &existing[..roll_step.min(existing.len() as u32) as usize];
        if !to_drop.is_empty() {
            let drop_stmt = schema::drop_partition_stmt(database, table, to_drop);
            conn.query_drop(&drop_stmt)
                .await
                .context(DdlSnafu { table: table.to_string() })?;
        }
    }

    let boundaries = schema::partition_boundaries(at, roll_step);
    let add_stmt = schema::add_partition_stmt(database, table, &boundaries);
    conn.query_drop(&add_stmt)
        .await
        .context(DdlSnafu { table: table.to_string() })
}

/// Lists `table`'s existing partition names, oldest first.
pub async fn list_partitions(conn: &mut Conn, database: &str, table: &str) -> Result<Vec<String>> {
    let stmt = schema::list_partitions_stmt(database, table);
    conn.query(&stmt)
        .await
        .context(ListPartitionsSnafu { table: table.to_string() })
}
