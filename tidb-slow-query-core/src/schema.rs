//! The fixed column set of a slow-query table, and the DDL/DML text builders
//! that operate on it.
//!
//! Column names and SQL types are reproduced from the TiDB executor's slow
//! query tuple; the order here is a stable alphabetical sort, so that DDL
//! and DML generated by this module is byte-for-byte stable across runs
//! and builds rather than depending on iteration order over an unordered
//! map.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

/// `(column name, SQL type)`, sorted alphabetically by column name.
pub const COLUMNS: &[(&str, &str)] = &[
    ("Backoff_Detail", "varchar(4096)"),
    ("Backoff_time", "double"),
    ("Backoff_total", "double"),
    ("Backoff_types", "varchar(64)"),
    ("Commit_backoff_time", "double"),
    ("Commit_time", "double"),
    ("Compile_time", "double"),
    ("Conn_ID", "bigint(20) unsigned"),
    ("Cop_proc_addr", "varchar(64)"),
    ("Cop_proc_avg", "double"),
    ("Cop_proc_max", "double"),
    ("Cop_proc_p90", "double"),
    ("Cop_time", "double"),
    ("Cop_wait_addr", "varchar(64)"),
    ("Cop_wait_avg", "double"),
    ("Cop_wait_max", "double"),
    ("Cop_wait_p90", "double"),
    ("DB", "varchar(64)"),
    ("Digest", "varchar(64)"),
    ("Disk_max", "double"),
    ("Exec_retry_count", "double"),
    ("Exec_retry_time", "double"),
    ("Get_commit_ts_time", "double"),
    ("Host", "varchar(64)"),
    ("Index_names", "varchar(128)"),
    ("Instance", "varchar(64)"),
    ("Is_internal", "tinyint(1)"),
    ("KV_total", "double"),
    ("Local_latch_wait_time", "double"),
    ("LockKeys_time", "double"),
    ("Mem_max", "double"),
    ("Optimize_time", "double"),
    ("PD_total", "double"),
    ("Parse_time", "double"),
    ("Plan", "longtext"),
    ("Plan_digest", "varchar(128)"),
    ("Plan_from_binding", "tinyint(1)"),
    ("Plan_from_cache", "tinyint(1)"),
    ("Prepared", "tinyint(1)"),
    ("Preproc_subqueries", "double"),
    ("Preproc_subqueries_time", "double"),
    ("Prev_stmt", "longtext"),
    ("Prewrite_region", "double"),
    ("Prewrite_time", "double"),
    ("Process_keys", "double"),
    ("Process_time", "double"),
    ("Query", "longtext"),
    ("Query_time", "double"),
    ("Request_count", "double"),
    ("Resolve_lock_time", "double"),
    ("Rewrite_time", "double"),
    ("Rocksdb_block_cache_hit_count", "double"),
    ("Rocksdb_block_read_byte", "double"),
    ("Rocksdb_block_read_count", "double"),
    ("Rocksdb_delete_skipped_count", "double"),
    ("Rocksdb_key_skipped_count", "double"),
    ("Stats", "varchar(512)"),
    ("Succ", "tinyint(1)"),
    ("Time", "timestamp(6)"),
    ("Total_keys", "double"),
    ("Txn_retry", "double"),
    ("Txn_start_ts", "bigint(20) unsigned"),
    ("User", "varchar(64)"),
    ("Wait_TS", "double"),
    ("Wait_prewrite_binlog_time", "double"),
    ("Wait_time", "double"),
    ("Write_keys", "double"),
    ("Write_size", "double"),
    ("Write_sql_response_total", "double"),
];

/// Returns the column's declared `varchar(N)` maximum length, or `None` for
/// types with no meaningful string bound (`longtext`, numeric, `timestamp`).
/// Values bound to a bounded column are truncated to this length before
/// binding, per the writer's compatibility rule for over-long strings.
pub fn max_len(column: &str) -> Option<usize> {
    let (_, sql_type) = COLUMNS.iter().find(|(name, _)| *name == column)?;
    let inner = sql_type.strip_prefix("varchar(")?.strip_suffix(')')?;
    inner.parse().ok()
}

/// Truncates `value` to `column`'s declared maximum length, if any. Truncates
/// on char boundaries so multi-byte UTF-8 sequences are never split.
pub fn truncate_for_column(column: &str, value: &str) -> String {
    match max_len(column) {
        Some(limit) if value.chars().count() > limit => value.chars().take(limit).collect(),
        _ => value.to_string(),
    }
}

/// Wraps an identifier in backticks for use in generated SQL text.
pub fn quote_ident(word: &str) -> String {
    format!("`{word}`")
}

/// Builds the stable, cluster-qualified table name for `cluster_id`, per the
/// convention `tidb<cluster_id>` unless `cluster_id` is already so prefixed.
pub fn table_name(cluster_id: &str) -> String {
    if cluster_id.starts_with("tidb") {
        cluster_id.to_string()
    } else {
        format!("tidb{cluster_id}")
    }
}

/// `INSERT INTO schema.table (col,...) VALUES (?,...);` over [`COLUMNS`], in
/// column order, so callers can zip positional bind values against it.
pub fn insert_stmt(schema: &str, table: &str) -> String {
    let cols: Vec<String> = COLUMNS.iter().map(|(name, _)| quote_ident(name)).collect();
    let args = vec!["?"; COLUMNS.len()].join(",");
    format!(
        "INSERT INTO {}.{} ({}) VALUES ({});",
        quote_ident(schema),
        quote_ident(table),
        cols.join(","),
        args,
    )
}

/// `CREATE TABLE IF NOT EXISTS ...` with the surrogate `id` primary key, the
/// `query_index` lookup index, and an initial RANGE partitioning over
/// `boundaries`.
pub fn create_table_stmt(schema: &str, table: &str, boundaries: &[DateTime<Utc>]) -> String {
    let mut out = format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (`id` bigint(20) unsigned not null AUTO_INCREMENT,",
        quote_ident(schema),
        quote_ident(table),
    );
    for (name, sql_type) in COLUMNS {
        out.push_str(&format!("{} {},", quote_ident(name), sql_type));
    }
    out.push_str("PRIMARY KEY (`id`,`Time`),");
    out.push_str("INDEX `query_index` (`Digest`, `Conn_ID`)");
    out.push_str(") PARTITION BY RANGE (FLOOR(UNIX_TIMESTAMP(`Time`))) (");
    out.push_str(&partition_clauses(boundaries));
    out.push_str(");");
    out
}

/// `ALTER TABLE ... SET TIFLASH REPLICA 1;`
pub fn enable_columnar_replica_stmt(schema: &str, table: &str) -> String {
    format!("ALTER TABLE `{schema}`.`{table}` SET TIFLASH REPLICA 1;")
}

/// Lists the existing partition names of `table`, oldest first.
pub fn list_partitions_stmt(schema: &str, table: &str) -> String {
    format!(
        "SELECT `partition_name` FROM `information_schema`.`partitions` \
         WHERE table_schema='{schema}' AND table_name='{table}' AND `partition_name` IS NOT NULL \
         order by `partition_name` asc"
    )
}

/// `ALTER TABLE ... ADD PARTITION (...)` for the given boundaries.
pub fn add_partition_stmt(schema: &str, table: &str, boundaries: &[DateTime<Utc>]) -> String {
    format!(
        "ALTER TABLE {}.{} ADD PARTITION ({});",
        quote_ident(schema),
        quote_ident(table),
        partition_clauses(boundaries),
    )
}

/// `ALTER TABLE ... DROP PARTITION p1,p2,...;` for the given partition names.
pub fn drop_partition_stmt(schema: &str, table: &str, partition_names: &[String]) -> String {
    let names: Vec<String> = partition_names.iter().map(|p| quote_ident(p)).collect();
    format!(
        "ALTER TABLE {}.{} drop PARTITION {};",
        quote_ident(schema),
        quote_ident(table),
        names.join(","),
    )
}

fn partition_clauses(boundaries: &[DateTime<Utc>]) -> String {
    boundaries
        .iter()
        .map(|b| format!("PARTITION {} VALUES LESS THAN ({})", partition_name(*b), b.timestamp()))
        .collect::<Vec<_>>()
        .join(",")
}

/// `p` + the boundary's UTC calendar date, e.g. `p2024-03-01`.
pub fn partition_name(boundary: DateTime<Utc>) -> String {
    quote_ident(&format!("p{}", boundary.format("%Y-%m-%d")))
}

/// Computes the `step` partition upper-bounds that follow `from`'s UTC
/// midnight, one per day. `from` need not itself be midnight: the boundary
/// series always starts at the UTC midnight at or after `from`'s calendar
/// day, so partitions stay day-aligned regardless of when within the day
/// the triggering write lands.
pub fn partition_boundaries(from: DateTime<Utc>, step: u32) -> Vec<DateTime<Utc>> {
    let midnight = Utc
        .with_ymd_and_hms(from.year(), from.month(), from.day(), 0, 0, 0)
        .single()
        .expect("valid calendar date");
    (1..=step as i64)
        .map(|i| midnight + Duration::days(i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn column_order_is_alphabetical_and_stable() {
        let mut sorted: Vec<&str> = COLUMNS.iter().map(|(n, _)| *n).collect();
        let mut expected = sorted.clone();
        expected.sort();
        assert_eq!(sorted, expected);
        // stability: calling twice yields the identical sequence
        sorted.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn table_name_adds_prefix_unless_present() {
        assert_eq!(table_name("123"), "tidb123");
        assert_eq!(table_name("tidb123"), "tidb123");
    }

    #[test]
    fn insert_stmt_has_one_placeholder_per_column() {
        let stmt = insert_stmt("logs", "tidb1");
        assert_eq!(stmt.matches('?').count(), COLUMNS.len());
        assert!(stmt.starts_with("INSERT INTO `logs`.`tidb1` ("));
    }

    #[test]
    fn create_table_stmt_has_primary_key_and_index() {
        let boundary = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let stmt = create_table_stmt("logs", "tidb1", &[boundary]);
        assert!(stmt.contains("PRIMARY KEY (`id`,`Time`)"));
        assert!(stmt.contains("INDEX `query_index` (`Digest`, `Conn_ID`)"));
        assert!(stmt.contains("PARTITION BY RANGE (FLOOR(UNIX_TIMESTAMP(`Time`)))"));
        assert!(stmt.contains("PARTITION `p2024-03-02` VALUES LESS THAN"));
    }

    #[test]
    fn partition_boundaries_are_daily_utc_midnights() {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 13, 45, 0).unwrap();
        let boundaries = partition_boundaries(from, 3);
        assert_eq!(boundaries.len(), 3);
        assert_eq!(boundaries[0], Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
        assert_eq!(boundaries[1], Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap());
        assert_eq!(boundaries[2], Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap());
    }

    #[test]
    fn partition_name_formats_as_p_date() {
        let boundary = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(partition_name(boundary), "`p2024-12-31`");
    }

    #[test]
    fn list_partitions_stmt_filters_by_schema_and_table() {
        let stmt = list_partitions_stmt("logs", "tidb1");
        assert!(stmt.contains("table_schema='logs'"));
        assert!(stmt.contains("table_name='tidb1'"));
    }

    #[test]
    fn max_len_reads_the_varchar_bound() {
        assert_eq!(max_len("Host"), Some(64));
        assert_eq!(max_len("Stats"), Some(512));
        assert_eq!(max_len("Query"), None); // longtext, unbounded
        assert_eq!(max_len("Time"), None); // timestamp, not a string column
    }

    #[test]
    fn truncate_for_column_respects_the_declared_bound() {
        let long = "x".repeat(100);
        assert_eq!(truncate_for_column("Host", &long).len(), 64);
        // unbounded columns pass through untouched
        assert_eq!(truncate_for_column("Query", &long), long);
    }

    #[test]
    fn drop_partition_stmt_joins_multiple_names() {
        let stmt = drop_partition_stmt("logs", "tidb1", &["p2024-01-01".to_string(), "p2024-01-02".to_string()]);
        assert_eq!(stmt, "ALTER TABLE `logs`.`tidb1` drop PARTITION `p2024-01-01`,`p2024-01-02`;");
    }
}
