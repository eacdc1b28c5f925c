//! The MySQL-protocol writer client: owns one TiDB connection, a prepared
//! statement cache, and the table/partition auto-creation fallback that
//! fires when an insert hits an unknown table or partition.

use std::time::Duration;

use mysql_async::prelude::{Queryable, ToValue};
use mysql_async::{Conn, Opts, Params, Value};
use snafu::ResultExt;
use tidb_slow_query_core::parser::FieldValue;
use tidb_slow_query_core::schema::{self, COLUMNS};
use tidb_slow_query_core::SlowQueryRecord;
use tracing::{debug, info, warn};

use crate::cache::StatementCache;
use crate::error::{BadClusterIdSnafu, ConnectSnafu, ExecSnafu, PartitionMissingSnafu, PrepareSnafu, Result, TableMissingSnafu};
use crate::partition;

/// MySQL server error code for "table doesn't exist".
const ER_NO_SUCH_TABLE: u16 = 1146;
/// MySQL server error code for "table has no partition for value".
const ER_NO_PARTITION_FOR_VALUE: u16 = 1526;

const NO_CLUSTER_ID: &str = "NO_CLUSTER_ID";

/// The writer's view of an inbound event's cluster-id field. Mirrors the
/// shipping pipeline's `event.GetValue("kubernetes.namespace")` contract,
/// which returns an untyped value: it may be absent, a string, or (an
/// upstream enrichment bug) some other JSON-ish type.
#[derive(Debug, Clone, Copy)]
pub enum ClusterIdValue<'a> {
    Missing,
    Str(&'a str),
    /// Present but not a string; carries a debug rendering of whatever it
    /// was, for the `BadClusterId` error message.
    NotAString(&'a str),
}

/// Observes publish outcomes for metrics: the host pipeline hands every
/// output client one of these to report acked/dropped event counts to.
pub trait PublishObserver: Send + Sync {
    fn dropped(&self, _n: usize) {}
    fn acked(&self, _n: usize) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;
impl PublishObserver for NoopObserver {}

/// The pipeline's batch-lifecycle callbacks, invoked by [`WriterClient::publish`]
/// exactly once per call: [`Batch::ack`] on success, [`Batch::retry_events`]
/// when table/partition autocreation succeeded and the same batch should be
/// resubmitted, [`Batch::drop_batch`] on any unrecoverable failure.
pub trait Batch {
    fn ack(&mut self);
    fn retry_events(&mut self);
    fn drop_batch(&mut self);
}

#[derive(Debug, Default)]
pub struct NoopBatch;
impl Batch for NoopBatch {
    fn ack(&mut self) {}
    fn retry_events(&mut self) {}
    fn drop_batch(&mut self) {}
}

/// An outcome classification used internally to decide which [`Batch`]
/// callback and [`PublishObserver`] counter a publish attempt's error maps
/// to; not exposed outside this module.
enum Outcome {
    Retry,
    Drop,
}

pub struct WriterClient<O: PublishObserver = NoopObserver> {
    opts: Opts,
    conn: Option<Conn>,
    observer: O,
    timeout: Duration,
    database: String,
    retention: u32,
    roll_step: u32,
    stmt_cache: StatementCache,
}

impl<O: PublishObserver> WriterClient<O> {
    pub fn new(opts: Opts, database: String, timeout: Duration, retention: u32, roll_step: u32, observer: O) -> Self {
        Self {
            opts,
            conn: None,
            observer,
            timeout,
            database,
            retention,
            roll_step,
            stmt_cache: StatementCache::default(),
        }
    }

    /// (Re)establishes the connection if there isn't a live one already.
    pub async fn connect(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.as_mut() {
            if tokio::time::timeout(self.timeout, conn.ping()).await.is_ok() {
                return Ok(());
            }
        }
        // The existing connection, if any, failed its ping: close it
        // explicitly before replacing the reference rather than letting it
        // disconnect in the background on drop.
        if let Some(stale) = self.conn.take() {
            let _ = stale.disconnect().await;
        }
        let dsn = self.opts.ip_or_hostname().to_string();
        let conn = match tokio::time::timeout(self.timeout, Conn::new(self.opts.clone())).await {
            Ok(result) => result.context(ConnectSnafu { dsn })?,
            Err(_) => return Err(mysql_async::Error::Driver(mysql_async::DriverError::Timeout))
                .context(ConnectSnafu { dsn: self.opts.ip_or_hostname().to_string() }),
        };
        self.conn = Some(conn);
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            let _ = conn.disconnect().await;
        }
        Ok(())
    }

    /// Writes one record for `cluster_id` to its table, autocreating the
    /// table or a missing partition and requesting a batch retry if the
    /// insert first fails with MySQL error 1146/1526. Single-event-per-batch:
    /// `batch` is driven exactly once per call, matching the host pipeline's
    /// `batchSize = 1` contract for this output.
    pub async fn publish(
        &mut self,
        record: &SlowQueryRecord,
        cluster_id: ClusterIdValue<'_>,
        batch: &mut dyn Batch,
    ) -> Result<()> {
        let table = match resolve_table_name(cluster_id) {
            Ok(table) => table,
            Err(e) => {
                batch.drop_batch();
                self.observer.dropped(1);
                return Err(e);
            }
        };

        match self.try_insert(record, &table).await {
            Ok(()) => {
                batch.ack();
                self.observer.acked(1);
                Ok(())
            }
            Err((e, Outcome::Retry)) => {
                batch.retry_events();
                Err(e)
            }
            Err((e, Outcome::Drop)) => {
                batch.drop_batch();
                self.observer.dropped(1);
                Err(e)
            }
        }
    }

    async fn try_insert(&mut self, record: &SlowQueryRecord, table: &str) -> std::result::Result<(), (crate::error::WriterError, Outcome)> {
        if !self.stmt_cache.contains(table) {
            let sql = schema::insert_stmt(&self.database, table);
            let conn = self.conn.as_mut().expect("connect() must be called first");
            match conn.prep(&sql).await {
                Ok(stmt) => {
                    if let Some((evicted_table, evicted_stmt)) =
                        self.stmt_cache.insert_evicting(table.to_string(), stmt)
                    {
                        debug!(table = evicted_table.as_str(), "closing capacity-evicted prepared statement");
                        let conn = self.conn.as_mut().expect("connect() must be called first");
                        let _ = conn.close(evicted_stmt).await;
                    }
                }
                Err(e) => return self.handle_insert_error(e, table, record.time.timestamp(), true).await,
            }
        }

        let stmt = self.stmt_cache.get(table).expect("just inserted or already present").clone();
        let params = record_params(record);
        let conn = self.conn.as_mut().expect("connect() must be called first");
        match conn.exec_drop(stmt, params).await {
            Ok(()) => Ok(()),
            Err(e) => self.handle_insert_error(e, table, record.time.timestamp(), false).await,
        }
    }

    /// Classifies a failed prepare/execute: evict the (possibly stale) cached
    /// statement, reconnect, then either autocreate what was missing and
    /// request a retry, or propagate the original error as a drop.
    async fn handle_insert_error(
        &mut self,
        err: mysql_async::Error,
        table: &str,
        at_unix: i64,
        was_prepare: bool,
    ) -> std::result::Result<(), (crate::error::WriterError, Outcome)> {
        self.stmt_cache.remove(table);
        if let Err(e) = self.connect().await {
            return Err((e, Outcome::Drop));
        }

        let server_error = match &err {
            mysql_async::Error::Server(e) => Some(e.code),
            _ => None,
        };

        let at = chrono::DateTime::from_timestamp(at_unix, 0).unwrap_or_else(chrono::Utc::now);
        let conn = self.conn.as_mut().expect("connect() must have just succeeded");

        match server_error {
            Some(ER_NO_PARTITION_FOR_VALUE) => {
                info!(table, "no partition for value, rolling partitions forward");
                match partition::create_partitions(conn, &self.database, table, at, self.roll_step, self.retention).await {
                    Ok(()) => {
                        let e = Err::<(), _>(err).context(PartitionMissingSnafu { table: table.to_string() }).unwrap_err();
                        Err((e, Outcome::Retry))
                    }
                    Err(e) => Err((e, Outcome::Drop)),
                }
            }
            Some(ER_NO_SUCH_TABLE) => {
                info!(table, "table missing, creating it");
                match partition::create_table(conn, &self.database, table, at, self.roll_step).await {
                    Ok(()) => {
                        let e = Err::<(), _>(err).context(TableMissingSnafu { table: table.to_string() }).unwrap_err();
                        Err((e, Outcome::Retry))
                    }
                    Err(e) => Err((e, Outcome::Drop)),
                }
            }
            _ if was_prepare => Err((
                Err::<(), _>(err).context(PrepareSnafu { table: table.to_string() }).unwrap_err(),
                Outcome::Drop,
            )),
            _ => Err((
                Err::<(), _>(err).context(ExecSnafu { table: table.to_string() }).unwrap_err(),
                Outcome::Drop,
            )),
        }
    }
}

/// `"tidb" + cluster_id`, per the current cluster-id-to-table-name
/// convention. Falls back to a fixed placeholder table with a warning when
/// no cluster id is available; a present-but-non-string value is a hard
/// `BadClusterId` error, since it cannot safely name a table.
fn resolve_table_name(cluster_id: ClusterIdValue<'_>) -> Result<String> {
    match cluster_id {
        ClusterIdValue::Str(id) if !id.is_empty() => Ok(schema::table_name(id)),
        ClusterIdValue::Str(_) | ClusterIdValue::Missing => {
            warn!("no cluster id on event, writing to the catch-all table");
            Ok(schema::table_name(NO_CLUSTER_ID))
        }
        ClusterIdValue::NotAString(repr) => BadClusterIdSnafu { value: repr.to_string() }.fail(),
    }
}

/// Builds the positional bind parameters for one record, in [`COLUMNS`]
/// order, defaulting any column the record has no value for to SQL NULL.
/// String values are truncated to their column's declared maximum length.
fn record_params(record: &SlowQueryRecord) -> Params {
    let values: Vec<Value> = COLUMNS
        .iter()
        .map(|(name, _)| field_to_value(*name, record))
        .collect();
    debug!(columns = values.len(), "bound insert parameters");
    Params::Positional(values)
}

fn field_to_value(name: &str, record: &SlowQueryRecord) -> Value {
    if name == "Time" {
        return record.time.naive_utc().to_value();
    }
    if name == "Query" {
        return schema::truncate_for_column(name, &record.query).to_value();
    }
    if name == "Instance" {
        return record
            .instance
            .as_deref()
            .map(|s| schema::truncate_for_column(name, s).to_value())
            .unwrap_or(Value::NULL);
    }
    // `User` falls back to the combined `User@Host` field when the log
    // didn't carry a bare `User` header.
    let field = record.get(name).or_else(|| {
        if name == "User" {
            record.get("User@Host")
        } else {
            None
        }
    });
    match field {
        Some(FieldValue::Bool(b)) => (*b as i8).to_value(),
        Some(FieldValue::UInt64(n)) => n.to_value(),
        Some(FieldValue::Float64(f)) => f.to_value(),
        Some(FieldValue::String(s)) => schema::truncate_for_column(name, s).to_value(),
        None => Value::NULL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_record() -> SlowQueryRecord {
        let mut fields = BTreeMap::new();
        fields.insert("Is_internal".to_string(), FieldValue::Bool(true));
        fields.insert("Query_time".to_string(), FieldValue::Float64(0.25));
        SlowQueryRecord {
            time: chrono::Utc::now(),
            instance: Some("pod-a".to_string()),
            query: "select 1;".to_string(),
            fields,
        }
    }

    #[test]
    fn resolve_table_name_prefers_cluster_id() {
        assert_eq!(resolve_table_name(ClusterIdValue::Str("123")).unwrap(), "tidb123");
        assert_eq!(resolve_table_name(ClusterIdValue::Missing).unwrap(), "tidbNO_CLUSTER_ID");
        assert_eq!(resolve_table_name(ClusterIdValue::Str("")).unwrap(), "tidbNO_CLUSTER_ID");
    }

    #[test]
    fn resolve_table_name_rejects_non_string_cluster_id() {
        assert!(matches!(
            resolve_table_name(ClusterIdValue::NotAString("42")),
            Err(crate::error::WriterError::BadClusterId { .. })
        ));
    }

    #[test]
    fn record_params_has_one_value_per_column() {
        let record = sample_record();
        let Params::Positional(values) = record_params(&record) else {
            panic!("expected positional params");
        };
        assert_eq!(values.len(), COLUMNS.len());
    }

    #[test]
    fn missing_fields_bind_to_null() {
        let record = sample_record();
        let value = field_to_value("Digest", &record);
        assert_eq!(value, Value::NULL);
    }

    #[test]
    fn user_falls_back_to_user_at_host() {
        let mut record = sample_record();
        record.fields.insert("User@Host".to_string(), FieldValue::String("root@1.2.3.4".to_string()));
        let value = field_to_value("User", &record);
        assert_eq!(value, "root@1.2.3.4".to_value());
    }

    #[test]
    fn user_present_directly_is_not_overridden_by_user_at_host() {
        let mut record = sample_record();
        record.fields.insert("User".to_string(), FieldValue::String("root".to_string()));
        record.fields.insert("User@Host".to_string(), FieldValue::String("root@1.2.3.4".to_string()));
        let value = field_to_value("User", &record);
        assert_eq!(value, "root".to_value());
    }

    #[test]
    fn long_string_values_are_truncated_to_the_column_bound() {
        let mut record = sample_record();
        record.fields.insert("Host".to_string(), FieldValue::String("h".repeat(200)));
        let value = field_to_value("Host", &record);
        assert_eq!(value, "h".repeat(64).to_value());
    }
}
