//! The output crate's error taxonomy. Unlike the core crate's small leaf
//! `thiserror` enums, this crate chains richer call contexts (a failed
//! reconnect attempt during error recovery, a failed DDL statement while
//! autocreating a partition) and so follows `server`/`ingester`'s use of
//! `snafu` for that purpose.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriterError {
    #[snafu(display("invalid writer configuration: {message}"))]
    Config { message: String },

    #[snafu(display("failed to build TLS configuration: {source}"))]
    Tls { source: std::io::Error },

    #[snafu(display("failed to connect to {dsn}: {source}"))]
    Connect {
        dsn: String,
        source: mysql_async::Error,
    },

    #[snafu(display("failed to prepare insert statement for table {table}: {source}"))]
    Prepare {
        table: String,
        source: mysql_async::Error,
    },

    #[snafu(display("failed to execute insert into table {table}: {source}"))]
    Exec {
        table: String,
        source: mysql_async::Error,
    },

    #[snafu(display("table {table} did not exist; created it and the write must be retried: {source}"))]
    TableMissing {
        table: String,
        source: mysql_async::Error,
    },

    #[snafu(display("table {table} had no partition for the write's timestamp; rolled partitions forward and the write must be retried: {source}"))]
    PartitionMissing {
        table: String,
        source: mysql_async::Error,
    },

    #[snafu(display("DDL statement against table {table} failed: {source}"))]
    Ddl {
        table: String,
        source: mysql_async::Error,
    },

    #[snafu(display("failed to list partitions of table {table}: {source}"))]
    ListPartitions {
        table: String,
        source: mysql_async::Error,
    },

    #[snafu(display("cluster id {value:?} is not a valid table name component"))]
    BadClusterId { value: String },
}

pub type Result<T, E = WriterError> = std::result::Result<T, E>;
