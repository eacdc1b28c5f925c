//! The `tidb_slow_query` output plugin: owns the TiDB connection, the
//! prepared statement cache, partition lifecycle management, and the
//! backoff-wrapped retry loop that drives all of it.
//!
//! Parsing and schema logic live in `tidb-slow-query-core`; this crate is
//! the async, I/O-owning half.

pub mod backoff;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod partition;
pub mod plugin;

pub use client::{Batch, ClusterIdValue, NoopBatch, NoopObserver, PublishObserver, WriterClient};
pub use config::Config;
pub use error::WriterError;
pub use plugin::{make_writer, BackoffWriterClient, Output, BATCH_SIZE, PLUGIN_NAME};
