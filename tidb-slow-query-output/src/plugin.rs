//! Registration surface for the host log-shipping agent's plugin registry.
//!
//! This plugin registers twice: once as a processor that parses raw log
//! text into structured fields, and once as an output that writes those
//! fields to TiDB. Since the host agent itself is outside this crate's
//! scope, both registrations are exposed here as a name constant plus a
//! factory function the host can call from its own registry.

use std::time::Duration;

use async_trait::async_trait;
use tidb_slow_query_core::SlowQueryRecord;
use tracing::instrument;

use crate::backoff::EqualJitterBackoff;
use crate::client::{Batch, ClusterIdValue, NoopObserver, PublishObserver, WriterClient};
use crate::config::Config;
use crate::error::Result;

/// The host pipeline's view of an output: something it can hand a parsed
/// record, a cluster id, and a batch to ack/retry/drop. Object-safe so the
/// pipeline can hold its output behind a `Box<dyn Output>` without knowing
/// the concrete observer type a [`WriterClient`] was built with.
#[async_trait]
pub trait Output: Send {
    async fn publish(&mut self, record: &SlowQueryRecord, cluster_id: ClusterIdValue<'_>, batch: &mut dyn Batch) -> Result<()>;
}

/// Name both the processor and the output register themselves under.
pub const PLUGIN_NAME: &str = "tidb_slow_query";

/// Events are batched one at a time; a TiDB insert is cheap enough per-row
/// that grouping events before a publish call buys nothing.
pub const BATCH_SIZE: usize = 1;

/// A backoff-wrapped writer client, the unit the host pipeline's output
/// worker actually drives: on error it closes the inner client and waits
/// before the worker retries; on success it resets the backoff.
pub struct BackoffWriterClient<O: PublishObserver = NoopObserver> {
    inner: WriterClient<O>,
    backoff: EqualJitterBackoff,
}

impl<O: PublishObserver> BackoffWriterClient<O> {
    pub fn new(inner: WriterClient<O>, backoff_init: Duration, backoff_max: Duration) -> Self {
        Self {
            inner,
            backoff: EqualJitterBackoff::new(backoff_init, backoff_max),
        }
    }

    #[instrument(skip(self))]
    pub async fn connect(&mut self) -> Result<()> {
        let result = self.inner.connect().await;
        if result.is_ok() {
            self.backoff.reset();
        } else {
            self.backoff.wait().await;
        }
        result
    }

    pub async fn close(&mut self) -> Result<()> {
        let result = self.inner.close().await;
        self.backoff.close();
        result
    }

    #[instrument(skip(self, record, batch))]
    pub async fn publish(
        &mut self,
        record: &SlowQueryRecord,
        cluster_id: ClusterIdValue<'_>,
        batch: &mut dyn Batch,
    ) -> Result<()> {
        let result = self.inner.publish(record, cluster_id, batch).await;
        if result.is_err() {
            let _ = self.inner.close().await;
            self.backoff.wait().await;
        } else {
            self.backoff.reset();
        }
        result
    }
}

#[async_trait]
impl<O: PublishObserver> Output for BackoffWriterClient<O> {
    async fn publish(&mut self, record: &SlowQueryRecord, cluster_id: ClusterIdValue<'_>, batch: &mut dyn Batch) -> Result<()> {
        BackoffWriterClient::publish(self, record, cluster_id, batch).await
    }
}

/// Builds a ready-to-use, backoff-wrapped writer client from host
/// configuration: connects the inner client, then wraps it in backoff.
pub async fn make_writer(config: &Config) -> Result<BackoffWriterClient> {
    let opts = config.to_opts()?;
    let mut client = WriterClient::new(
        opts,
        config.database.clone(),
        config.timeout,
        config.partition.retention,
        config.partition.roll_step,
        NoopObserver,
    );
    client.connect().await?;
    Ok(BackoffWriterClient::new(client, config.backoff.init, config.backoff.max))
}
