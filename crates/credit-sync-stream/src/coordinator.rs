//! Synchronization coordinator and the subscriber loop it runs.
//!
//! `start` subscribes to a topic and spawns one consumption loop on the tokio
//! runtime. `stop` cancels the loop and waits for it. Cancellation is only
//! observed while polling or sleeping in backoff, so a reconcile that has
//! begun always finishes its write and acknowledgement.
//!
//! A broker that is briefly unavailable during poll, ack or nack is waited
//! out with the retry policy's backoff. Any other transport error ends the
//! loop and closes the consumer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use credit_sync_core::{decode_envelope, now_millis};

use crate::error::{ReconcileError, Result, StreamError};
use crate::reconciler::{Applied, Reconcile, ReconcileStats, StatsSnapshot};
use crate::retry::{Backoff, RetryPolicy};
use crate::transport::{Broker, Consumer, Record};

/// Configuration for the consumption loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// How long one poll waits before the loop checks for housekeeping.
    #[serde(rename = "poll_timeout_ms", with = "duration_ms")]
    pub poll_timeout: Duration,
    /// Interval between idempotency record prunes. `None` disables pruning.
    #[serde(rename = "prune_interval_ms", with = "duration_ms_opt")]
    pub prune_interval: Option<Duration>,
    /// Backoff for failed ledger writes.
    pub retry: RetryPolicy,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(500),
            prune_interval: Some(Duration::from_secs(60)),
            retry: RetryPolicy::default(),
        }
    }
}

impl SubscriberConfig {
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_prune_interval(mut self, interval: Option<Duration>) -> Self {
        self.prune_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

struct RunningLoop {
    topic: String,
    group_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

/// Owns the lifecycle of one subscription.
pub struct Coordinator {
    broker: Arc<dyn Broker>,
    config: SubscriberConfig,
    stats: Arc<ReconcileStats>,
    running: Mutex<Option<RunningLoop>>,
}

impl Coordinator {
    pub fn new(broker: Arc<dyn Broker>, config: SubscriberConfig) -> Self {
        Self {
            broker,
            config,
            stats: Arc::new(ReconcileStats::default()),
            running: Mutex::new(None),
        }
    }

    /// Subscribe to `topic` as `group_id` and start consuming.
    ///
    /// Fails with `AlreadyStarted` while a previous loop is still running.
    pub async fn start(
        &self,
        topic: &str,
        group_id: &str,
        handler: Arc<dyn Reconcile>,
    ) -> Result<()> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                return Err(StreamError::AlreadyStarted);
            }
            tracing::warn!(
                topic = %current.topic,
                group_id = %current.group_id,
                "previous consumption loop exited on its own"
            );
        }

        let consumer = self.broker.subscribe(topic, group_id).await?;
        let cancel = CancellationToken::new();

        let subscriber = Subscriber {
            consumer,
            handler,
            stats: Arc::clone(&self.stats),
            config: self.config.clone(),
            cancel: cancel.clone(),
            retrying: HashMap::new(),
            transport_backoff: None,
            redeliver: None,
        };
        let handle = tokio::spawn(subscriber.run());

        tracing::info!(topic, group_id, "credit sync started");
        *running = Some(RunningLoop {
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            cancel,
            handle,
        });
        Ok(())
    }

    /// Cancel the loop and wait for it to finish.
    ///
    /// Returns the loop's own error if it ended on a transport failure.
    pub async fn stop(&self) -> Result<()> {
        let current = self
            .running
            .lock()
            .await
            .take()
            .ok_or(StreamError::NotStarted)?;

        current.cancel.cancel();
        let result = current
            .handle
            .await
            .map_err(|e| StreamError::Task(e.to_string()))?;

        tracing::info!(
            topic = %current.topic,
            group_id = %current.group_id,
            "credit sync stopped"
        );
        result
    }

    /// Whether a consumption loop is currently running.
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Backoff state for a record that is being redelivered.
struct Retrying {
    offset: u64,
    backoff: Backoff,
}

enum Flow {
    Continue,
    Stop,
}

/// The consumption loop for one subscription.
struct Subscriber {
    consumer: Box<dyn Consumer>,
    handler: Arc<dyn Reconcile>,
    stats: Arc<ReconcileStats>,
    config: SubscriberConfig,
    cancel: CancellationToken,
    /// partition -> record under retry.
    retrying: HashMap<u32, Retrying>,
    /// Backoff across consecutive transient broker failures.
    transport_backoff: Option<Backoff>,
    /// Record to handle again before the next poll, after its ack or nack
    /// failed.
    redeliver: Option<Record>,
}

impl Subscriber {
    async fn run(mut self) -> Result<()> {
        let result = self.consume().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "consumption loop failed");
        }
        if let Err(e) = self.consumer.close().await {
            tracing::warn!(error = %e, "failed to close consumer");
        }
        result
    }

    async fn consume(&mut self) -> Result<()> {
        let mut last_prune = Instant::now();

        loop {
            let next = match self.redeliver.take() {
                Some(record) => Some(record),
                None => {
                    let polled = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Ok(()),
                        polled = self.consumer.poll(self.config.poll_timeout) => polled,
                    };
                    match polled {
                        Ok(polled) => {
                            self.transport_backoff = None;
                            polled
                        }
                        Err(e) => {
                            if let Flow::Stop = self.transport_failure(e, "poll").await? {
                                return Ok(());
                            }
                            continue;
                        }
                    }
                }
            };

            if let Some(record) = next {
                if let Flow::Stop = self.handle(record).await? {
                    return Ok(());
                }
            }

            if let Some(interval) = self.config.prune_interval {
                if last_prune.elapsed() >= interval {
                    self.prune().await;
                    last_prune = Instant::now();
                }
            }
        }
    }

    async fn handle(&mut self, record: Record) -> Result<Flow> {
        let event = match decode_envelope(&record.value) {
            Ok(envelope) => envelope.payload,
            Err(e) => {
                tracing::warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "dropping malformed envelope"
                );
                self.stats.record(&Err(ReconcileError::Malformed(e)));
                return self.ack(record).await;
            }
        };

        let event_id = event.event_id;
        let email = event.email.clone();
        let result = self.handler.reconcile(event).await;
        self.stats.record(&result);

        match &result {
            Ok(Applied::Updated { credits, .. }) => {
                tracing::info!(
                    %event_id,
                    %email,
                    credits,
                    partition = record.partition,
                    offset = record.offset,
                    "applied credit event"
                );
            }
            Ok(Applied::Duplicate { .. }) => {
                tracing::debug!(%event_id, %email, "skipping duplicate credit event");
            }
            Err(ReconcileError::Rejected(e)) => {
                tracing::warn!(%event_id, %email, error = %e, "rejected credit event");
            }
            Err(ReconcileError::Orphan { .. }) => {
                tracing::warn!(%event_id, %email, "orphan credit event for unknown account");
            }
            Err(ReconcileError::Malformed(e)) => {
                tracing::warn!(%event_id, error = %e, "malformed credit event");
            }
            Err(ReconcileError::LedgerWrite(e)) => {
                let delay = self.next_retry_delay(&record);
                tracing::error!(
                    %event_id,
                    %email,
                    partition = record.partition,
                    offset = record.offset,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "ledger write failed, will redeliver"
                );

                if let Err(e) = self.consumer.nack(&record).await {
                    if !e.is_transient() {
                        return Err(e);
                    }
                    tracing::warn!(
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "nack failed, retrying record locally"
                    );
                    self.redeliver = Some(record);
                }
                return Ok(pause(&self.cancel, delay).await);
            }
        }

        self.retrying.remove(&record.partition);
        self.ack(record).await
    }

    /// Commit the record. If the broker refuses, the record is handled again
    /// after a backoff; the idempotency record turns that pass into a skip.
    async fn ack(&mut self, record: Record) -> Result<Flow> {
        match self.consumer.ack(&record).await {
            Ok(()) => {
                self.transport_backoff = None;
                Ok(Flow::Continue)
            }
            Err(e) => {
                self.redeliver = Some(record);
                self.transport_failure(e, "ack").await
            }
        }
    }

    /// Back off after a transient broker failure. Other failures end the loop.
    async fn transport_failure(&mut self, err: StreamError, op: &'static str) -> Result<Flow> {
        if !err.is_transient() {
            return Err(err);
        }

        let policy = &self.config.retry;
        let delay = self
            .transport_backoff
            .get_or_insert_with(|| policy.backoff())
            .next_delay();
        tracing::warn!(
            op,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "broker unavailable, backing off"
        );
        Ok(pause(&self.cancel, delay).await)
    }

    fn next_retry_delay(&mut self, record: &Record) -> Duration {
        let policy = &self.config.retry;
        let retrying = self
            .retrying
            .entry(record.partition)
            .or_insert_with(|| Retrying {
                offset: record.offset,
                backoff: policy.backoff(),
            });

        if retrying.offset != record.offset {
            *retrying = Retrying {
                offset: record.offset,
                backoff: policy.backoff(),
            };
        }
        retrying.backoff.next_delay()
    }

    async fn prune(&mut self) {
        match self.handler.prune(now_millis()).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "pruned idempotency record"),
            Err(e) => tracing::warn!(error = %e, "failed to prune idempotency record"),
        }
    }
}

/// Sleep for `delay` unless cancelled first.
async fn pause(cancel: &CancellationToken, delay: Duration) -> Flow {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Flow::Stop,
        _ = tokio::time::sleep(delay) => Flow::Continue,
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
