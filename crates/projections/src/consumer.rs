//! Partitioned message log contract and the consumer group that drives it.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::LogPosition;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::dispatcher::EventDispatcher;
use crate::error::ConsumerError;

/// A partition of the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(u32);

impl PartitionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "partition-{}", self.0)
    }
}

/// One message read from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    pub partition: PartitionId,
    /// Strictly increasing within a partition.
    pub position: LogPosition,
    pub topic: String,
    /// Carries the event type, e.g. `ProductCreated`.
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub produced_at: DateTime<Utc>,
}

/// A partitioned, committable message log.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Partitions owned by this group member.
    async fn assignments(&self) -> Result<Vec<PartitionId>, ConsumerError>;

    /// Up to `max` messages after the committed position, in order.
    async fn fetch(
        &self,
        partition: PartitionId,
        max: usize,
    ) -> Result<Vec<LogMessage>, ConsumerError>;

    /// Records that every message up to `position` has been handled.
    async fn commit(&self, partition: PartitionId, position: LogPosition)
    -> Result<(), ConsumerError>;
}

#[derive(Default)]
struct Partition {
    messages: Vec<LogMessage>,
    committed: Option<LogPosition>,
}

/// In-memory partitioned log for tests and standalone runs.
///
/// Positions are message indexes within their partition.
#[derive(Clone)]
pub struct InMemoryLog {
    partitions: Arc<RwLock<Vec<Partition>>>,
}

impl InMemoryLog {
    /// Creates a log with `partitions` partitions (at least one).
    pub fn new(partitions: u32) -> Self {
        let count = partitions.max(1) as usize;
        Self {
            partitions: Arc::new(RwLock::new(
                (0..count).map(|_| Partition::default()).collect(),
            )),
        }
    }

    /// The partition a key is routed to.
    pub async fn partition_for(&self, partition_key: &str) -> PartitionId {
        let count = self.partitions.read().await.len() as u64;
        let mut hasher = DefaultHasher::new();
        partition_key.hash(&mut hasher);
        PartitionId((hasher.finish() % count) as u32)
    }

    /// Appends a message to the partition of `partition_key`.
    pub async fn publish(
        &self,
        partition_key: &str,
        topic: &str,
        key: &str,
        payload: impl Into<Vec<u8>>,
        produced_at: DateTime<Utc>,
    ) -> LogMessage {
        let partition = self.partition_for(partition_key).await;
        let mut partitions = self.partitions.write().await;
        let slot = &mut partitions[partition.0 as usize];

        let message = LogMessage {
            partition,
            position: LogPosition::new(slot.messages.len() as i64),
            topic: topic.to_string(),
            key: key.as_bytes().to_vec(),
            payload: payload.into(),
            produced_at,
        };
        slot.messages.push(message.clone());
        message
    }

    /// The last committed position of a partition.
    pub async fn committed(&self, partition: PartitionId) -> Option<LogPosition> {
        self.partitions
            .read()
            .await
            .get(partition.0 as usize)
            .and_then(|p| p.committed)
    }

    /// Number of messages not yet committed, across all partitions.
    pub async fn lag(&self) -> usize {
        self.partitions
            .read()
            .await
            .iter()
            .map(|p| {
                let done = p.committed.map_or(0, |c| c.as_i64() as usize + 1);
                p.messages.len().saturating_sub(done)
            })
            .sum()
    }
}

#[async_trait]
impl MessageLog for InMemoryLog {
    async fn assignments(&self) -> Result<Vec<PartitionId>, ConsumerError> {
        let count = self.partitions.read().await.len() as u32;
        Ok((0..count).map(PartitionId).collect())
    }

    async fn fetch(
        &self,
        partition: PartitionId,
        max: usize,
    ) -> Result<Vec<LogMessage>, ConsumerError> {
        let partitions = self.partitions.read().await;
        let slot = partitions
            .get(partition.0 as usize)
            .ok_or(ConsumerError::UnknownPartition(partition))?;

        let start = slot.committed.map_or(0, |c| c.as_i64() as usize + 1);
        Ok(slot.messages.iter().skip(start).take(max).cloned().collect())
    }

    async fn commit(
        &self,
        partition: PartitionId,
        position: LogPosition,
    ) -> Result<(), ConsumerError> {
        let mut partitions = self.partitions.write().await;
        let slot = partitions
            .get_mut(partition.0 as usize)
            .ok_or(ConsumerError::UnknownPartition(partition))?;

        if position.as_i64() < 0 || position.as_i64() as usize >= slot.messages.len() {
            return Err(ConsumerError::CommitOutOfRange {
                partition,
                position,
            });
        }
        slot.committed = Some(slot.committed.map_or(position, |c| c.max(position)));
        Ok(())
    }
}

/// Tuning for a consumer group.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Name of the group, for logs.
    pub group: String,
    /// Maximum messages fetched per round trip.
    pub batch_size: usize,
    /// Sleep after an empty fetch.
    pub poll_interval: Duration,
    /// Sleep after a failed dispatch, fetch or commit.
    pub retry_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group: "catalog-read-side".to_string(),
            batch_size: 64,
            poll_interval: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Runs one worker per assigned partition.
///
/// Messages of one partition are handled strictly in order. A message is
/// committed only after the dispatcher returns `Ok`; on error the worker
/// backs off and fetches again from the committed position.
#[derive(Clone)]
pub struct ConsumerGroup {
    log: Arc<dyn MessageLog>,
    dispatcher: EventDispatcher,
    settings: ConsumerSettings,
    span: Span,
}

impl ConsumerGroup {
    pub fn new(log: Arc<dyn MessageLog>, dispatcher: EventDispatcher) -> Self {
        Self {
            log,
            dispatcher,
            settings: ConsumerSettings::default(),
            span: tracing::info_span!("consumer_group"),
        }
    }

    pub fn with_settings(mut self, settings: ConsumerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Consumes until `shutdown` is cancelled.
    ///
    /// Returns only after every worker has finished its current message.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        let partitions = self.log.assignments().await?;
        tracing::info!(
            parent: &self.span,
            group = %self.settings.group,
            partitions = partitions.len(),
            "Consumer group starting"
        );

        let (ids, handles): (Vec<_>, Vec<_>) = partitions
            .into_iter()
            .map(|partition| {
                let worker = self.clone();
                let shutdown = shutdown.clone();
                let handle = tokio::spawn(async move { worker.consume(partition, shutdown).await });
                (partition, handle)
            })
            .unzip();

        let results = futures_util::future::join_all(handles).await;
        for (partition, result) in ids.into_iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(
                    parent: &self.span,
                    %partition,
                    error = %e,
                    "Partition worker panicked"
                );
            }
        }

        tracing::info!(
            parent: &self.span,
            group = %self.settings.group,
            "Consumer group drained"
        );
        Ok(())
    }

    async fn consume(&self, partition: PartitionId, shutdown: CancellationToken) {
        tracing::debug!(parent: &self.span, %partition, "Partition worker started");

        'fetch: while !shutdown.is_cancelled() {
            let batch = match self.log.fetch(partition, self.settings.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(parent: &self.span, %partition, error = %e, "Fetch failed");
                    if pause(&shutdown, self.settings.retry_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                if pause(&shutdown, self.settings.poll_interval).await {
                    break;
                }
                continue;
            }

            for message in batch {
                if shutdown.is_cancelled() {
                    break 'fetch;
                }

                if let Err(e) = self.dispatcher.dispatch(&message).await {
                    tracing::error!(
                        parent: &self.span,
                        %partition,
                        position = %message.position,
                        topic = %message.topic,
                        error = %e,
                        "Failed to handle message, will redeliver"
                    );
                    if pause(&shutdown, self.settings.retry_backoff).await {
                        break 'fetch;
                    }
                    continue 'fetch;
                }

                if let Err(e) = self.log.commit(partition, message.position).await {
                    tracing::warn!(
                        parent: &self.span,
                        %partition,
                        position = %message.position,
                        error = %e,
                        "Commit failed"
                    );
                    if pause(&shutdown, self.settings.retry_backoff).await {
                        break 'fetch;
                    }
                    continue 'fetch;
                }
            }
        }

        tracing::debug!(parent: &self.span, %partition, "Partition worker stopped");
    }
}

/// Sleeps for `period`. Returns true if shutdown was requested meanwhile.
async fn pause(shutdown: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(period) => false,
    }
}
