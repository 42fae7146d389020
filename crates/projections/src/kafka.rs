//! Kafka-backed [`MessageLog`].
//!
//! Every partition of the configured topics is assigned to this member and
//! read through its own partition queue. Committed offsets are stored under
//! the consumer group id, so a restart resumes where the last run stopped.
//! Message key: event type literal, e.g. `ProductCreated`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::LogPosition;
use futures_util::FutureExt;
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::consumer::{CommitMode, Consumer, DefaultConsumerContext, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consumer::{LogMessage, MessageLog, PartitionId};
use crate::error::ConsumerError;

/// Configuration for the Kafka consumer.
#[derive(Clone, Debug)]
pub struct KafkaLogConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer group id that owns the committed offsets.
    pub group_id: String,
    /// Topics to read.
    pub topics: Vec<String>,
    /// How long a fetch waits for the first message of a batch.
    pub poll_timeout: Duration,
    /// Bound on topic metadata lookups at startup.
    pub metadata_timeout: Duration,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl KafkaLogConfig {
    pub fn new(
        bootstrap_servers: impl Into<String>,
        group_id: impl Into<String>,
        topics: Vec<String>,
    ) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            group_id: group_id.into(),
            topics,
            poll_timeout: Duration::from_millis(200),
            metadata_timeout: Duration::from_secs(10),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set security protocol.
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SSL CA certificate location.
    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Offsets are committed explicitly, and only after a message is handled.
    fn build_consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", &self.group_id);
        config.set("enable.auto.commit", "false");
        config.set("enable.auto.offset.store", "false");
        config.set("auto.offset.reset", "earliest");

        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }
        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }
        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }
        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }
        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
        config
    }
}

/// Messages handed out but not yet committed, oldest first.
#[derive(Default)]
struct Pending {
    messages: VecDeque<LogMessage>,
    committed: Option<LogPosition>,
}

impl Pending {
    /// Drops everything up to `position`. Returns false if `position` is
    /// already committed, so there is nothing to tell the broker.
    fn commit(
        &mut self,
        partition: PartitionId,
        position: LogPosition,
    ) -> Result<bool, ConsumerError> {
        let last = self.messages.back().map(|m| m.position).or(self.committed);
        if last.is_none_or(|last| position > last) {
            return Err(ConsumerError::CommitOutOfRange {
                partition,
                position,
            });
        }

        self.messages.retain(|m| m.position > position);
        if self.committed.is_some_and(|c| c >= position) {
            return Ok(false);
        }
        self.committed = Some(position);
        Ok(true)
    }
}

struct Slot {
    topic: String,
    partition: i32,
    queue: StreamPartitionQueue<DefaultConsumerContext>,
    pending: Mutex<Pending>,
}

/// Kafka consumer exposed as a partitioned, committable log.
///
/// Fetched messages stay buffered until committed, so a failed dispatch sees
/// the same messages again on the next fetch.
pub struct KafkaLog {
    consumer: Arc<StreamConsumer>,
    slots: Vec<Slot>,
    poll_timeout: Duration,
    shutdown: CancellationToken,
}

impl KafkaLog {
    /// Creates the consumer and assigns every partition of the configured
    /// topics to it.
    pub async fn connect(config: KafkaLogConfig) -> Result<Self, ConsumerError> {
        let consumer: StreamConsumer = config.build_consumer_config().create().map_err(|e| {
            ConsumerError::Log(format!("Failed to create Kafka consumer: {e}"))
        })?;
        let consumer = Arc::new(consumer);

        let partitions = tokio::task::spawn_blocking({
            let consumer = Arc::clone(&consumer);
            let topics = config.topics.clone();
            let timeout = config.metadata_timeout;
            move || discover(&consumer, &topics, timeout)
        })
        .await
        .map_err(|e| ConsumerError::Log(format!("Metadata lookup aborted: {e}")))??;

        // Queues are split before assignment so no message reaches the main queue.
        let mut assignment = TopicPartitionList::new();
        let mut slots = Vec::with_capacity(partitions.len());
        for (topic, partition) in partitions {
            let queue = consumer
                .split_partition_queue(&topic, partition)
                .ok_or_else(|| {
                    ConsumerError::Log(format!("Cannot split queue of {topic}/{partition}"))
                })?;
            assignment
                .add_partition_offset(&topic, partition, Offset::Stored)
                .map_err(|e| ConsumerError::Log(e.to_string()))?;
            slots.push(Slot {
                topic,
                partition,
                queue,
                pending: Mutex::new(Pending::default()),
            });
        }
        consumer
            .assign(&assignment)
            .map_err(|e| ConsumerError::Log(format!("Failed to assign partitions: {e}")))?;

        let shutdown = CancellationToken::new();
        tokio::spawn(serve_events(Arc::clone(&consumer), shutdown.clone()));

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            group = %config.group_id,
            topics = ?config.topics,
            partitions = slots.len(),
            "Connected to Kafka"
        );

        Ok(Self {
            consumer,
            slots,
            poll_timeout: config.poll_timeout,
            shutdown,
        })
    }

    fn slot(&self, partition: PartitionId) -> Result<&Slot, ConsumerError> {
        self.slots
            .get(partition.as_u32() as usize)
            .ok_or(ConsumerError::UnknownPartition(partition))
    }
}

impl Drop for KafkaLog {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl MessageLog for KafkaLog {
    async fn assignments(&self) -> Result<Vec<PartitionId>, ConsumerError> {
        Ok((0..self.slots.len() as u32).map(PartitionId::new).collect())
    }

    async fn fetch(
        &self,
        partition: PartitionId,
        max: usize,
    ) -> Result<Vec<LogMessage>, ConsumerError> {
        let slot = self.slot(partition)?;
        let mut pending = slot.pending.lock().await;

        // Wait for the first message only; after that take what is ready.
        while pending.messages.len() < max {
            let next = if pending.messages.is_empty() {
                match tokio::time::timeout(self.poll_timeout, slot.queue.recv()).await {
                    Ok(next) => next,
                    Err(_) => break,
                }
            } else {
                match slot.queue.recv().now_or_never() {
                    Some(next) => next,
                    None => break,
                }
            };
            let message = next.map_err(|e| ConsumerError::Log(e.to_string()))?;
            pending.messages.push_back(to_log_message(&message, partition));
        }

        Ok(pending.messages.iter().take(max).cloned().collect())
    }

    async fn commit(
        &self,
        partition: PartitionId,
        position: LogPosition,
    ) -> Result<(), ConsumerError> {
        let slot = self.slot(partition)?;
        let mut pending = slot.pending.lock().await;
        if !pending.commit(partition, position)? {
            return Ok(());
        }

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &slot.topic,
                slot.partition,
                Offset::Offset(position.as_i64() + 1),
            )
            .map_err(|e| ConsumerError::Log(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| ConsumerError::Log(format!("Failed to commit offset: {e}")))?;

        debug!(topic = %slot.topic, partition = slot.partition, %position, "Committed offset");
        Ok(())
    }
}

/// Partitions of every topic, in topic order.
fn discover(
    consumer: &StreamConsumer,
    topics: &[String],
    timeout: Duration,
) -> Result<Vec<(String, i32)>, ConsumerError> {
    let mut partitions = Vec::new();
    for topic in topics {
        let metadata = consumer
            .fetch_metadata(Some(topic.as_str()), timeout)
            .map_err(|e| ConsumerError::Log(format!("No metadata for {topic}: {e}")))?;
        let found: Vec<i32> = metadata
            .topics()
            .iter()
            .filter(|t| t.name() == topic && t.error().is_none())
            .flat_map(|t| t.partitions().iter().map(|p| p.id()))
            .collect();
        if found.is_empty() {
            return Err(ConsumerError::Log(format!("Topic {topic} has no partitions")));
        }
        partitions.extend(found.into_iter().map(|p| (topic.clone(), p)));
    }
    Ok(partitions)
}

/// Polls the main queue so that client events and commit callbacks are
/// served. Messages never land there once every partition is split off.
async fn serve_events(consumer: Arc<StreamConsumer>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = consumer.recv() => match next {
                Ok(message) => warn!(
                    topic = %message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    "Message on the main queue, ignoring"
                ),
                Err(e) => warn!(error = %e, "Kafka consumer error"),
            },
        }
    }
}

fn to_log_message<M: Message>(message: &M, partition: PartitionId) -> LogMessage {
    let produced_at = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    LogMessage {
        partition,
        position: LogPosition::new(message.offset()),
        topic: message.topic().to_string(),
        key: message.key().map(<[u8]>::to_vec).unwrap_or_default(),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        produced_at,
    }
}

#[cfg(test)]
mod tests;
