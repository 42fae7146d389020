use super::*;
use rdkafka::message::{OwnedMessage, Timestamp};

fn config() -> KafkaLogConfig {
    KafkaLogConfig::new(
        "localhost:9092",
        "catalog-read-side",
        vec!["products".to_string(), "orders".to_string()],
    )
}

fn message(position: i64) -> LogMessage {
    LogMessage {
        partition: PartitionId::new(0),
        position: LogPosition::new(position),
        topic: "products".to_string(),
        key: b"ProductUpdated".to_vec(),
        payload: b"{}".to_vec(),
        produced_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
    }
}

#[test]
fn test_consumer_config_commits_manually() {
    let config = config().build_consumer_config();
    assert_eq!(config.get("bootstrap.servers"), Some("localhost:9092"));
    assert_eq!(config.get("group.id"), Some("catalog-read-side"));
    assert_eq!(config.get("enable.auto.commit"), Some("false"));
    assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
    assert_eq!(config.get("security.protocol"), None);
}

#[test]
fn test_sasl_config() {
    let config = config().with_sasl("user", "pass", "SCRAM-SHA-256");
    assert_eq!(config.sasl_username, Some("user".to_string()));
    assert_eq!(config.security_protocol, Some("SASL_SSL".to_string()));

    let client = config.build_consumer_config();
    assert_eq!(client.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
    assert_eq!(client.get("security.protocol"), Some("SASL_SSL"));
}

#[test]
fn test_ssl_config() {
    let config = config()
        .with_security_protocol("SSL")
        .with_ssl_ca("/path/to/ca.crt");
    let client = config.build_consumer_config();
    assert_eq!(client.get("security.protocol"), Some("SSL"));
    assert_eq!(client.get("ssl.ca.location"), Some("/path/to/ca.crt"));
}

#[test]
fn test_kafka_message_keeps_offset_key_and_timestamp() {
    let raw = OwnedMessage::new(
        Some(b"{\"productId\":\"P1\"}".to_vec()),
        Some(b"ProductCreated".to_vec()),
        "products".to_string(),
        Timestamp::CreateTime(1_700_000_000_123),
        3,
        42,
        None,
    );

    let message = to_log_message(&raw, PartitionId::new(5));
    assert_eq!(message.partition, PartitionId::new(5));
    assert_eq!(message.position, LogPosition::new(42));
    assert_eq!(message.topic, "products");
    assert_eq!(message.key, b"ProductCreated".to_vec());
    assert_eq!(message.payload, b"{\"productId\":\"P1\"}".to_vec());
    assert_eq!(message.produced_at.timestamp_millis(), 1_700_000_000_123);
}

#[test]
fn test_missing_key_and_payload_are_empty() {
    let raw = OwnedMessage::new(
        None,
        None,
        "orders".to_string(),
        Timestamp::NotAvailable,
        0,
        0,
        None,
    );

    let message = to_log_message(&raw, PartitionId::new(0));
    assert!(message.key.is_empty());
    assert!(message.payload.is_empty());
}

#[test]
fn test_commit_drops_handled_messages_only() {
    let mut pending = Pending::default();
    pending.messages.extend([message(10), message(11), message(12)]);

    assert!(pending.commit(PartitionId::new(0), LogPosition::new(11)).unwrap());
    let left: Vec<_> = pending.messages.iter().map(|m| m.position).collect();
    assert_eq!(left, vec![LogPosition::new(12)]);
    assert_eq!(pending.committed, Some(LogPosition::new(11)));
}

#[test]
fn test_commit_never_moves_backwards() {
    let mut pending = Pending::default();
    pending.messages.extend([message(1), message(2)]);

    assert!(pending.commit(PartitionId::new(0), LogPosition::new(2)).unwrap());
    assert!(!pending.commit(PartitionId::new(0), LogPosition::new(1)).unwrap());
    assert_eq!(pending.committed, Some(LogPosition::new(2)));
}

#[test]
fn test_commit_beyond_fetched_is_rejected() {
    let mut pending = Pending::default();
    let err = pending
        .commit(PartitionId::new(0), LogPosition::new(0))
        .unwrap_err();
    assert!(matches!(err, ConsumerError::CommitOutOfRange { .. }));

    pending.messages.push_back(message(4));
    let err = pending
        .commit(PartitionId::new(0), LogPosition::new(5))
        .unwrap_err();
    assert!(matches!(err, ConsumerError::CommitOutOfRange { .. }));
    assert_eq!(pending.messages.len(), 1);
}
