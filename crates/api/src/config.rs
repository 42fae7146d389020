//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use cache::KeySpace;
use projections::{ConsumerSettings, TopicConfig};
use query::QuerySettings;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `BASE_PATH`: prefix of the query routes (default `/api/queries`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `DATABASE_URL`, `REDIS_URL`: backends; in-memory when unset
/// - `CACHE_NAMESPACE`, `CACHE_TTL_SECS`: cache key prefix and entry lifetime
/// - `STORE_TIMEOUT_MS`: bound on every backend call
/// - `SEARCH_LIMIT`: maximum items per search page
/// - `RECONCILE_INTERVAL_SECS`: search mirror sweep period, `0` disables it
/// - `KAFKA_BROKERS`: Kafka bootstrap servers; the message log is in memory
///   when unset or when built without the `kafka` feature
/// - `CONSUMER_GROUP`: consumer group id
/// - `LOG_PARTITIONS`: partition count of the in-memory message log
/// - `PRODUCT_TOPIC`, `INVENTORY_TOPIC`, `ORDER_TOPIC`: event topics
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub kafka_brokers: Option<String>,
    pub cache_namespace: String,
    pub cache_ttl: Duration,
    pub store_timeout: Duration,
    pub search_limit: usize,
    pub reconcile_interval: Duration,
    pub consumer_group: String,
    pub log_partitions: u32,
    pub product_topic: String,
    pub inventory_topic: String,
    pub order_topic: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |name: &str, default: String| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
        };
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: text("HOST", defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            base_path: normalize_base_path(&text("BASE_PATH", defaults.base_path)),
            log_level: text("RUST_LOG", defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            redis_url: lookup("REDIS_URL").filter(|v| !v.trim().is_empty()),
            kafka_brokers: lookup("KAFKA_BROKERS").filter(|v| !v.trim().is_empty()),
            cache_namespace: text("CACHE_NAMESPACE", defaults.cache_namespace),
            cache_ttl: parsed("CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            store_timeout: parsed("STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            search_limit: parsed("SEARCH_LIMIT")
                .filter(|limit| *limit > 0)
                .map(|limit| limit as usize)
                .unwrap_or(defaults.search_limit),
            reconcile_interval: parsed("RECONCILE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            consumer_group: text("CONSUMER_GROUP", defaults.consumer_group),
            log_partitions: lookup("LOG_PARTITIONS")
                .and_then(|p| p.trim().parse().ok())
                .filter(|p| *p > 0)
                .unwrap_or(defaults.log_partitions),
            product_topic: text("PRODUCT_TOPIC", defaults.product_topic),
            inventory_topic: text("INVENTORY_TOPIC", defaults.inventory_topic),
            order_topic: text("ORDER_TOPIC", defaults.order_topic),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(self.cache_namespace.clone())
    }

    pub fn query_settings(&self) -> QuerySettings {
        QuerySettings {
            cache_ttl: self.cache_ttl,
            store_timeout: self.store_timeout,
            search_limit: self.search_limit,
        }
    }

    pub fn topics(&self) -> TopicConfig {
        TopicConfig::new(
            self.product_topic.clone(),
            self.inventory_topic.clone(),
            self.order_topic.clone(),
        )
    }

    /// Every topic the consumer reads.
    pub fn topic_names(&self) -> Vec<String> {
        let topics = self.topics();
        topics.all().into_iter().map(String::from).collect()
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            group: self.consumer_group.clone(),
            ..ConsumerSettings::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let query = QuerySettings::default();
        let topics = TopicConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            base_path: "/api/queries".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            redis_url: None,
            kafka_brokers: None,
            cache_namespace: KeySpace::default().namespace().to_string(),
            cache_ttl: query.cache_ttl,
            store_timeout: query.store_timeout,
            search_limit: query.search_limit,
            reconcile_interval: Duration::from_secs(300),
            consumer_group: ConsumerSettings::default().group,
            log_partitions: 4,
            product_topic: topics.product,
            inventory_topic: topics.inventory,
            order_topic: topics.order,
        }
    }
}

/// Leading slash, no trailing slash. The root maps to an empty prefix.
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.base_path, "/api/queries");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.database_url, None);
        assert_eq!(config.cache_namespace, "catalog");
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert_eq!(config.search_limit, 100);
        assert_eq!(config.topics(), TopicConfig::default());
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.addr(), Config::default().addr());
        assert_eq!(config.base_path, "/api/queries");
        assert_eq!(config.log_partitions, 4);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("BASE_PATH", "v1/"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/catalog"),
            ("CACHE_NAMESPACE", "shop"),
            ("CACHE_TTL_SECS", "60"),
            ("STORE_TIMEOUT_MS", "250"),
            ("SEARCH_LIMIT", "20"),
            ("ORDER_TOPIC", "order-events"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.base_path, "/v1");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/catalog")
        );
        assert_eq!(config.redis_url, None);
        assert_eq!(config.key_space().namespace(), "shop");

        let settings = config.query_settings();
        assert_eq!(settings.cache_ttl, Duration::from_secs(60));
        assert_eq!(settings.store_timeout, Duration::from_millis(250));
        assert_eq!(settings.search_limit, 20);
        assert_eq!(config.topics().order, "order-events");
        assert_eq!(config.topics().product, "products");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "http"),
            ("SEARCH_LIMIT", "0"),
            ("LOG_PARTITIONS", "-1"),
            ("LOG_FORMAT", "xml"),
            ("REDIS_URL", "  "),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.search_limit, 100);
        assert_eq!(config.log_partitions, 4);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn test_kafka_brokers_and_topics() {
        let config = from_pairs(&[
            ("KAFKA_BROKERS", "kafka-1:9092,kafka-2:9092"),
            ("CONSUMER_GROUP", "query-service"),
            ("INVENTORY_TOPIC", "stock"),
        ]);
        assert_eq!(
            config.kafka_brokers.as_deref(),
            Some("kafka-1:9092,kafka-2:9092")
        );
        assert_eq!(config.consumer_settings().group, "query-service");
        assert_eq!(config.topic_names(), vec!["products", "stock", "orders"]);

        assert_eq!(from_pairs(&[("KAFKA_BROKERS", " ")]).kafka_brokers, None);
        assert_eq!(Config::default().kafka_brokers, None);
    }

    #[test]
    fn test_root_base_path_is_empty() {
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/api/queries/"), "/api/queries");
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
