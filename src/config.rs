//! Pipeline configuration
//!
//! Loaded from a TOML document. Every section is optional and falls back to
//! its defaults, so an empty file is a valid (local, single-worker) config.
//!
//! ```toml
//! [connection]
//! host = "10.0.0.7"
//! pool_size = 16
//!
//! [producer]
//! stream = "orders"
//! max_batch_size = 500
//! linger_ms = 5
//!
//! [ack]
//! failure_policy = "fail_stage"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::ack::{AckConfig, AckFailurePolicy};
use crate::consumer::ConsumerConfig;
use crate::error::{PipelineError, Result};
use crate::producer::ProducerConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Log store connection settings
    pub connection: ConnectionSettings,
    /// Producer stage settings
    pub producer: ProducerSettings,
    /// Consumer stage settings
    pub consumer: ConsumerSettings,
    /// Acknowledgment stage settings
    pub ack: AckSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Connection to the log store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Optional AUTH password
    pub password: Option<String>,
    /// Database index
    pub database: u8,
    /// Maximum pooled connections
    pub pool_size: usize,
    /// Per-reply timeout in milliseconds
    pub response_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            database: 0,
            pool_size: 8,
            response_timeout_ms: 30_000,
        }
    }
}

/// Producer stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    /// Target stream
    pub stream: String,
    /// Records per batch
    pub max_batch_size: usize,
    /// Longest a partial batch waits for more records
    pub linger_ms: u64,
    /// Batches in flight at once
    pub max_in_flight_batches: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            stream: "events".to_string(),
            max_batch_size: 100,
            linger_ms: 10,
            max_in_flight_batches: 4,
        }
    }
}

/// Consumer stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Source stream
    pub stream: String,
    /// Consumer group
    pub group: String,
    /// This member's name
    pub consumer: String,
    /// Poll cadence
    pub poll_interval_ms: u64,
    /// Records per poll
    pub count: usize,
    /// Polls in flight at once
    pub max_in_flight_polls: usize,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            stream: "events".to_string(),
            group: "pipeline".to_string(),
            consumer: "consumer-1".to_string(),
            poll_interval_ms: 100,
            count: 100,
            max_in_flight_polls: 1,
        }
    }
}

/// Acknowledgment stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AckSettings {
    /// Stream the acknowledged records belong to
    pub stream: String,
    /// Consumer group
    pub group: String,
    /// Acks in flight at once
    pub max_in_flight: usize,
    /// What to do when an ack fails
    pub failure_policy: AckFailurePolicy,
}

impl Default for AckSettings {
    fn default() -> Self {
        Self {
            stream: "events".to_string(),
            group: "pipeline".to_string(),
            max_in_flight: 16,
            failure_policy: AckFailurePolicy::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,

    /// JSON format
    Json,
}

fn non_zero(value: u64, what: &str) -> Result<()> {
    if value == 0 {
        return Err(PipelineError::Config(format!("{} cannot be 0", what)));
    }
    Ok(())
}

fn non_empty(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(PipelineError::Config(format!("{} cannot be empty", what)));
    }
    Ok(())
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let c = &self.connection;
        non_empty(&c.host, "connection.host")?;
        non_zero(c.port as u64, "connection.port")?;
        non_zero(c.pool_size as u64, "connection.pool_size")?;
        non_zero(c.response_timeout_ms, "connection.response_timeout_ms")?;

        let p = &self.producer;
        non_empty(&p.stream, "producer.stream")?;
        non_zero(p.max_batch_size as u64, "producer.max_batch_size")?;
        non_zero(p.linger_ms, "producer.linger_ms")?;
        non_zero(p.max_in_flight_batches as u64, "producer.max_in_flight_batches")?;

        let r = &self.consumer;
        non_empty(&r.stream, "consumer.stream")?;
        non_empty(&r.group, "consumer.group")?;
        non_empty(&r.consumer, "consumer.consumer")?;
        non_zero(r.poll_interval_ms, "consumer.poll_interval_ms")?;
        non_zero(r.count as u64, "consumer.count")?;
        non_zero(r.max_in_flight_polls as u64, "consumer.max_in_flight_polls")?;

        let a = &self.ack;
        non_empty(&a.stream, "ack.stream")?;
        non_empty(&a.group, "ack.group")?;
        non_zero(a.max_in_flight as u64, "ack.max_in_flight")?;

        Ok(())
    }

    /// Pool settings for [`crate::store::RespLogStore::connect`]
    pub fn pool_config(&self) -> ferrite_rs::PoolConfig {
        let c = &self.connection;
        ferrite_rs::PoolConfig {
            connection: ferrite_rs::ConnectionConfig {
                password: c.password.clone(),
                database: c.database,
                response_timeout: Duration::from_millis(c.response_timeout_ms),
                ..ferrite_rs::ConnectionConfig::from_addr(c.host.clone(), c.port)
            },
            max_size: c.pool_size,
        }
    }

    /// Producer stage configuration
    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            stream: self.producer.stream.clone(),
            max_batch_size: self.producer.max_batch_size,
            linger: Duration::from_millis(self.producer.linger_ms),
            max_in_flight_batches: self.producer.max_in_flight_batches,
        }
    }

    /// Consumer stage configuration
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            stream: self.consumer.stream.clone(),
            group: self.consumer.group.clone(),
            consumer: self.consumer.consumer.clone(),
            poll_interval: Duration::from_millis(self.consumer.poll_interval_ms),
            count: self.consumer.count,
            max_in_flight_polls: self.consumer.max_in_flight_polls,
        }
    }

    /// Acknowledgment stage configuration
    pub fn ack_config(&self) -> AckConfig {
        AckConfig {
            stream: self.ack.stream.clone(),
            group: self.ack.group.clone(),
            max_in_flight: self.ack.max_in_flight,
            failure_policy: self.ack.failure_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.connection.port, 6379);
        assert_eq!(config.producer.max_batch_size, 100);
        assert_eq!(config.consumer.max_in_flight_polls, 1);
        assert_eq!(config.ack.failure_policy, AckFailurePolicy::LogAndSkip);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_str() {
        let toml = r#"
[connection]
host = "10.0.0.7"
port = 6380
pool_size = 2

[producer]
stream = "orders"
max_batch_size = 500
linger_ms = 5

[consumer]
group = "billing"
poll_interval_ms = 250

[ack]
failure_policy = "fail_stage"

[logging]
level = "debug"
format = "json"
"#;

        let config = PipelineConfig::parse_str(toml).unwrap();
        assert_eq!(config.connection.host, "10.0.0.7");
        assert_eq!(config.connection.port, 6380);
        assert_eq!(config.producer.stream, "orders");
        assert_eq!(config.producer.max_in_flight_batches, 4);
        assert_eq!(config.consumer.group, "billing");
        assert_eq!(config.consumer.consumer, "consumer-1");
        assert_eq!(config.ack.failure_policy, AckFailurePolicy::FailStage);
        assert_eq!(config.logging.format, LogFormat::Json);

        let producer = config.producer_config();
        assert_eq!(producer.linger, Duration::from_millis(5));
        let consumer = config.consumer_config();
        assert_eq!(consumer.poll_interval, Duration::from_millis(250));
        let pool = config.pool_config();
        assert_eq!(pool.max_size, 2);
        assert_eq!(pool.connection.address(), "10.0.0.7:6380");
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::parse_str("").unwrap();
        assert_eq!(config.consumer.count, 100);
    }

    #[test]
    fn test_validate_rejects_zero_width() {
        let mut config = PipelineConfig::default();
        config.ack.max_in_flight = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ack.max_in_flight"));

        let mut config = PipelineConfig::default();
        config.consumer.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.consumer.group = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_errors_are_config_errors() {
        let err = PipelineConfig::parse_str("[ack]\nfailure_policy = \"retry\"").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[producer]\nstream = \"from-file\"").unwrap();
        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.producer.stream, "from-file");

        assert!(PipelineConfig::from_file("/nonexistent/pipeline.toml").is_err());
    }
}
