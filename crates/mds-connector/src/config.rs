//! Connector and host-service configuration.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set or empty.
    #[error("environment variable {0} must be set")]
    Missing(&'static str),

    /// A variable is set to a value that cannot be used.
    #[error("environment variable {name} is invalid: {reason}")]
    Invalid {
        /// Name of the variable.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Timing and concurrency of the connector loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Sleep after an iteration that found nothing to do.
    pub poll_wait: Duration,
    /// Sleep after a failed iteration.
    pub error_cooldown: Duration,
    /// Upper bound for one broker write.
    pub write_timeout: Duration,
    /// Upper bound for one transaction commit.
    pub commit_timeout: Duration,
    /// Number of concurrent outbox pump workers.
    pub pump_workers: usize,
    /// Interval between broker metadata reads while awaiting topics.
    pub topic_poll_interval: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_millis(500),
            error_cooldown: Duration::from_secs(3),
            write_timeout: Duration::from_secs(10),
            commit_timeout: Duration::from_secs(15),
            pump_workers: KafkaConfig::DEFAULT_BATCH_SIZE,
            topic_poll_interval: Duration::from_secs(1),
        }
    }
}

impl ConnectorConfig {
    #[must_use]
    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    #[must_use]
    pub fn with_error_cooldown(mut self, error_cooldown: Duration) -> Self {
        self.error_cooldown = error_cooldown;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    #[must_use]
    pub fn with_commit_timeout(mut self, commit_timeout: Duration) -> Self {
        self.commit_timeout = commit_timeout;
        self
    }

    /// Sets the pump worker count. Zero is raised to one.
    #[must_use]
    pub fn with_pump_workers(mut self, pump_workers: usize) -> Self {
        self.pump_workers = pump_workers.max(1);
        self
    }

    #[must_use]
    pub fn with_topic_poll_interval(mut self, topic_poll_interval: Duration) -> Self {
        self.topic_poll_interval = topic_poll_interval;
        self
    }
}

/// Broker connection settings used to build the Kafka adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Bootstrap address, `host:port`.
    pub addr: String,
    /// Consumer group of the reader.
    pub group_id: String,
    /// Producer send attempts per record.
    pub max_attempts: u32,
    /// Records per producer batch.
    pub batch_size: usize,
    /// How long the producer waits to fill a batch.
    pub batch_timeout: Duration,
}

impl KafkaConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;
    pub const DEFAULT_BATCH_SIZE: usize = 4;
    pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(50);

    /// Creates a config with the default producer settings.
    #[must_use]
    pub fn new(addr: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            group_id: group_id.into(),
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            batch_timeout: Self::DEFAULT_BATCH_TIMEOUT,
        }
    }
}

/// Environment shared by every service hosting the connector.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicConfig {
    /// `PostgreSQL` connection string.
    pub db_conn_string: String,
    /// Broker bootstrap address.
    pub kafka_addr: String,
    /// Secret used to sign and verify auth tokens.
    pub auth_token_secret: String,
    /// Address the readiness probe listens on.
    pub ready_probe_serve_addr: String,
    /// Default log level when `RUST_LOG` is not set.
    pub log_level: String,
}

impl fmt::Debug for BasicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicConfig")
            .field("db_conn_string", &"<redacted>")
            .field("kafka_addr", &self.kafka_addr)
            .field("auth_token_secret", &"<redacted>")
            .field("ready_probe_serve_addr", &self.ready_probe_serve_addr)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl BasicConfig {
    pub const DB_CONN_STRING: &'static str = "MDS_DB_CONN_STRING";
    pub const KAFKA_ADDR: &'static str = "MDS_KAFKA_ADDR";
    pub const AUTH_TOKEN_SECRET: &'static str = "MDS_AUTH_TOKEN_SECRET";
    pub const READY_PROBE_SERVE_ADDR: &'static str = "MDS_READY_PROBE_SERVE_ADDR";
    pub const LOG_LEVEL: &'static str = "MDS_LOG_LEVEL";

    pub const DEFAULT_READY_PROBE_SERVE_ADDR: &'static str = ":8080";
    pub const DEFAULT_LOG_LEVEL: &'static str = "info";

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for unset required variables and
    /// `ConfigError::Invalid` for an unknown log level.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`BasicConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &'static str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &'static str| optional(name).ok_or(ConfigError::Missing(name));

        let log_level = optional(Self::LOG_LEVEL)
            .unwrap_or_else(|| Self::DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();
        log_level
            .parse::<tracing::Level>()
            .map_err(|err| ConfigError::Invalid {
                name: Self::LOG_LEVEL,
                reason: err.to_string(),
            })?;

        Ok(Self {
            db_conn_string: required(Self::DB_CONN_STRING)?,
            kafka_addr: required(Self::KAFKA_ADDR)?,
            auth_token_secret: required(Self::AUTH_TOKEN_SECRET)?,
            ready_probe_serve_addr: optional(Self::READY_PROBE_SERVE_ADDR)
                .unwrap_or_else(|| Self::DEFAULT_READY_PROBE_SERVE_ADDR.to_string()),
            log_level,
        })
    }
}

/// Environment of the `mds-outbox-relay` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub basic: BasicConfig,
    /// Topics the relay waits for before sending. Comma separated in the
    /// environment.
    pub topics: Vec<String>,
}

impl RelayConfig {
    pub const TOPICS: &'static str = "MDS_RELAY_TOPICS";

    /// Longest topic name the broker accepts.
    const MAX_TOPIC_LEN: usize = 249;

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Same as [`BasicConfig::from_env`]; additionally `ConfigError::Missing`
    /// if no topic is listed and `ConfigError::Invalid` for a topic name the
    /// broker would reject.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let basic = BasicConfig::from_lookup(&lookup)?;
        let topics: Vec<String> = lookup(Self::TOPICS)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string)
            .collect();
        if topics.is_empty() {
            return Err(ConfigError::Missing(Self::TOPICS));
        }
        if let Some(topic) = topics.iter().find(|topic| !Self::is_valid_topic(topic)) {
            return Err(ConfigError::Invalid {
                name: Self::TOPICS,
                reason: format!("illegal topic name {topic:?}"),
            });
        }
        Ok(Self { basic, topics })
    }

    fn is_valid_topic(topic: &str) -> bool {
        topic.len() <= Self::MAX_TOPIC_LEN
            && topic != "."
            && topic != ".."
            && topic
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn required_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("MDS_DB_CONN_STRING", "postgres://mds@localhost/mds"),
            ("MDS_KAFKA_ADDR", "localhost:9092"),
            ("MDS_AUTH_TOKEN_SECRET", "s3cr3t"),
        ]
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ConnectorConfig::default();

        assert_eq!(config.poll_wait, Duration::from_millis(500));
        assert_eq!(config.error_cooldown, Duration::from_secs(3));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.commit_timeout, Duration::from_secs(15));
        assert_eq!(config.pump_workers, 4);
    }

    #[test]
    fn test_zero_pump_workers_is_raised_to_one() {
        let config = ConnectorConfig::default().with_pump_workers(0);

        assert_eq!(config.pump_workers, 1);
    }

    #[test]
    fn test_kafka_config_uses_writer_defaults() {
        let config = KafkaConfig::new("localhost:9092", "operation-service");

        assert_eq!(config.max_attempts, 16);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.batch_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_basic_config_reads_required_and_defaults() {
        let config = BasicConfig::from_lookup(lookup(&required_vars())).unwrap();

        assert_eq!(config.kafka_addr, "localhost:9092");
        assert_eq!(config.auth_token_secret, "s3cr3t");
        assert_eq!(config.ready_probe_serve_addr, ":8080");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_basic_config_requires_auth_token_secret() {
        let mut vars = required_vars();
        vars.retain(|(name, _)| *name != "MDS_AUTH_TOKEN_SECRET");

        let result = BasicConfig::from_lookup(lookup(&vars));

        assert_eq!(result, Err(ConfigError::Missing("MDS_AUTH_TOKEN_SECRET")));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut vars = required_vars();
        vars.push(("MDS_KAFKA_ADDR", "  "));
        vars.remove(1);

        let result = BasicConfig::from_lookup(lookup(&vars));

        assert_eq!(result, Err(ConfigError::Missing("MDS_KAFKA_ADDR")));
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let mut vars = required_vars();
        vars.push(("MDS_LOG_LEVEL", "chatty"));

        let result = BasicConfig::from_lookup(lookup(&vars));

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "MDS_LOG_LEVEL", .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = BasicConfig::from_lookup(lookup(&required_vars())).unwrap();

        let printed = format!("{config:?}");

        assert!(!printed.contains("s3cr3t"));
        assert!(!printed.contains("postgres://"));
    }

    #[test]
    fn test_relay_config_splits_and_trims_topics() {
        let mut vars = required_vars();
        vars.push(("MDS_RELAY_TOPICS", " intel, intel-deliveries,,core.users.0 "));

        let config = RelayConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.topics, vec!["intel", "intel-deliveries", "core.users.0"]);
        assert_eq!(config.basic.kafka_addr, "localhost:9092");
    }

    #[test]
    fn test_relay_config_requires_a_topic() {
        let mut vars = required_vars();
        vars.push(("MDS_RELAY_TOPICS", " , "));

        let result = RelayConfig::from_lookup(lookup(&vars));

        assert_eq!(result, Err(ConfigError::Missing("MDS_RELAY_TOPICS")));
    }

    #[test]
    fn test_relay_config_rejects_illegal_topic_name() {
        let mut vars = required_vars();
        vars.push(("MDS_RELAY_TOPICS", "intel,radio deliveries"));

        let result = RelayConfig::from_lookup(lookup(&vars));

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "MDS_RELAY_TOPICS", .. })
        ));
    }
}
