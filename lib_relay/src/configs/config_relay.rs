//! # Relay Configuration
//!
//! Every setting can be given as a long flag or through its environment
//! variable. [`RelayArgs::validate`] turns the raw values into
//! [`RelaySettings`] or reports every problem at once.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::core::dispatcher::DEFAULT_BUFFER_CAPACITY;
use crate::ingestors::adapter::{DEFAULT_RECONNECT_MAX_DELAY, DEFAULT_RECONNECT_MIN_DELAY};
use crate::ingestors::kafka::{KafkaConfig, DEFAULT_GROUP_ID, DEFAULT_METADATA_TIMEOUT};

/// Port used when `RELAY_PORT` is not set.
pub const DEFAULT_PORT: u16 = 5000;
/// Keep-alive interval used when `RELAY_KEEP_ALIVE_SECONDS` is not set.
pub const DEFAULT_KEEP_ALIVE_SECONDS: u64 = 15;
/// Directory of the browser client when `RELAY_STATIC_DIR` is not set.
pub const DEFAULT_STATIC_DIR: &str = "static";
/// Largest accepted keep-alive interval. Streams add it to the current instant
/// on every frame, so it must stay far from `Instant` overflow.
pub const MAX_KEEP_ALIVE_SECONDS: u64 = 86_400;

/// A single configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("required configuration {0} is not set")]
    Missing(&'static str),

    #[error("required configuration {0} is empty")]
    Empty(&'static str),

    #[error("configuration {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Raw relay settings as given on the command line or in the environment.
#[derive(Parser, Debug, Clone, Default)]
#[clap(about = "Kafka to Server-Sent Events broadcast relay", version)]
pub struct RelayArgs {
    #[clap(long, env = "CONSUMER_BOOTSTRAP_1", help = "Primary Kafka bootstrap servers, comma separated.")]
    pub consumer_bootstrap_1: Option<String>,

    #[clap(long, env = "CONSUMER_BOOTSTRAP_2", help = "Secondary Kafka bootstrap servers, comma separated (not used for connecting).")]
    pub consumer_bootstrap_2: Option<String>,

    #[clap(long, env = "KAFKA_TOPIC", help = "Kafka topic to relay.")]
    pub kafka_topic: Option<String>,

    #[clap(long, env = "KAFKA_CERT_FILE", help = "Path to the client certificate (PEM).")]
    pub kafka_cert_file: Option<PathBuf>,

    #[clap(long, env = "KAFKA_KEY_FILE", help = "Path to the client private key (PEM).")]
    pub kafka_key_file: Option<PathBuf>,

    #[clap(long, env = "KAFKA_CA_FILE", help = "Path to the CA bundle (PEM).")]
    pub kafka_ca_file: Option<PathBuf>,

    #[clap(long, env = "KAFKA_GROUP_ID", help = "Kafka consumer group id.")]
    pub kafka_group_id: Option<String>,

    #[clap(long, env = "RELAY_PORT", help = "Port to listen on for subscriber connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_BUFFER_CAPACITY", help = "Messages buffered per subscriber before the oldest is dropped.")]
    pub buffer_capacity: Option<usize>,

    #[clap(long, env = "RELAY_KEEP_ALIVE_SECONDS", help = "Seconds between keep-alive frames on idle streams (0 disables, at most 86400).")]
    pub keep_alive_seconds: Option<u64>,

    #[clap(long, env = "RELAY_RECONNECT_MIN_DELAY_MS", help = "Minimum delay in milliseconds before reconnecting to Kafka.")]
    pub reconnect_min_delay_ms: Option<u64>,

    #[clap(long, env = "RELAY_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds before reconnecting to Kafka.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "RELAY_STATIC_DIR", help = "Directory holding the browser client, served under /static.")]
    pub static_dir: Option<PathBuf>,

    #[clap(long, env = "LOG_DIR", help = "Directory for JSON log files. Console only when unset.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RUST_LOG", help = "Logging level or filter directive.")]
    pub log_level: Option<String>,
}

/// HTTP side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub port: u16,
    pub buffer_capacity: usize,
    /// `None` disables keep-alive frames.
    pub keep_alive: Option<Duration>,
    /// Browser client assets.
    pub static_dir: PathBuf,
}

/// Reconnect delay bounds for the ingestion adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectSettings {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

/// # Relay Settings
///
/// Fully validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub kafka: KafkaConfig,
    pub server: ServerSettings,
    pub reconnect: ReconnectSettings,
}

impl RelayArgs {
    /// Validates the raw values.
    ///
    /// # Errors
    /// Every missing, empty or invalid value, in declaration order.
    pub fn validate(&self) -> Result<RelaySettings, Vec<ConfigError>> {
        let mut problems = Vec::new();

        let bootstrap_1 = required_list("CONSUMER_BOOTSTRAP_1", self.consumer_bootstrap_1.as_deref(), &mut problems);
        let bootstrap_2 = required_list("CONSUMER_BOOTSTRAP_2", self.consumer_bootstrap_2.as_deref(), &mut problems);
        let topic = required("KAFKA_TOPIC", self.kafka_topic.as_deref(), &mut problems);
        let cert = required_path("KAFKA_CERT_FILE", self.kafka_cert_file.as_ref(), &mut problems);
        let key = required_path("KAFKA_KEY_FILE", self.kafka_key_file.as_ref(), &mut problems);
        let ca = required_path("KAFKA_CA_FILE", self.kafka_ca_file.as_ref(), &mut problems);

        let buffer_capacity = self.buffer_capacity.unwrap_or(DEFAULT_BUFFER_CAPACITY);
        if buffer_capacity == 0 {
            problems.push(ConfigError::Invalid {
                name: "RELAY_BUFFER_CAPACITY",
                reason: "must be greater than 0".to_string(),
            });
        }

        let min_delay = self
            .reconnect_min_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECONNECT_MIN_DELAY);
        let max_delay = self
            .reconnect_max_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECONNECT_MAX_DELAY);
        if max_delay < min_delay {
            problems.push(ConfigError::Invalid {
                name: "RELAY_RECONNECT_MAX_DELAY_MS",
                reason: format!(
                    "{}ms is below the minimum delay of {}ms",
                    max_delay.as_millis(),
                    min_delay.as_millis()
                ),
            });
        }

        let group_id = self
            .kafka_group_id
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or(DEFAULT_GROUP_ID)
            .to_string();

        let keep_alive = match self.keep_alive_seconds.unwrap_or(DEFAULT_KEEP_ALIVE_SECONDS) {
            0 => None,
            secs if secs > MAX_KEEP_ALIVE_SECONDS => {
                problems.push(ConfigError::Invalid {
                    name: "RELAY_KEEP_ALIVE_SECONDS",
                    reason: format!("{} exceeds the maximum of {} seconds", secs, MAX_KEEP_ALIVE_SECONDS),
                });
                None
            }
            secs => Some(Duration::from_secs(secs)),
        };

        match (bootstrap_1, bootstrap_2, topic, cert, key, ca) {
            (Some(bootstrap_1), Some(bootstrap_2), Some(topic), Some(cert), Some(key), Some(ca))
                if problems.is_empty() =>
            {
                Ok(RelaySettings {
                    kafka: KafkaConfig {
                        consumer_bootstrap_1: bootstrap_1,
                        consumer_bootstrap_2: bootstrap_2,
                        kafka_topic: topic,
                        group_id,
                        ssl_cert_file: cert,
                        ssl_key_file: key,
                        ssl_ca_file: ca,
                        metadata_timeout: DEFAULT_METADATA_TIMEOUT,
                    },
                    server: ServerSettings {
                        port: self.port.unwrap_or(DEFAULT_PORT),
                        buffer_capacity,
                        keep_alive,
                        static_dir: self
                            .static_dir
                            .clone()
                            .filter(|dir| !dir.as_os_str().is_empty())
                            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR)),
                    },
                    reconnect: ReconnectSettings { min_delay, max_delay },
                })
            }
            _ => Err(problems),
        }
    }

    /// The effective log filter, `info` when unset.
    pub fn log_level(&self) -> &str {
        self.log_level
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or("info")
    }
}

fn required(name: &'static str, value: Option<&str>, problems: &mut Vec<ConfigError>) -> Option<String> {
    match value.map(str::trim) {
        None => {
            problems.push(ConfigError::Missing(name));
            None
        }
        Some("") => {
            problems.push(ConfigError::Empty(name));
            None
        }
        Some(v) => Some(v.to_string()),
    }
}

fn required_path(name: &'static str, value: Option<&PathBuf>, problems: &mut Vec<ConfigError>) -> Option<PathBuf> {
    let text = value.map(|p| p.to_string_lossy().into_owned());
    required(name, text.as_deref(), problems).map(PathBuf::from)
}

fn required_list(name: &'static str, value: Option<&str>, problems: &mut Vec<ConfigError>) -> Option<Vec<String>> {
    let raw = required(name, value, problems)?;
    let entries: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if entries.is_empty() {
        problems.push(ConfigError::Empty(name));
        return None;
    }
    Some(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> RelayArgs {
        RelayArgs {
            consumer_bootstrap_1: Some("b1:9093, b2:9093".to_string()),
            consumer_bootstrap_2: Some("dr1:9093".to_string()),
            kafka_topic: Some("prices".to_string()),
            kafka_cert_file: Some(PathBuf::from("/certs/client.pem")),
            kafka_key_file: Some(PathBuf::from("/certs/client.key")),
            kafka_ca_file: Some(PathBuf::from("/certs/ca.pem")),
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_configuration_uses_defaults() {
        let settings = complete().validate().unwrap();

        assert_eq!(settings.kafka.consumer_bootstrap_1, vec!["b1:9093", "b2:9093"]);
        assert_eq!(settings.kafka.consumer_bootstrap_2, vec!["dr1:9093"]);
        assert_eq!(settings.kafka.kafka_topic, "prices");
        assert_eq!(settings.kafka.group_id, DEFAULT_GROUP_ID);
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.server.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(settings.server.keep_alive, Some(Duration::from_secs(15)));
        assert_eq!(settings.server.static_dir, PathBuf::from("static"));
        assert_eq!(settings.reconnect.min_delay, DEFAULT_RECONNECT_MIN_DELAY);
        assert_eq!(settings.reconnect.max_delay, DEFAULT_RECONNECT_MAX_DELAY);
    }

    #[test]
    fn test_all_missing_variables_are_reported_together() {
        let problems = RelayArgs::default().validate().unwrap_err();

        assert_eq!(
            problems,
            vec![
                ConfigError::Missing("CONSUMER_BOOTSTRAP_1"),
                ConfigError::Missing("CONSUMER_BOOTSTRAP_2"),
                ConfigError::Missing("KAFKA_TOPIC"),
                ConfigError::Missing("KAFKA_CERT_FILE"),
                ConfigError::Missing("KAFKA_KEY_FILE"),
                ConfigError::Missing("KAFKA_CA_FILE"),
            ]
        );
    }

    #[test]
    fn test_blank_values_count_as_empty() {
        let args = RelayArgs {
            kafka_topic: Some("   ".to_string()),
            consumer_bootstrap_2: Some(" , ,".to_string()),
            kafka_ca_file: Some(PathBuf::new()),
            ..complete()
        };

        let problems = args.validate().unwrap_err();
        assert_eq!(
            problems,
            vec![
                ConfigError::Empty("CONSUMER_BOOTSTRAP_2"),
                ConfigError::Empty("KAFKA_TOPIC"),
                ConfigError::Empty("KAFKA_CA_FILE"),
            ]
        );
    }

    #[test]
    fn test_invalid_tuning_values() {
        let args = RelayArgs {
            buffer_capacity: Some(0),
            reconnect_min_delay_ms: Some(5_000),
            reconnect_max_delay_ms: Some(1_000),
            ..complete()
        };

        let problems = args.validate().unwrap_err();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].to_string().contains("RELAY_BUFFER_CAPACITY"));
        assert!(problems[1].to_string().contains("RELAY_RECONNECT_MAX_DELAY_MS"));
    }

    #[test]
    fn test_oversized_keep_alive_is_rejected() {
        let args = RelayArgs {
            keep_alive_seconds: Some(u64::MAX),
            ..complete()
        };
        assert_eq!(
            args.validate().unwrap_err(),
            vec![ConfigError::Invalid {
                name: "RELAY_KEEP_ALIVE_SECONDS",
                reason: format!("{} exceeds the maximum of 86400 seconds", u64::MAX),
            }]
        );

        let longest = RelayArgs {
            keep_alive_seconds: Some(MAX_KEEP_ALIVE_SECONDS),
            ..complete()
        };
        assert_eq!(
            longest.validate().unwrap().server.keep_alive,
            Some(Duration::from_secs(MAX_KEEP_ALIVE_SECONDS))
        );
    }

    #[test]
    fn test_keep_alive_zero_disables() {
        let args = RelayArgs {
            keep_alive_seconds: Some(0),
            ..complete()
        };
        assert_eq!(args.validate().unwrap().server.keep_alive, None);
    }

    #[test]
    fn test_flags_are_parsed() {
        let args = RelayArgs::try_parse_from([
            "server_relay",
            "--consumer-bootstrap-1",
            "b1:9093",
            "--consumer-bootstrap-2",
            "dr1:9093",
            "--kafka-topic",
            "prices",
            "--kafka-cert-file",
            "/c.pem",
            "--kafka-key-file",
            "/k.pem",
            "--kafka-ca-file",
            "/ca.pem",
            "--port",
            "8080",
            "--kafka-group-id",
            "dashboards",
            "--static-dir",
            "/srv/relay/static",
        ])
        .unwrap();

        let settings = args.validate().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.kafka.group_id, "dashboards");
        assert_eq!(settings.kafka.ssl_ca_file, PathBuf::from("/ca.pem"));
        assert_eq!(settings.server.static_dir, PathBuf::from("/srv/relay/static"));
    }

    #[test]
    fn test_non_numeric_port_is_rejected_by_parser() {
        assert!(RelayArgs::try_parse_from(["server_relay", "--port", "http"]).is_err());
    }
}
