//! # Kafka Ingestion Source
//!
//! Consumes a single Kafka topic over SSL and exposes it as a [`MessageSource`].
//!
//! - Only the primary bootstrap list is used to connect. The secondary list is
//!   carried for reporting; no failover is attempted.
//! - The consumer starts at the live tail (`auto.offset.reset=latest`) and
//!   auto-commits offsets. The relay never replays history.
//! - Certificate, key and CA paths are always applied with
//!   `security.protocol=SSL`. A wrong path shows up as a connection failure and
//!   is retried like any other.
//!
//! [`KafkaConfig`] and its client settings are always compiled; the `rdkafka`
//! backed [`KafkaSource`] needs the `kafka` feature.

use std::path::PathBuf;
use std::time::Duration;

/// Consumer group used when none is configured.
pub const DEFAULT_GROUP_ID: &str = "sse-relay";
/// How long `connect` waits for topic metadata before giving up.
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// # Kafka Configuration
///
/// Connection settings for the Kafka source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Primary bootstrap servers, used for the connection.
    pub consumer_bootstrap_1: Vec<String>,
    /// Secondary bootstrap servers. Parsed and reported, never connected to.
    pub consumer_bootstrap_2: Vec<String>,
    /// Topic to consume.
    pub kafka_topic: String,
    /// Consumer group id.
    pub group_id: String,
    /// Client certificate (PEM).
    pub ssl_cert_file: PathBuf,
    /// Client private key (PEM).
    pub ssl_key_file: PathBuf,
    /// CA bundle (PEM).
    pub ssl_ca_file: PathBuf,
    /// Metadata probe timeout used by `connect`.
    pub metadata_timeout: Duration,
}

impl KafkaConfig {
    /// librdkafka properties for the consumer, in the order they are applied.
    pub fn client_settings(&self) -> Vec<(&'static str, String)> {
        vec![
            ("bootstrap.servers", self.consumer_bootstrap_1.join(",")),
            ("group.id", self.group_id.clone()),
            ("enable.auto.commit", "true".to_string()),
            ("auto.offset.reset", "latest".to_string()),
            ("security.protocol", "SSL".to_string()),
            ("ssl.certificate.location", self.ssl_cert_file.display().to_string()),
            ("ssl.key.location", self.ssl_key_file.display().to_string()),
            ("ssl.ca.location", self.ssl_ca_file.display().to_string()),
        ]
    }
}

#[cfg(feature = "kafka")]
pub use source::KafkaSource;

#[cfg(feature = "kafka")]
mod source {
    use std::sync::Arc;

    use async_trait::async_trait;
    use rdkafka::consumer::{Consumer, StreamConsumer};
    use rdkafka::message::Message as _;
    use rdkafka::ClientConfig;

    use super::KafkaConfig;
    use crate::ingestors::{IngestError, MessageSource, RawItem};

    /// # Kafka Source
    ///
    /// `rdkafka` `StreamConsumer` wrapper. Every `connect` builds a fresh
    /// consumer so a broken session is fully torn down before retrying.
    pub struct KafkaSource {
        config: KafkaConfig,
        consumer: Option<Arc<StreamConsumer>>,
    }

    impl KafkaSource {
        /// Creates a disconnected source.
        pub fn new(config: KafkaConfig) -> Self {
            Self {
                config,
                consumer: None,
            }
        }

        fn build_consumer(&self) -> Result<StreamConsumer, IngestError> {
            let mut client = ClientConfig::new();
            for (key, value) in self.config.client_settings() {
                client.set(key, value);
            }

            client
                .create()
                .map_err(|e| IngestError::Connection(format!("Failed to create Kafka consumer: {}", e)))
        }
    }

    #[async_trait]
    impl MessageSource for KafkaSource {
        async fn connect(&mut self) -> Result<(), IngestError> {
            self.consumer = None;

            let consumer = Arc::new(self.build_consumer()?);
            let topic = self.config.kafka_topic.clone();

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| IngestError::Subscribe {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;

            // fetch_metadata blocks on librdkafka, keep it off the runtime.
            let probe = Arc::clone(&consumer);
            let timeout = self.config.metadata_timeout;
            let metadata = tokio::task::spawn_blocking(move || probe.fetch_metadata(Some(&topic), timeout))
                .await
                .map_err(|e| IngestError::Connection(format!("Metadata probe aborted: {}", e)))?
                .map_err(|e| IngestError::Connection(format!("Kafka brokers unreachable: {}", e)))?;

            tracing::info!(
                topic = %self.config.kafka_topic,
                brokers = metadata.brokers().len(),
                "Subscribed to Kafka topic"
            );

            self.consumer = Some(consumer);
            Ok(())
        }

        async fn recv(&mut self) -> Result<RawItem, IngestError> {
            let consumer = self
                .consumer
                .as_ref()
                .ok_or_else(|| IngestError::Connection("Kafka consumer not connected".to_string()))?;

            match consumer.recv().await {
                Ok(message) => Ok(RawItem {
                    payload: message.payload().map(|p| p.to_vec()),
                    origin: format!("{}/{}@{}", message.topic(), message.partition(), message.offset()),
                }),
                Err(e) => Err(IngestError::Connection(format!("Kafka consumer error: {}", e))),
            }
        }

        fn describe(&self) -> String {
            format!(
                "kafka://{}/{}",
                self.config.consumer_bootstrap_1.join(","),
                self.config.kafka_topic
            )
        }
    }
}
