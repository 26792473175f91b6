//! Redpanda transport for the service message bus.
//!
//! Implements [`Transport`] from `service-common-core` on rdkafka, so it works with
//! Redpanda or any other Kafka-compatible broker.
//!
//! # Mapping
//!
//! | Bus concept        | Kafka concept                                   |
//! |--------------------|-------------------------------------------------|
//! | message type topic | topic (`grant-items`)                           |
//! | endpoint           | consumer group (`inventory-grant-items-consumer`)|
//! | error queue        | topic (`inventory-grant-items-consumer_error`)  |
//!
//! Every endpoint is its own consumer group, so each endpoint receives every message
//! of its topic while instances of one service share the endpoint's partitions.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed only when the runtime acks a [`Delivery`], i.e. after the
//!   consumer succeeded or the message reached the error queue
//! - A partition's position never passes a message that is still being retried
//! - If the process crashes before commit, messages will be redelivered
//! - Consumers MUST be idempotent (the envelope's `message_id` survives redelivery)
//! - Ordering is guaranteed within a partition; messages are keyed by type
//!
//! # Example
//!
//! ```no_run
//! use service_common_core::settings::BrokerSettings;
//! use service_common_core::transport::Transport;
//! use service_common_redpanda::RedpandaTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = BrokerSettings { host: "localhost:9092".to_string() };
//! let transport = RedpandaTransport::from_settings(&settings)?;
//!
//! // Fails fast when no broker answers
//! transport.connect().await?;
//! # Ok(())
//! # }
//! ```

mod offsets;

use offsets::OffsetTracker;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use service_common_core::message::Envelope;
use service_common_core::settings::BrokerSettings;
use service_common_core::transport::{
    BusError, Delivery, EnvelopeStream, Transport, TransportFuture,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Redpanda transport.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, timeout
/// - **Buffer size**: Envelopes buffered per endpoint (default: 1000)
/// - **Offset reset**: Where new endpoints start reading (default: "latest")
///
/// # Example
///
/// ```no_run
/// use service_common_redpanda::RedpandaTransport;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = RedpandaTransport::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")  // Wait for all replicas
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaTransport {
    /// Kafka producer for publishing envelopes
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer and metadata timeout
    timeout: Duration,
    /// Envelope buffer size per endpoint
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaTransport {
    /// Create a transport with default configuration.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Configuration`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a transport for the configured broker host.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Configuration`] if the producer cannot be created.
    pub fn from_settings(settings: &BrokerSettings) -> Result<Self, BusError> {
        Self::new(&settings.host)
    }

    /// Create a new builder for configuring the transport.
    #[must_use]
    pub fn builder() -> RedpandaTransportBuilder {
        RedpandaTransportBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaTransport`].
#[derive(Default)]
pub struct RedpandaTransportBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaTransportBuilder {
    /// Set the broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// `"0"` (no acks), `"1"` (leader ack), `"all"` (all replicas ack). Default: `"1"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec.
    ///
    /// `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`. Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send and metadata probe timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how many envelopes each endpoint buffers between Kafka and dispatch.
    ///
    /// Default: 1000
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where a new endpoint starts reading when it has no committed offset.
    ///
    /// - `"earliest"`: Start from the beginning of the topic
    /// - `"latest"`: Start from the end (only new messages)
    ///
    /// Default: `"latest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaTransport`].
    ///
    /// No connection is made here; [`Transport::connect`] probes the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Configuration`] if:
    /// - Brokers not set
    /// - Buffer size is zero
    /// - The producer configuration is rejected
    pub fn build(self) -> Result<RedpandaTransport, BusError> {
        let brokers = self
            .brokers
            .filter(|brokers| !brokers.trim().is_empty())
            .ok_or_else(|| BusError::Configuration("Brokers not configured".to_string()))?;

        let buffer_size = self.buffer_size.unwrap_or(1000);
        if buffer_size == 0 {
            return Err(BusError::Configuration(
                "buffer_size must be greater than 0".to_string(),
            ));
        }

        let acks = self.producer_acks.as_deref().unwrap_or("1");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BusError::Configuration(format!("Failed to create producer: {e}")))?;

        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "latest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaTransport created"
        );

        Ok(RedpandaTransport {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            buffer_size,
            auto_offset_reset,
        })
    }
}

impl Transport for RedpandaTransport {
    fn connect(&self) -> TransportFuture<'_, ()> {
        let producer = self.producer.clone();
        let timeout = self.timeout;
        let brokers = self.brokers.clone();

        Box::pin(async move {
            // rdkafka's metadata call blocks the calling thread
            let probe = tokio::task::spawn_blocking(move || {
                producer
                    .client()
                    .fetch_metadata(None, Timeout::After(timeout))
                    .map(|metadata| metadata.brokers().len())
            })
            .await
            .map_err(|e| BusError::BrokerUnavailable(format!("Metadata probe aborted: {e}")))?;

            match probe {
                Ok(broker_count) => {
                    tracing::info!(brokers = %brokers, broker_count, "Connected to broker");
                    Ok(())
                },
                Err(kafka_error) => {
                    tracing::error!(brokers = %brokers, error = %kafka_error, "Broker unreachable");
                    Err(BusError::BrokerUnavailable(format!("{brokers}: {kafka_error}")))
                },
            }
        })
    }

    fn publish<'a>(&'a self, topic: &'a str, envelope: &'a Envelope) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let payload = envelope.to_bytes().map_err(|e| BusError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

            // Messages of one type share a partition (ordering guarantee)
            let record = FutureRecord::to(topic)
                .payload(&payload)
                .key(envelope.message_type.as_bytes());

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic,
                        partition,
                        offset,
                        message_id = %envelope.message_id,
                        message_type = %envelope.message_type,
                        "Envelope published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic, error = %kafka_error, "Failed to publish envelope");
                    Err(BusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe<'a>(
        &'a self,
        endpoint: &'a str,
        topics: &'a [String],
    ) -> TransportFuture<'a, EnvelopeStream> {
        Box::pin(async move {
            let subscription_failed = |reason: String| BusError::SubscriptionFailed {
                endpoint: endpoint.to_string(),
                topics: topics.to_vec(),
                reason,
            };

            // Manual commit for at-least-once
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", endpoint)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| subscription_failed(format!("Failed to create consumer: {e}")))?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| subscription_failed(format!("Failed to subscribe to topics: {e}")))?;

            tracing::info!(
                endpoint,
                topics = ?topics,
                buffer_size = self.buffer_size,
                auto_offset_reset = %self.auto_offset_reset,
                "Endpoint consumer group subscribed"
            );

            let (tx, mut rx) = tokio::sync::mpsc::channel(self.buffer_size);
            let committer = Committer {
                consumer: Arc::new(consumer),
                offsets: Arc::new(Mutex::new(OffsetTracker::default())),
            };

            // The task owns the consumer and forwards deliveries
            tokio::spawn(async move {
                use futures::StreamExt;

                let consumer = Arc::clone(&committer.consumer);
                let mut stream = consumer.stream();

                while let Some(received) = stream.next().await {
                    let message = match received {
                        Ok(message) => message,
                        Err(e) => {
                            let error = BusError::Transport(format!("Failed to receive message: {e}"));
                            if tx.send(Err(error)).await.is_err() {
                                break; // Receiver dropped
                            }
                            continue;
                        },
                    };

                    let position = Position {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                    };
                    committer.received(&position);

                    let delivery = match message.payload() {
                        None => Err(BusError::Serialization("Message has no payload".to_string())),
                        Some(payload) => Envelope::from_bytes(payload),
                    };

                    let delivery = match delivery {
                        Ok(envelope) => {
                            tracing::trace!(
                                topic = %position.topic,
                                partition = position.partition,
                                offset = position.offset,
                                message_id = %envelope.message_id,
                                "Received envelope"
                            );
                            let committer = committer.clone();
                            Ok(Delivery::with_ack(envelope, move || committer.settled(&position)))
                        },
                        Err(error) => {
                            // No consumer can ever read it, so it is settled on arrival
                            tracing::error!(
                                topic = %position.topic,
                                partition = position.partition,
                                offset = position.offset,
                                error = %error,
                                "Skipping undecodable message"
                            );
                            committer.settled(&position);
                            Err(error)
                        },
                    };

                    if tx.send(delivery).await.is_err() {
                        tracing::debug!("Endpoint stream dropped, exiting consumer task");
                        break;
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream: EnvelopeStream = Box::pin(async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            });
            Ok(stream)
        })
    }
}

/// Where one message sits in the log.
struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

/// Commits a partition's position as its deliveries settle.
#[derive(Clone)]
struct Committer {
    consumer: Arc<StreamConsumer>,
    offsets: Arc<Mutex<OffsetTracker>>,
}

impl Committer {
    fn received(&self, position: &Position) {
        self.offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .received(&position.topic, position.partition, position.offset);
    }

    fn settled(&self, position: &Position) {
        let next = self
            .offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .settled(&position.topic, position.partition, position.offset);
        let Some(next) = next else {
            return;
        };

        let mut list = TopicPartitionList::new();
        let committed =
            match list.add_partition_offset(&position.topic, position.partition, Offset::Offset(next)) {
                Ok(()) => self.consumer.commit(&list, CommitMode::Async),
                Err(e) => Err(e),
            };
        if let Err(e) = committed {
            tracing::warn!(
                topic = %position.topic,
                partition = position.partition,
                offset = next,
                error = %e,
                "Failed to commit offset (message may be redelivered)"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn redpanda_transport_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaTransport>();
        assert_sync::<RedpandaTransport>();
    }

    #[test]
    fn builder_requires_brokers() {
        let result = RedpandaTransport::builder().build();
        assert!(matches!(result, Err(BusError::Configuration(_))));

        let result = RedpandaTransport::from_settings(&BrokerSettings {
            host: "  ".to_string(),
        });
        assert!(matches!(result, Err(BusError::Configuration(_))));
    }

    #[test]
    fn builder_rejects_zero_buffer() {
        let result = RedpandaTransport::builder()
            .brokers("localhost:9092")
            .buffer_size(0)
            .build();
        assert!(matches!(result, Err(BusError::Configuration(_))));
    }

    #[test]
    fn builder_creates_producer_without_connecting() {
        let transport = RedpandaTransport::from_settings(&BrokerSettings {
            host: "localhost:9092".to_string(),
        })
        .unwrap();
        assert_eq!(transport.brokers(), "localhost:9092");
    }

    #[tokio::test]
    async fn connect_to_unreachable_broker_fails_fast() {
        let transport = RedpandaTransport::builder()
            .brokers("127.0.0.1:1")
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();

        let result = transport.connect().await;
        assert!(matches!(result, Err(BusError::BrokerUnavailable(_))));
    }
}
