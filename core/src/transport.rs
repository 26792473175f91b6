//! Transport abstraction between the bus runtime and a message broker.
//!
//! The runtime in `service-common-runtime` owns consumer dispatch, retries and error
//! queues. A [`Transport`] only moves [`Envelope`]s: it publishes them to topics and
//! streams them back to named endpoints.
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: an envelope may be delivered more than once, so consumers
//!   must be idempotent (the `message_id` survives redelivery)
//! - **Explicit acknowledgement**: a [`Delivery`] stays pending until the runtime
//!   acks it, and a broker only forgets messages that were acked
//! - **Ordered within partition**: the broker decides; there is no global order
//! - **Endpoint = consumer group**: every endpoint subscribed to a topic gets its own
//!   copy of each message, and instances sharing an endpoint share the load
//!
//! # Implementations
//!
//! - `RedpandaTransport` (in `service-common-redpanda`): Kafka-compatible production transport
//! - `InMemoryTransport` (in `service-common-testing`): for tests

use crate::message::Envelope;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The broker could not be reached.
    ///
    /// Fatal during startup: a service must not serve traffic with a half-initialized bus.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Failed to publish an envelope to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe an endpoint to its topics
    #[error("Subscription failed for endpoint '{endpoint}' on topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The endpoint (consumer group) that failed to subscribe
        endpoint: String,
        /// The topics requested
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to encode or decode an envelope or message body
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    Transport(String),

    /// The bus was configured incorrectly
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// One envelope handed to an endpoint, together with its acknowledgement.
///
/// The runtime calls [`Delivery::ack`] once the message is settled: consumed, or
/// moved to the error queue. A delivery dropped without an ack stays pending at the
/// broker and is redelivered after a restart.
pub struct Delivery {
    /// The delivered envelope
    pub envelope: Envelope,
    ack: Option<Box<dyn FnOnce() + Send>>,
}

impl Delivery {
    /// A delivery with nothing to acknowledge.
    #[must_use]
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            ack: None,
        }
    }

    /// A delivery that runs `ack` when settled.
    #[must_use]
    pub fn with_ack(envelope: Envelope, ack: impl FnOnce() + Send + 'static) -> Self {
        Self {
            envelope,
            ack: Some(Box::new(ack)),
        }
    }

    /// Tell the broker this message is settled.
    pub fn ack(self) {
        if let Some(ack) = self.ack {
            ack();
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("ackable", &self.ack.is_some())
            .finish()
    }
}

/// Stream of deliveries to one endpoint.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BusError>> + Send + 'a>>;

/// Trait for broker transports.
///
/// # Thread Safety
///
/// Transports are process-wide singletons shared by every endpoint and publisher, so
/// implementations must be `Send + Sync`.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so the runtime can hold it as `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    /// Verify the broker is reachable.
    ///
    /// Called once by the bus before any endpoint starts.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::BrokerUnavailable`] when the broker does not answer.
    fn connect(&self) -> TransportFuture<'_, ()>;

    /// Publish an envelope to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the broker rejects or times out the send.
    fn publish<'a>(&'a self, topic: &'a str, envelope: &'a Envelope) -> TransportFuture<'a, ()>;

    /// Subscribe an endpoint to one or more topics.
    ///
    /// All subscribers using the same `endpoint` share the topics' messages; distinct
    /// endpoints each receive every message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot be created.
    fn subscribe<'a>(
        &'a self,
        endpoint: &'a str,
        topics: &'a [String],
    ) -> TransportFuture<'a, EnvelopeStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_error_names_endpoint_and_topics() {
        let error = BusError::SubscriptionFailed {
            endpoint: "inventory-grant-items-consumer".to_string(),
            topics: vec!["grant-items".to_string()],
            reason: "group coordinator not available".to_string(),
        };

        let display = format!("{error}");
        assert!(display.contains("inventory-grant-items-consumer"));
        assert!(display.contains("grant-items"));
    }

    #[test]
    fn ack_runs_once_when_settled() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let acks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&acks);
        let envelope = Envelope {
            message_id: uuid::Uuid::new_v4(),
            message_type: "GrantItems".to_string(),
            sent_at: chrono::Utc::now(),
            headers: std::collections::BTreeMap::new(),
            body: b"{}".to_vec(),
        };

        let delivery = Delivery::with_ack(envelope.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(delivery.envelope, envelope);
        assert_eq!(acks.load(Ordering::SeqCst), 0);

        delivery.ack();
        assert_eq!(acks.load(Ordering::SeqCst), 1);

        // Nothing to run for a plain delivery
        Delivery::new(envelope).ack();
    }

    #[test]
    fn broker_unavailable_display() {
        let display = format!("{}", BusError::BrokerUnavailable("localhost:9092".to_string()));
        assert!(display.contains("Broker unavailable"));
    }
}
