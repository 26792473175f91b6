//! In-memory broker for testing bus behavior without Kafka.
//!
//! [`InMemoryTransport`] follows the same delivery model as the production
//! transport:
//!
//! - every endpoint subscribed to a topic receives its own copy of each message
//! - subscribers sharing an endpoint name compete for that endpoint's messages
//! - every publish is recorded, including error-queue traffic, for assertions
//! - deliveries stay pending until the runtime acks them
//!
//! Messages published to a topic before any endpoint subscribes are recorded but not
//! delivered.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use service_common_core::message::Envelope;
use service_common_core::transport::{
    BusError, Delivery, EnvelopeStream, Transport, TransportFuture,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use uuid::Uuid;

struct EndpointQueue {
    topics: HashSet<String>,
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<Envelope>>>,
}

#[derive(Default)]
struct BrokerState {
    endpoints: HashMap<String, EndpointQueue>,
    published: Vec<(String, Envelope)>,
    delivered: HashMap<String, Vec<Uuid>>,
    acked: HashMap<String, Vec<Uuid>>,
}

/// In-memory [`Transport`] for fast, deterministic bus tests.
///
/// # Example
///
/// ```
/// use service_common_core::message::Envelope;
/// use service_common_core::transport::Transport;
/// use service_common_testing::InMemoryTransport;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = InMemoryTransport::new();
/// let envelope = Envelope {
///     message_id: uuid::Uuid::new_v4(),
///     message_type: "ItemGranted".to_string(),
///     sent_at: chrono::Utc::now(),
///     headers: Default::default(),
///     body: b"{}".to_vec(),
/// };
///
/// transport.publish("item-granted", &envelope).await?;
/// assert_eq!(transport.published("item-granted").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<BrokerState>>,
    unreachable: Arc<AtomicBool>,
}

impl InMemoryTransport {
    /// Create a reachable, empty broker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that refuses every connection, publish and subscription.
    #[must_use]
    pub fn unreachable() -> Self {
        let transport = Self::default();
        transport.set_reachable(false);
        transport
    }

    /// Toggle reachability, e.g. to simulate an outage mid-test.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Envelopes published to `topic`, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Envelope> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(published_to, _)| published_to == topic)
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    /// Every topic that has seen at least one publish.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .published
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Names of the endpoints that have subscribed.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> =
            self.state.lock().unwrap().endpoints.keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    /// Message ids acked by `endpoint`, in ack order.
    #[must_use]
    pub fn acknowledged(&self, endpoint: &str) -> Vec<Uuid> {
        self.state
            .lock()
            .unwrap()
            .acked
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }

    /// Message ids handed to `endpoint` that it has not acked yet.
    ///
    /// After a crash these are what the broker would deliver again.
    #[must_use]
    pub fn pending(&self, endpoint: &str) -> Vec<Uuid> {
        let state = self.state.lock().unwrap();
        let acked = state.acked.get(endpoint);
        state
            .delivered
            .get(endpoint)
            .into_iter()
            .flatten()
            .filter(|id| !acked.is_some_and(|acked| acked.contains(id)))
            .copied()
            .collect()
    }

    /// Wait until `topic` has received at least `count` envelopes.
    ///
    /// Returns the envelopes seen so far when `timeout` elapses first. Under a paused
    /// tokio clock the timeout auto-advances, so long retry intervals do not slow tests.
    pub async fn wait_for_published(
        &self,
        topic: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<Envelope> {
        let poll = async {
            loop {
                let published = self.published(topic);
                if published.len() >= count {
                    return published;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(published) => published,
            Err(_) => self.published(topic),
        }
    }

    fn ensure_reachable(&self) -> Result<(), BusError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BusError::BrokerUnavailable(
                "in-memory broker is marked unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Transport for InMemoryTransport {
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move { self.ensure_reachable() })
    }

    fn publish<'a>(&'a self, topic: &'a str, envelope: &'a Envelope) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_reachable().map_err(|e| BusError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

            let mut state = self.state.lock().unwrap();
            state.published.push((topic.to_string(), envelope.clone()));
            for queue in state.endpoints.values() {
                if queue.topics.contains(topic) {
                    // Receivers live as long as the queue, so sending cannot fail
                    let _ = queue.sender.send(envelope.clone());
                }
            }
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        endpoint: &'a str,
        topics: &'a [String],
    ) -> TransportFuture<'a, EnvelopeStream> {
        Box::pin(async move {
            self.ensure_reachable().map_err(|e| BusError::SubscriptionFailed {
                endpoint: endpoint.to_string(),
                topics: topics.to_vec(),
                reason: e.to_string(),
            })?;

            let receiver = {
                let mut state = self.state.lock().unwrap();
                let queue = state.endpoints.entry(endpoint.to_string()).or_insert_with(|| {
                    let (sender, receiver) = mpsc::unbounded_channel();
                    EndpointQueue {
                        topics: HashSet::new(),
                        sender,
                        receiver: Arc::new(AsyncMutex::new(receiver)),
                    }
                });
                queue.topics.extend(topics.iter().cloned());
                Arc::clone(&queue.receiver)
            };

            let state = Arc::clone(&self.state);
            let endpoint = endpoint.to_string();
            let stream: EnvelopeStream = Box::pin(async_stream::stream! {
                loop {
                    let next = receiver.lock().await.recv().await;
                    let envelope = match next {
                        Some(envelope) => envelope,
                        None => break,
                    };

                    let message_id = envelope.message_id;
                    state
                        .lock()
                        .unwrap()
                        .delivered
                        .entry(endpoint.clone())
                        .or_default()
                        .push(message_id);

                    let acks = Arc::clone(&state);
                    let acked_by = endpoint.clone();
                    yield Ok(Delivery::with_ack(envelope, move || {
                        acks.lock().unwrap().acked.entry(acked_by).or_default().push(message_id);
                    }));
                }
            });
            Ok(stream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn envelope(message_type: &str) -> Envelope {
        Envelope {
            message_id: Uuid::new_v4(),
            message_type: message_type.to_string(),
            sent_at: chrono::Utc::now(),
            headers: std::collections::BTreeMap::new(),
            body: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn each_endpoint_gets_its_own_copy() {
        let transport = InMemoryTransport::new();
        let topics = vec!["item-granted".to_string()];
        let mut inventory = transport.subscribe("inventory-item-granted-consumer", &topics).await.unwrap();
        let mut audit = transport.subscribe("audit-item-granted-consumer", &topics).await.unwrap();

        let sent = envelope("ItemGranted");
        transport.publish("item-granted", &sent).await.unwrap();

        assert_eq!(inventory.next().await.unwrap().unwrap().envelope, sent);
        assert_eq!(audit.next().await.unwrap().unwrap().envelope, sent);
    }

    #[tokio::test]
    async fn unrelated_topics_are_not_delivered() {
        let transport = InMemoryTransport::new();
        let topics = vec!["item-granted".to_string()];
        let mut inventory = transport.subscribe("inventory", &topics).await.unwrap();

        transport.publish("item-revoked", &envelope("ItemRevoked")).await.unwrap();
        let granted = envelope("ItemGranted");
        transport.publish("item-granted", &granted).await.unwrap();

        assert_eq!(inventory.next().await.unwrap().unwrap().envelope, granted);
        assert_eq!(transport.topics(), vec!["item-granted", "item-revoked"]);
    }

    #[tokio::test]
    async fn deliveries_stay_pending_until_acked() {
        let transport = InMemoryTransport::new();
        let mut inventory =
            transport.subscribe("inventory", &["item-granted".to_string()]).await.unwrap();

        let (first, second) = (envelope("ItemGranted"), envelope("ItemGranted"));
        transport.publish("item-granted", &first).await.unwrap();
        transport.publish("item-granted", &second).await.unwrap();

        let delivered = inventory.next().await.unwrap().unwrap();
        let _unsettled = inventory.next().await.unwrap().unwrap();
        assert_eq!(transport.pending("inventory"), vec![first.message_id, second.message_id]);

        delivered.ack();
        assert_eq!(transport.acknowledged("inventory"), vec![first.message_id]);
        assert_eq!(transport.pending("inventory"), vec![second.message_id]);
    }

    #[tokio::test]
    async fn unreachable_broker_refuses_everything() {
        let transport = InMemoryTransport::unreachable();

        assert!(matches!(transport.connect().await, Err(BusError::BrokerUnavailable(_))));
        assert!(matches!(
            transport.publish("t", &envelope("T")).await,
            Err(BusError::PublishFailed { .. })
        ));
        assert!(matches!(
            transport.subscribe("e", &["t".to_string()]).await,
            Err(BusError::SubscriptionFailed { .. })
        ));
        assert!(transport.endpoints().is_empty());
    }
}
