//! Message bus bootstrap.
//!
//! A service describes its bus once at startup with a [`BusConfigurator`]: which
//! consumers it hosts and how their failures are retried. [`Bus::start`] then checks
//! the broker, subscribes one endpoint per consumer, and spawns a receive loop for
//! each. The returned [`BusHandle`] publishes messages and stops the loops.
//!
//! # Example
//!
//! ```no_run
//! use service_common_core::consumer::{ConsumeContext, ConsumeFuture, Consumer};
//! use service_common_core::message::Message;
//! use service_common_core::settings::ServiceSettings;
//! use service_common_core::transport::Transport;
//! use service_common_runtime::bus::BusConfigurator;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct MatchRequested {
//!     player: String,
//! }
//!
//! impl Message for MatchRequested {}
//!
//! struct MatchRequestedConsumer;
//!
//! impl Consumer for MatchRequestedConsumer {
//!     type Message = MatchRequested;
//!
//!     fn consume(&self, _context: ConsumeContext<MatchRequested>) -> ConsumeFuture<'_> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//!
//! # async fn example(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ServiceSettings { service_name: "matchmaking".to_string() };
//!
//! let bus = BusConfigurator::new(&settings)
//!     .add_consumer(MatchRequestedConsumer)
//!     .build(transport)?;
//!
//! // Subscribes `matchmaking-match-requested-consumer` to the `match-requested` topic
//! let handle = bus.start().await?;
//!
//! handle.publish(&MatchRequested { player: "ana".to_string() }).await?;
//! handle.shutdown(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

use crate::dispatch::{Endpoint, run_endpoint};
use crate::retry::RetryPolicy;
use service_common_core::consumer::Consumer;
use service_common_core::endpoint::EndpointNameFormatter;
use service_common_core::message::{Envelope, Message};
use service_common_core::settings::ServiceSettings;
use service_common_core::transport::{BusError, Transport};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default number of messages each endpoint processes concurrently.
pub const DEFAULT_CONCURRENT_MESSAGE_LIMIT: usize = 16;

/// Bus bootstrap with the service's default retry policy, or `retry` when given.
///
/// Shorthand for [`BusConfigurator::new`] followed by
/// [`use_message_retry`](BusConfigurator::use_message_retry).
#[must_use]
pub fn add_bus(settings: &ServiceSettings, retry: Option<RetryPolicy>) -> BusConfigurator {
    let configurator = BusConfigurator::new(settings);
    match retry {
        Some(policy) => configurator.use_message_retry(policy),
        None => configurator,
    }
}

struct Registration {
    retry: Option<RetryPolicy>,
    build: Box<dyn FnOnce(&EndpointNameFormatter, RetryPolicy) -> Endpoint + Send>,
}

/// Builder describing the consumers a service hosts.
///
/// Only consumers registered here are wired to the broker.
pub struct BusConfigurator {
    formatter: EndpointNameFormatter,
    retry: RetryPolicy,
    concurrent_message_limit: usize,
    registrations: Vec<Registration>,
}

impl BusConfigurator {
    /// Start describing the bus of the service named in `settings`.
    ///
    /// Endpoint names are prefixed with the kebab-cased service name.
    #[must_use]
    pub fn new(settings: &ServiceSettings) -> Self {
        Self {
            formatter: EndpointNameFormatter::new(&settings.service_name),
            retry: RetryPolicy::default(),
            concurrent_message_limit: DEFAULT_CONCURRENT_MESSAGE_LIMIT,
            registrations: Vec::new(),
        }
    }

    /// Register a consumer under the bus-wide retry policy.
    #[must_use]
    pub fn add_consumer<C: Consumer>(self, consumer: C) -> Self {
        self.register(consumer, None)
    }

    /// Register a consumer with its own retry policy.
    #[must_use]
    pub fn add_consumer_with_retry<C: Consumer>(self, consumer: C, retry: RetryPolicy) -> Self {
        self.register(consumer, Some(retry))
    }

    /// Replace the bus-wide retry policy.
    ///
    /// Consumers registered with [`add_consumer_with_retry`](Self::add_consumer_with_retry)
    /// keep their own policy.
    #[must_use]
    pub fn use_message_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set how many messages each endpoint processes at once.
    #[must_use]
    pub const fn concurrent_message_limit(mut self, limit: usize) -> Self {
        self.concurrent_message_limit = limit;
        self
    }

    fn register<C: Consumer>(mut self, consumer: C, retry: Option<RetryPolicy>) -> Self {
        self.registrations.push(Registration {
            retry,
            build: Box::new(move |formatter, retry| Endpoint::new(formatter, consumer, retry)),
        });
        self
    }

    /// Resolve endpoint names and policies.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Configuration`] if no consumer is registered, two consumers
    /// resolve to the same endpoint, or the concurrency limit is zero.
    pub fn build(self, transport: Arc<dyn Transport>) -> Result<Bus, BusError> {
        if self.registrations.is_empty() {
            return Err(BusError::Configuration("no consumers registered".to_string()));
        }
        if self.concurrent_message_limit == 0 {
            return Err(BusError::Configuration(
                "concurrent message limit must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut endpoints = Vec::with_capacity(self.registrations.len());
        for registration in self.registrations {
            let retry = registration.retry.unwrap_or_else(|| self.retry.clone());
            let endpoint = (registration.build)(&self.formatter, retry);
            if !names.insert(endpoint.name.clone()) {
                return Err(BusError::Configuration(format!(
                    "endpoint '{}' is registered more than once",
                    endpoint.name
                )));
            }
            endpoints.push(Arc::new(endpoint));
        }

        Ok(Bus {
            transport,
            endpoints,
            concurrent_message_limit: self.concurrent_message_limit,
        })
    }
}

/// A configured bus that has not started yet.
pub struct Bus {
    transport: Arc<dyn Transport>,
    endpoints: Vec<Arc<Endpoint>>,
    concurrent_message_limit: usize,
}

impl Bus {
    /// Endpoint names in registration order.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|endpoint| endpoint.name.as_str())
    }

    /// Retry policy an endpoint will run with.
    #[must_use]
    pub fn retry_policy(&self, endpoint: &str) -> Option<&RetryPolicy> {
        self.endpoints
            .iter()
            .find(|candidate| candidate.name == endpoint)
            .map(|candidate| &candidate.retry)
    }

    /// Connect to the broker, subscribe every endpoint, and start receiving.
    ///
    /// Startup is all-or-nothing: if the broker is unreachable or any subscription
    /// fails, no receive loop is spawned.
    ///
    /// # Errors
    ///
    /// - [`BusError::BrokerUnavailable`]: the broker did not answer the probe
    /// - [`BusError::SubscriptionFailed`]: an endpoint could not subscribe
    pub async fn start(self) -> Result<BusHandle, BusError> {
        tracing::info!(endpoints = self.endpoints.len(), "Starting message bus");

        if let Err(error) = self.transport.connect().await {
            tracing::error!(error = %error, "Message broker unreachable, bus not started");
            return Err(error);
        }

        let mut streams = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let topics = [endpoint.topic.clone()];
            let stream = self.transport.subscribe(&endpoint.name, &topics).await?;
            tracing::info!(
                endpoint = %endpoint.name,
                topic = %endpoint.topic,
                "Endpoint subscribed"
            );
            streams.push(stream);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = self
            .endpoints
            .iter()
            .zip(streams)
            .map(|(endpoint, stream)| {
                tokio::spawn(run_endpoint(
                    Arc::clone(endpoint),
                    Arc::clone(&self.transport),
                    stream,
                    self.concurrent_message_limit,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        tracing::info!("Message bus started");

        Ok(BusHandle {
            transport: self.transport,
            endpoints: self.endpoints.iter().map(|e| e.name.clone()).collect(),
            shutdown,
            tasks,
        })
    }
}

/// Handle to a running bus.
///
/// Dropping the handle also stops the receive loops, without waiting for them.
pub struct BusHandle {
    transport: Arc<dyn Transport>,
    endpoints: Vec<String>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl BusHandle {
    /// Publish a message to its type's topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Serialization`] if the message cannot be encoded, or
    /// [`BusError::PublishFailed`] if the broker rejects it.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<(), BusError> {
        let envelope = Envelope::wrap(message)?;
        self.publish_envelope(&M::topic(), &envelope).await
    }

    /// Publish a prepared envelope to an explicit topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the broker rejects it.
    pub async fn publish_envelope(&self, topic: &str, envelope: &Envelope) -> Result<(), BusError> {
        tracing::debug!(topic, message_id = %envelope.message_id, "Publishing message");
        self.transport.publish(topic, envelope).await
    }

    /// Names of the running endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Stop receiving and wait for in-flight messages to finish.
    ///
    /// A message waiting between retries counts as in flight, so `timeout` should
    /// cover the longest retry interval in use.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Transport`] if the loops did not finish within `timeout`;
    /// they are aborted in that case.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<(), BusError> {
        tracing::info!("Stopping message bus");
        let _ = self.shutdown.send(true);

        let drained = tokio::time::timeout(
            timeout,
            futures::future::join_all(self.tasks.iter_mut()),
        )
        .await;

        match drained {
            Ok(results) => {
                for error in results.into_iter().filter_map(Result::err) {
                    tracing::error!(error = %error, "Endpoint task failed");
                }
                tracing::info!("Message bus stopped");
                Ok(())
            },
            Err(_) => {
                for task in &self.tasks {
                    task.abort();
                }
                tracing::warn!(timeout_ms = timeout.as_millis(), "Message bus shutdown timed out");
                Err(BusError::Transport(format!(
                    "shutdown timed out after {timeout:?}"
                )))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use service_common_core::consumer::{ConsumeContext, ConsumeFuture};
    use service_common_testing::InMemoryTransport;

    #[derive(Debug, Serialize, Deserialize)]
    struct MatchRequested {
        player: String,
    }

    impl Message for MatchRequested {}

    struct MatchRequestedConsumer;

    impl Consumer for MatchRequestedConsumer {
        type Message = MatchRequested;

        fn consume(&self, _context: ConsumeContext<MatchRequested>) -> ConsumeFuture<'_> {
            Box::pin(async { Ok(()) })
        }
    }

    struct MatchCancelledConsumer;

    impl Consumer for MatchCancelledConsumer {
        type Message = MatchRequested;

        fn consume(&self, _context: ConsumeContext<MatchRequested>) -> ConsumeFuture<'_> {
            Box::pin(async { Ok(()) })
        }
    }

    fn settings() -> ServiceSettings {
        ServiceSettings {
            service_name: "matchmaking".to_string(),
        }
    }

    fn transport() -> Arc<dyn Transport> {
        Arc::new(InMemoryTransport::new())
    }

    #[test]
    fn endpoints_follow_the_naming_convention() {
        let bus = BusConfigurator::new(&settings())
            .add_consumer(MatchRequestedConsumer)
            .add_consumer(MatchCancelledConsumer)
            .build(transport())
            .unwrap();

        assert_eq!(
            bus.endpoints().collect::<Vec<_>>(),
            vec![
                "matchmaking-match-requested-consumer",
                "matchmaking-match-cancelled-consumer"
            ]
        );
    }

    #[test]
    fn retry_policies_resolve_per_endpoint() {
        let bus_wide = RetryPolicy::immediate(1);
        let own = RetryPolicy::None;

        let bus = add_bus(&settings(), Some(bus_wide.clone()))
            .add_consumer(MatchRequestedConsumer)
            .add_consumer_with_retry(MatchCancelledConsumer, own.clone())
            .build(transport())
            .unwrap();

        assert_eq!(bus.retry_policy("matchmaking-match-requested-consumer"), Some(&bus_wide));
        assert_eq!(bus.retry_policy("matchmaking-match-cancelled-consumer"), Some(&own));
    }

    #[test]
    fn default_retry_applies_without_override() {
        let bus = add_bus(&settings(), None)
            .add_consumer(MatchRequestedConsumer)
            .build(transport())
            .unwrap();

        assert_eq!(
            bus.retry_policy("matchmaking-match-requested-consumer"),
            Some(&RetryPolicy::default())
        );
    }

    #[test]
    fn duplicate_endpoints_are_rejected() {
        let result = BusConfigurator::new(&settings())
            .add_consumer(MatchRequestedConsumer)
            .add_consumer(MatchRequestedConsumer)
            .build(transport());

        assert!(matches!(result, Err(BusError::Configuration(_))));
    }

    #[test]
    fn empty_bus_is_a_configuration_error() {
        let result = BusConfigurator::new(&settings()).build(transport());
        assert!(matches!(result, Err(BusError::Configuration(_))));
    }

    #[test]
    fn zero_concurrency_is_a_configuration_error() {
        let result = BusConfigurator::new(&settings())
            .add_consumer(MatchRequestedConsumer)
            .concurrent_message_limit(0)
            .build(transport());
        assert!(matches!(result, Err(BusError::Configuration(_))));
    }
}
