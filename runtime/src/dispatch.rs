//! Per-endpoint message dispatch.
//!
//! Each endpoint runs one receive loop. A delivered envelope is decoded for the
//! endpoint's consumer and handed to it under the endpoint's retry policy; when the
//! policy gives up (or the consumer rejects the message) the envelope is moved to the
//! endpoint's error queue with fault headers.
//!
//! A delivery is acked only once it is settled, so a crash mid-retry leaves the
//! message pending at the broker.

use crate::retry::{RetryError, RetryPolicy, retry_with_predicate};
use chrono::Utc;
use futures::StreamExt;
use service_common_core::consumer::{ConsumeContext, ConsumeFuture, Consumer, ConsumerError};
use service_common_core::endpoint::EndpointNameFormatter;
use service_common_core::message::{Envelope, Message, headers};
use service_common_core::transport::{EnvelopeStream, Transport};
use std::sync::Arc;
use tokio::sync::watch;

/// A consumer with its message type erased, so endpoints can be held in one list.
pub(crate) trait ErasedConsumer: Send + Sync {
    /// Decode `envelope` and run the consumer once.
    fn dispatch<'a>(&'a self, envelope: &'a Envelope, retry_attempt: usize) -> ConsumeFuture<'a>;
}

/// Adapter from a typed [`Consumer`] to [`ErasedConsumer`].
pub(crate) struct TypedConsumer<C>(pub(crate) C);

impl<C: Consumer> ErasedConsumer for TypedConsumer<C> {
    fn dispatch<'a>(&'a self, envelope: &'a Envelope, retry_attempt: usize) -> ConsumeFuture<'a> {
        Box::pin(async move {
            // A body that does not decode is rejected: no retry can fix it
            let context =
                ConsumeContext::<C::Message>::from_envelope(envelope, retry_attempt)?;
            self.0.consume(context).await
        })
    }
}

/// Everything the receive loop needs to serve one endpoint.
pub(crate) struct Endpoint {
    pub(crate) name: String,
    pub(crate) topic: String,
    pub(crate) consumer_name: &'static str,
    pub(crate) retry: RetryPolicy,
    pub(crate) consumer: Box<dyn ErasedConsumer>,
}

impl Endpoint {
    pub(crate) fn new<C: Consumer>(
        formatter: &EndpointNameFormatter,
        consumer: C,
        retry: RetryPolicy,
    ) -> Self {
        let consumer_name = consumer.name();
        Self {
            name: formatter.format(consumer_name),
            topic: <C::Message as Message>::topic(),
            consumer_name,
            retry,
            consumer: Box::new(TypedConsumer(consumer)),
        }
    }

    pub(crate) fn error_queue(&self) -> String {
        EndpointNameFormatter::error_queue(&self.name)
    }
}

/// Receive loop for one endpoint.
///
/// Runs until the stream ends or `shutdown` flips to `true`. Messages already in
/// flight when shutdown is signalled are allowed to finish.
pub(crate) async fn run_endpoint(
    endpoint: Arc<Endpoint>,
    transport: Arc<dyn Transport>,
    stream: EnvelopeStream,
    concurrent_message_limit: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let stopped = async move {
        // An error means the handle was dropped, which also stops the loop
        let _ = shutdown.wait_for(|stopped| *stopped).await;
    };

    tracing::info!(endpoint = %endpoint.name, topic = %endpoint.topic, "Endpoint started");

    stream
        .take_until(stopped)
        .for_each_concurrent(concurrent_message_limit, |delivery| {
            let endpoint = Arc::clone(&endpoint);
            let transport = Arc::clone(&transport);
            async move {
                match delivery {
                    Ok(delivery) => {
                        if deliver(&endpoint, transport.as_ref(), &delivery.envelope).await {
                            delivery.ack();
                        }
                    },
                    Err(error) => {
                        tracing::error!(
                            endpoint = %endpoint.name,
                            error = %error,
                            "Failed to receive message"
                        );
                    },
                }
            }
        })
        .await;

    tracing::info!(endpoint = %endpoint.name, "Endpoint stopped");
}

/// Hand one envelope to the endpoint's consumer, retrying and dead-lettering as needed.
///
/// Returns `true` once the message is settled and may be acked.
pub(crate) async fn deliver(
    endpoint: &Endpoint,
    transport: &dyn Transport,
    envelope: &Envelope,
) -> bool {
    metrics::counter!("bus.messages.consumed", "endpoint" => endpoint.name.clone()).increment(1);

    tracing::debug!(
        endpoint = %endpoint.name,
        message_id = %envelope.message_id,
        message_type = %envelope.message_type,
        "Dispatching message"
    );

    let result = retry_with_predicate(
        &endpoint.retry,
        |retry_attempt| {
            if retry_attempt > 0 {
                metrics::counter!("bus.messages.retried", "endpoint" => endpoint.name.clone())
                    .increment(1);
            }
            endpoint.consumer.dispatch(envelope, retry_attempt)
        },
        ConsumerError::is_retryable,
    )
    .await;

    match result {
        Ok(()) => true,
        Err(RetryError { error, retries }) => {
            dead_letter(endpoint, transport, envelope, &error, retries).await
        },
    }
}

async fn dead_letter(
    endpoint: &Endpoint,
    transport: &dyn Transport,
    envelope: &Envelope,
    error: &ConsumerError,
    retries: usize,
) -> bool {
    let error_queue = endpoint.error_queue();
    let message_id = envelope.message_id;

    tracing::warn!(
        endpoint = %endpoint.name,
        error_queue = %error_queue,
        message_id = %message_id,
        retries,
        error = %error,
        "Moving message to error queue"
    );

    let faulted = envelope
        .clone()
        .with_header(headers::FAULT_REASON, error.reason())
        .with_header(headers::FAULT_CONSUMER, endpoint.consumer_name)
        .with_header(headers::FAULT_ENDPOINT, endpoint.name.as_str())
        .with_header(headers::FAULT_RETRY_COUNT, retries.to_string())
        .with_header(headers::FAULT_TIMESTAMP, Utc::now().to_rfc3339());

    match transport.publish(&error_queue, &faulted).await {
        Ok(()) => {
            metrics::counter!("bus.messages.dead_lettered", "endpoint" => endpoint.name.clone())
                .increment(1);
            true
        },
        Err(publish_error) => {
            // Left unacked so the broker redelivers it after a restart
            tracing::error!(
                endpoint = %endpoint.name,
                error_queue = %error_queue,
                message_id = %message_id,
                error = %publish_error,
                "Failed to move message to error queue"
            );
            false
        },
    }
}
