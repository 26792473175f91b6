//! Consumer contract.
//!
//! A [`Consumer`] handles one message type. The hosting service registers its
//! consumers explicitly on the bus at startup; each one gets its own endpoint named
//! after the service and the consumer type (see [`crate::endpoint`]).
//!
//! # Failure Handling
//!
//! Returning [`ConsumerError::Failed`] asks the bus to redeliver the message under the
//! endpoint's retry policy. [`ConsumerError::Rejected`] skips the remaining retries and
//! moves the message straight to the error queue, for input that will never succeed.
//!
//! # Example
//!
//! ```
//! use service_common_core::consumer::{ConsumeContext, ConsumeFuture, Consumer, ConsumerError};
//! use service_common_core::message::Message;
//! use serde::{Deserialize, Serialize};
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
//!     fn consume(&self, context: ConsumeContext<MatchRequested>) -> ConsumeFuture<'_> {
//!         Box::pin(async move {
//!             if context.message().player.is_empty() {
//!                 return Err(ConsumerError::Rejected("player is required".into()));
//!             }
//!             Ok(())
//!         })
//!     }
//! }
//! ```

use crate::endpoint::short_type_name;
use crate::message::{Envelope, Message};
use crate::repository::RepositoryError;
use crate::transport::BusError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Boxed future returned by [`Consumer::consume`].
pub type ConsumeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ConsumerError>> + Send + 'a>>;

/// Errors a consumer reports back to the bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// Processing failed; the message is retried within the retry budget.
    #[error("Consumer processing failure: {0}")]
    Failed(String),

    /// The message can never be processed; it goes to the error queue without retries.
    #[error("Message rejected: {0}")]
    Rejected(String),
}

impl ConsumerError {
    /// Whether the bus should retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Failed(reason) | Self::Rejected(reason) => reason,
        }
    }
}

impl From<RepositoryError> for ConsumerError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::StoreUnavailable(_) | RepositoryError::NotFound(_) => {
                Self::Failed(error.to_string())
            },
            RepositoryError::InvalidArgument { .. }
            | RepositoryError::DuplicateKey(_)
            | RepositoryError::Serialization(_) => Self::Rejected(error.to_string()),
        }
    }
}

impl From<BusError> for ConsumerError {
    fn from(error: BusError) -> Self {
        match error {
            BusError::Serialization(_) | BusError::Configuration(_) => {
                Self::Rejected(error.to_string())
            },
            _ => Self::Failed(error.to_string()),
        }
    }
}

/// A decoded message together with its delivery metadata.
#[derive(Debug, Clone)]
pub struct ConsumeContext<M> {
    message: M,
    message_id: Uuid,
    sent_at: DateTime<Utc>,
    headers: BTreeMap<String, String>,
    retry_attempt: usize,
}

impl<M: Message> ConsumeContext<M> {
    /// Decode an envelope for delivery attempt `retry_attempt` (0 for the first try).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Serialization`] if the body does not decode as `M`.
    pub fn from_envelope(envelope: &Envelope, retry_attempt: usize) -> Result<Self, BusError> {
        Ok(Self {
            message: envelope.open()?,
            message_id: envelope.message_id,
            sent_at: envelope.sent_at,
            headers: envelope.headers.clone(),
            retry_attempt,
        })
    }
}

impl<M> ConsumeContext<M> {
    /// Build a context directly, for tests and in-process dispatch.
    #[must_use]
    pub fn new(message: M) -> Self {
        Self {
            message,
            message_id: Uuid::new_v4(),
            sent_at: Utc::now(),
            headers: BTreeMap::new(),
            retry_attempt: 0,
        }
    }

    /// The decoded message.
    #[must_use]
    pub const fn message(&self) -> &M {
        &self.message
    }

    /// Take ownership of the decoded message.
    #[must_use]
    pub fn into_message(self) -> M {
        self.message
    }

    /// Id of the message, stable across redeliveries.
    #[must_use]
    pub const fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// When the message was sent.
    #[must_use]
    pub const fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// Look up an envelope header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Zero for the first delivery, then 1, 2, ... for each retry.
    #[must_use]
    pub const fn retry_attempt(&self) -> usize {
        self.retry_attempt
    }
}

/// Handles messages of one type.
///
/// # Thread Safety
///
/// A consumer instance is shared by every in-flight message on its endpoint, so it
/// must be `Send + Sync`. Keep per-message state inside `consume`.
///
/// # Dyn Compatibility
///
/// `consume` returns an explicit `Pin<Box<dyn Future>>` so the runtime can erase the
/// message type and hold consumers behind trait objects.
pub trait Consumer: Send + Sync + 'static {
    /// The message type this consumer handles.
    type Message: Message;

    /// Process one message.
    ///
    /// # Errors
    ///
    /// - [`ConsumerError::Failed`]: retry under the endpoint's policy
    /// - [`ConsumerError::Rejected`]: move to the error queue immediately
    fn consume(&self, context: ConsumeContext<Self::Message>) -> ConsumeFuture<'_>;

    /// Consumer type name used to derive the endpoint name.
    ///
    /// Defaults to the type's own name via [`std::any::type_name`], which is stable
    /// between runs of one build but not guaranteed across compiler releases.
    /// Override it with a literal when the endpoint (and the messages pending on it)
    /// must survive a toolchain upgrade:
    ///
    /// ```ignore
    /// fn name(&self) -> &'static str {
    ///     "GrantItemsConsumer"
    /// }
    /// ```
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}
