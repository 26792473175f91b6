//! Message contract and the wire envelope.
//!
//! A [`Message`] is a plain serde type that services exchange over the bus. Every
//! message type owns a topic named after it, so publishers and consumers agree on
//! where a message lives without any shared registry.
//!
//! # Wire Format
//!
//! Message bodies are JSON so that other services and tooling can read them. The
//! [`Envelope`] around the body is encoded with `bincode` for the transport, the same
//! compact framing the broker client already handles.
//!
//! # Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use service_common_core::message::{Envelope, Message};
//!
//! #[derive(Debug, Serialize, Deserialize, PartialEq)]
//! struct MatchRequested {
//!     player: String,
//! }
//!
//! impl Message for MatchRequested {}
//!
//! assert_eq!(MatchRequested::topic(), "match-requested");
//!
//! let envelope = Envelope::wrap(&MatchRequested { player: "ana".into() }).unwrap();
//! let decoded: MatchRequested = envelope.open().unwrap();
//! assert_eq!(decoded.player, "ana");
//! ```

use crate::endpoint::{kebab_case, short_type_name};
use crate::transport::BusError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Well-known envelope header names.
pub mod headers {
    /// Why the message was moved to an error queue
    pub const FAULT_REASON: &str = "fault-reason";
    /// Consumer type that failed to process the message
    pub const FAULT_CONSUMER: &str = "fault-consumer";
    /// Endpoint the message was received on before it faulted
    pub const FAULT_ENDPOINT: &str = "fault-endpoint";
    /// How many retries were attempted before giving up
    pub const FAULT_RETRY_COUNT: &str = "fault-retry-count";
    /// When the message was moved to the error queue (RFC 3339)
    pub const FAULT_TIMESTAMP: &str = "fault-timestamp";
}

/// A message exchanged between services.
///
/// The default [`message_type`](Message::message_type) is the Rust type name without
/// its module path, so `crate::contracts::MatchRequested` becomes `"MatchRequested"`.
/// Override it when two message types share a name or when a type is renamed but must
/// keep its topic.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier of this message type.
    #[must_use]
    fn message_type() -> &'static str {
        short_type_name::<Self>()
    }

    /// Topic this message type is published to.
    #[must_use]
    fn topic() -> String {
        kebab_case(Self::message_type())
    }
}

/// A message on the wire: a JSON body plus delivery metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique id of this message, kept across redeliveries and dead-lettering.
    pub message_id: Uuid,

    /// The [`Message::message_type`] of the body.
    pub message_type: String,

    /// When the message was first sent.
    pub sent_at: DateTime<Utc>,

    /// Free-form string headers (fault details, correlation ids, ...).
    pub headers: BTreeMap<String, String>,

    /// JSON-encoded message body.
    pub body: Vec<u8>,
}

impl Envelope {
    /// Wrap a message in a fresh envelope.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Serialization`] if the message cannot be encoded as JSON.
    pub fn wrap<M: Message>(message: &M) -> Result<Self, BusError> {
        let body = serde_json::to_vec(message).map_err(|e| {
            BusError::Serialization(format!("Failed to encode {}: {e}", M::message_type()))
        })?;

        Ok(Self {
            message_id: Uuid::new_v4(),
            message_type: M::message_type().to_string(),
            sent_at: Utc::now(),
            headers: BTreeMap::new(),
            body,
        })
    }

    /// Decode the body as message type `M`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Serialization`] if the envelope carries a different message
    /// type or the body does not decode as `M`.
    pub fn open<M: Message>(&self) -> Result<M, BusError> {
        if self.message_type != M::message_type() {
            return Err(BusError::Serialization(format!(
                "Expected message type {}, found {}",
                M::message_type(),
                self.message_type
            )));
        }

        serde_json::from_slice(&self.body).map_err(|e| {
            BusError::Serialization(format!("Failed to decode {}: {e}", self.message_type))
        })
    }

    /// Add or replace a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Look up a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Encode the envelope for the transport.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        bincode::serialize(self)
            .map_err(|e| BusError::Serialization(format!("Failed to encode envelope: {e}")))
    }

    /// Decode an envelope received from the transport.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Serialization`] if the bytes are not a valid envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        bincode::deserialize(bytes)
            .map_err(|e| BusError::Serialization(format!("Failed to decode envelope: {e}")))
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope {{ id: {}, type: {}, size: {} bytes }}",
            self.message_id,
            self.message_type,
            self.body.len()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct InventoryItemUpdated {
        item_id: Uuid,
        quantity: u32,
    }

    impl Message for InventoryItemUpdated {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Renamed;

    impl Message for Renamed {
        fn message_type() -> &'static str {
            "LegacyName"
        }
    }

    #[test]
    fn message_type_defaults_to_short_type_name() {
        assert_eq!(InventoryItemUpdated::message_type(), "InventoryItemUpdated");
        assert_eq!(InventoryItemUpdated::topic(), "inventory-item-updated");
    }

    #[test]
    fn overridden_message_type_drives_topic() {
        assert_eq!(Renamed::topic(), "legacy-name");
    }

    #[test]
    fn envelope_carries_body_and_metadata() {
        let message = InventoryItemUpdated {
            item_id: Uuid::new_v4(),
            quantity: 7,
        };

        let envelope = Envelope::wrap(&message)
            .expect("message should encode")
            .with_header("correlation-id", "abc");

        let wire = envelope.to_bytes().expect("envelope should encode");
        let received = Envelope::from_bytes(&wire).expect("envelope should decode");

        assert_eq!(received, envelope);
        assert_eq!(received.header("correlation-id"), Some("abc"));
        assert_eq!(received.open::<InventoryItemUpdated>().unwrap(), message);
    }

    #[test]
    fn body_is_readable_json() {
        let envelope = Envelope::wrap(&InventoryItemUpdated {
            item_id: Uuid::nil(),
            quantity: 2,
        })
        .unwrap();

        let json: serde_json::Value = serde_json::from_slice(&envelope.body).unwrap();
        assert_eq!(json["quantity"], 2);
    }

    #[test]
    fn opening_as_wrong_type_fails() {
        let envelope = Envelope::wrap(&Renamed).unwrap();
        let error = envelope.open::<InventoryItemUpdated>().unwrap_err();
        assert!(matches!(error, BusError::Serialization(_)));
    }

    #[test]
    fn garbage_bytes_are_not_an_envelope() {
        assert!(Envelope::from_bytes(&[0xff, 0x01]).is_err());
    }
}
