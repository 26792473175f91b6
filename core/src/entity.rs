//! The entity contract.
//!
//! Every record persisted through a [`Repository`](crate::repository::Repository)
//! carries a UUID that is assigned once, never changes, and is the only key the
//! repository layer looks things up by. Everything else about an entity is opaque:
//! the store is schemaless and the repository never inspects other fields.
//!
//! # Storage Format
//!
//! Identifiers are stored as their canonical hyphenated string, not as a binary
//! subtype, so documents stay readable from any tool and compare the same way across
//! store versions. Annotate the identifier field with [`uuid_string`] and rename it to
//! [`ID_FIELD`]:
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use service_common_core::entity::Entity;
//! use uuid::Uuid;
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct Player {
//!     #[serde(rename = "_id", with = "service_common_core::entity::uuid_string")]
//!     id: Uuid,
//!     name: String,
//! }
//!
//! impl Entity for Player {
//!     fn id(&self) -> Uuid {
//!         self.id
//!     }
//! }
//! ```
//!
//! Timestamps with offsets (`chrono::DateTime<FixedOffset>` or `DateTime<Utc>`) need no
//! annotation: chrono always serializes them as RFC 3339 strings.

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Name of the document field that holds the entity identifier.
pub const ID_FIELD: &str = "_id";

/// A uniquely identified record that can be stored in a document collection.
///
/// # Absent Sentinel
///
/// Rust has no null references, so the nil UUID (all zeroes) stands in for an absent
/// entity. Repositories reject it with
/// [`RepositoryError::InvalidArgument`](crate::repository::RepositoryError::InvalidArgument)
/// before doing any I/O.
///
/// # Thread Safety
///
/// Entities cross task boundaries inside the async runtime, so they must be
/// `Send + Sync + Unpin + 'static`.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// The entity's immutable identifier.
    fn id(&self) -> Uuid;

    /// Whether this entity carries the absent sentinel instead of a real identifier.
    fn is_absent(&self) -> bool {
        self.id().is_nil()
    }
}

/// Serde adapter storing a [`Uuid`] as its canonical string.
///
/// `uuid`'s own serde impl switches to raw bytes for non human-readable formats,
/// which is what the BSON driver uses on the write path. This adapter pins the
/// string form for every format.
pub mod uuid_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    /// Serialize a UUID as its hyphenated lowercase string.
    ///
    /// # Errors
    ///
    /// Propagates the serializer's error.
    pub fn serialize<S: Serializer>(id: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&id.hyphenated())
    }

    /// Deserialize a UUID from its string form.
    ///
    /// # Errors
    ///
    /// Fails when the value is not a string or not a valid UUID.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Uuid::parse_str(&raw).map_err(serde::de::Error::custom)
    }

    /// The same adapter for `Option<Uuid>` fields.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use uuid::Uuid;

        /// Serialize an optional UUID as a string or null.
        ///
        /// # Errors
        ///
        /// Propagates the serializer's error.
        pub fn serialize<S: Serializer>(
            id: &Option<Uuid>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) => serializer.collect_str(&id.hyphenated()),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional UUID from a string or null.
        ///
        /// # Errors
        ///
        /// Fails when a present value is not a valid UUID string.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Uuid>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| Uuid::parse_str(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }

    /// The same adapter for `Vec<Uuid>` fields.
    pub mod vec {
        use serde::{Deserialize, Deserializer, Serializer};
        use uuid::Uuid;

        /// Serialize UUIDs as an array of strings.
        ///
        /// # Errors
        ///
        /// Propagates the serializer's error.
        pub fn serialize<S: Serializer>(ids: &[Uuid], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(ids.iter().map(|id| id.hyphenated().to_string()))
        }

        /// Deserialize UUIDs from an array of strings.
        ///
        /// # Errors
        ///
        /// Fails when an element is not a valid UUID string.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<Uuid>, D::Error> {
            Vec::<String>::deserialize(deserializer)?
                .iter()
                .map(|raw| Uuid::parse_str(raw).map_err(serde::de::Error::custom))
                .collect()
        }
    }
}
