//! # Service Common Core
//!
//! Core traits and types shared by every service built on this workspace.
//!
//! Two independent capabilities live here:
//!
//! - **Persistence**: the [`Entity`](entity::Entity) contract, the storage-agnostic
//!   [`Repository`](repository::Repository) trait, and the [`Filter`](filter::Filter)
//!   predicate language that every document store can translate natively.
//! - **Messaging**: the [`Message`](message::Message) and
//!   [`Consumer`](consumer::Consumer) contracts, the wire [`Envelope`](message::Envelope),
//!   endpoint naming, and the [`Transport`](transport::Transport) seam implemented by
//!   broker clients.
//!
//! The two halves share nothing at runtime. They only read the same
//! [`Settings`](settings::Settings).
//!
//! ## Example
//!
//! ```ignore
//! use service_common_core::prelude::*;
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct Item {
//!     #[serde(rename = "_id", with = "service_common_core::entity::uuid_string")]
//!     id: Uuid,
//!     name: String,
//! }
//!
//! impl Entity for Item {
//!     fn id(&self) -> Uuid {
//!         self.id
//!     }
//! }
//!
//! async fn cheapest(items: &dyn Repository<Item>) -> Result<Vec<Item>, RepositoryError> {
//!     items.get_all_matching(&Filter::lt("price", 10)).await
//! }
//! ```

pub mod consumer;
pub mod endpoint;
pub mod entity;
pub mod filter;
pub mod message;
pub mod repository;
pub mod settings;
pub mod transport;

pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;

/// Commonly used items, importable with a single `use`.
pub mod prelude {
    pub use crate::consumer::{ConsumeContext, Consumer, ConsumerError};
    pub use crate::entity::Entity;
    pub use crate::filter::Filter;
    pub use crate::message::{Envelope, Message};
    pub use crate::repository::{Repository, RepositoryError, RepositoryFactory};
    pub use crate::settings::Settings;
    pub use crate::transport::{BusError, Delivery, Transport};
    pub use crate::{Deserialize, Serialize, Uuid};
}
