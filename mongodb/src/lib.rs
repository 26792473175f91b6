//! MongoDB-backed repositories.
//!
//! Implements [`Repository`](service_common_core::repository::Repository) over a
//! MongoDB collection. Every call is a single round trip; filters are translated to
//! query documents and evaluated by the server.
//!
//! # Storage Format
//!
//! Entities are stored as-is through serde. Identifiers live in `_id` as canonical
//! UUID strings (see `service_common_core::entity::uuid_string`), which is also what
//! lookups by identifier query for.
//!
//! # Example
//!
//! ```no_run
//! use service_common_core::repository::RepositoryFactory;
//! use service_common_core::settings::Settings;
//! use service_common_mongodb::MongoStore;
//! # use service_common_core::prelude::*;
//! # #[derive(Serialize, Deserialize)]
//! # struct Item { #[serde(rename = "_id", with = "service_common_core::entity::uuid_string")] id: Uuid }
//! # impl Entity for Item { fn id(&self) -> Uuid { self.id } }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load("config/inventory.toml")?;
//! let store = MongoStore::connect(&settings.service, &settings.mongodb).await?;
//!
//! let items = store.repository::<Item>("items");
//! let all = items.get_all().await?;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod query;
mod repository;
mod store;

pub use error::DUPLICATE_KEY_CODE;
pub use repository::MongoRepository;
pub use store::MongoStore;
