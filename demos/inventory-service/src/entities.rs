//! Documents owned by this service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_common_core::entity::{Entity, uuid_string};
use uuid::Uuid;

/// Local copy of a catalog item, kept in sync from catalog events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    #[serde(rename = "_id", with = "uuid_string")]
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

impl Entity for CatalogItem {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// A stack of one catalog item in a player's inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    #[serde(rename = "_id", with = "uuid_string")]
    pub id: Uuid,
    #[serde(with = "uuid_string")]
    pub user_id: Uuid,
    #[serde(with = "uuid_string")]
    pub catalog_item_id: Uuid,
    pub quantity: i64,
    pub acquired_date: DateTime<Utc>,
    /// Grants already added to this stack, so redelivered grants are not counted twice
    #[serde(default, with = "uuid_string::vec")]
    pub applied_grants: Vec<Uuid>,
}

impl Entity for InventoryItem {
    fn id(&self) -> Uuid {
        self.id
    }
}
