//! Messages this service exchanges with the rest of the platform.

use serde::{Deserialize, Serialize};
use service_common_core::message::Message;
use uuid::Uuid;

/// Published by the catalog service when an item is added to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItemCreated {
    /// Catalog item id
    pub item_id: Uuid,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
}

impl Message for CatalogItemCreated {}

/// Asks this service to add items to a player's inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantItems {
    /// Player receiving the items
    pub user_id: Uuid,
    /// Catalog item to grant
    pub catalog_item_id: Uuid,
    /// How many to add
    pub quantity: i64,
    /// Correlates the grant with the request that caused it
    pub correlation_id: Uuid,
}

impl Message for GrantItems {}

/// Confirms that a grant was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItemsGranted {
    /// Correlation id copied from [`GrantItems`]
    pub correlation_id: Uuid,
}

impl Message for InventoryItemsGranted {}
