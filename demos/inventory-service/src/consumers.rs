//! Bus consumers hosted by the inventory service.

use crate::contracts::{CatalogItemCreated, GrantItems, InventoryItemsGranted};
use crate::entities::{CatalogItem, InventoryItem};
use chrono::Utc;
use service_common_core::consumer::{ConsumeContext, ConsumeFuture, Consumer, ConsumerError};
use service_common_core::filter::Filter;
use service_common_core::message::{Envelope, Message};
use service_common_core::repository::{Repository, RepositoryError};
use service_common_core::transport::Transport;
use std::sync::Arc;
use uuid::Uuid;

/// Mirrors catalog items into the local `catalog_items` collection.
pub struct CatalogItemCreatedConsumer {
    catalog_items: Arc<dyn Repository<CatalogItem>>,
}

impl CatalogItemCreatedConsumer {
    #[must_use]
    pub fn new(catalog_items: Arc<dyn Repository<CatalogItem>>) -> Self {
        Self { catalog_items }
    }
}

impl Consumer for CatalogItemCreatedConsumer {
    type Message = CatalogItemCreated;

    fn consume(&self, context: ConsumeContext<CatalogItemCreated>) -> ConsumeFuture<'_> {
        Box::pin(async move {
            let message = context.into_message();
            let item = CatalogItem {
                id: message.item_id,
                name: message.name,
                description: message.description,
            };

            match self.catalog_items.create(&item).await {
                // Redelivery of an item we already mirrored
                Ok(()) | Err(RepositoryError::DuplicateKey(_)) => Ok(()),
                Err(error) => Err(error.into()),
            }
        })
    }
}

/// Adds granted items to a player's inventory and confirms the grant.
pub struct GrantItemsConsumer {
    inventory_items: Arc<dyn Repository<InventoryItem>>,
    transport: Arc<dyn Transport>,
}

impl GrantItemsConsumer {
    #[must_use]
    pub fn new(
        inventory_items: Arc<dyn Repository<InventoryItem>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inventory_items,
            transport,
        }
    }
}

impl Consumer for GrantItemsConsumer {
    type Message = GrantItems;

    fn consume(&self, context: ConsumeContext<GrantItems>) -> ConsumeFuture<'_> {
        Box::pin(async move {
            let grant = context.message();
            if grant.quantity <= 0 {
                return Err(ConsumerError::Rejected(format!(
                    "quantity must be positive, got {}",
                    grant.quantity
                )));
            }

            let stack = Filter::eq("user_id", grant.user_id.to_string())
                & Filter::eq("catalog_item_id", grant.catalog_item_id.to_string());

            match self.inventory_items.find(&stack).await? {
                // Redelivery after the stack was written but before the confirmation went out
                Some(item) if item.applied_grants.contains(&grant.correlation_id) => {
                    tracing::debug!(
                        correlation_id = %grant.correlation_id,
                        "Grant already applied, confirming again"
                    );
                },
                Some(mut item) => {
                    let held = item.quantity;
                    item.quantity = held.checked_add(grant.quantity).ok_or_else(|| {
                        ConsumerError::Rejected(format!(
                            "stack of {held} cannot take {} more",
                            grant.quantity
                        ))
                    })?;
                    item.applied_grants.push(grant.correlation_id);
                    self.inventory_items.update(&item).await?;
                },
                None => {
                    let item = InventoryItem {
                        id: Uuid::new_v4(),
                        user_id: grant.user_id,
                        catalog_item_id: grant.catalog_item_id,
                        quantity: grant.quantity,
                        acquired_date: Utc::now(),
                        applied_grants: vec![grant.correlation_id],
                    };
                    self.inventory_items.create(&item).await?;
                },
            }

            tracing::info!(
                user_id = %grant.user_id,
                catalog_item_id = %grant.catalog_item_id,
                quantity = grant.quantity,
                retry_attempt = context.retry_attempt(),
                "Items granted"
            );

            let granted = Envelope::wrap(&InventoryItemsGranted {
                correlation_id: grant.correlation_id,
            })?;
            self.transport
                .publish(&InventoryItemsGranted::topic(), &granted)
                .await?;
            Ok(())
        })
    }
}
