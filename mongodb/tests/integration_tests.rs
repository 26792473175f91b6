//! Integration tests for `MongoRepository` using testcontainers.
//!
//! These tests use a real MongoDB server to validate every repository operation.
//!
//! # Requirements
//!
//! Docker must be running. Run with `cargo test -p service-common-mongodb -- --ignored`.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages
#![allow(clippy::unwrap_used)] // Tests can unwrap

use serde::{Deserialize, Serialize};
use service_common_core::entity::Entity;
use service_common_core::filter::Filter;
use service_common_core::repository::{Repository, RepositoryError, RepositoryFactory};
use service_common_core::settings::{MongoDbSettings, ServiceSettings};
use service_common_mongodb::MongoStore;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::mongo::Mongo;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct InventoryItem {
    #[serde(rename = "_id", with = "service_common_core::entity::uuid_string")]
    id: Uuid,
    #[serde(with = "service_common_core::entity::uuid_string")]
    user_id: Uuid,
    catalog_item: String,
    quantity: i64,
    acquired_at: chrono::DateTime<chrono::Utc>,
}

impl Entity for InventoryItem {
    fn id(&self) -> Uuid {
        self.id
    }
}

fn item(user_id: Uuid, catalog_item: &str, quantity: i64) -> InventoryItem {
    InventoryItem {
        id: Uuid::new_v4(),
        user_id,
        catalog_item: catalog_item.to_string(),
        quantity,
        acquired_at: chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:00+00:00")
            .unwrap()
            .with_timezone(&chrono::Utc),
    }
}

/// Start a Mongo container and connect a store to it.
///
/// Returns both the container (to keep it alive) and the store.
async fn setup_store() -> (ContainerAsync<Mongo>, MongoStore) {
    let container = Mongo::default()
        .start()
        .await
        .expect("Failed to start mongo container");

    let port = container
        .get_host_port_ipv4(27017)
        .await
        .expect("Failed to get mongo port");

    let service = ServiceSettings {
        service_name: "inventory".to_string(),
    };
    let mongodb = MongoDbSettings {
        connection_string: format!("mongodb://127.0.0.1:{port}"),
    };

    let store = MongoStore::connect(&service, &mongodb)
        .await
        .expect("Failed to connect to mongo");
    (container, store)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn database_is_named_after_the_service() {
    let (_container, store) = setup_store().await;
    assert_eq!(store.database().name(), "inventory");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn crud_round_trip() {
    let (_container, store) = setup_store().await;
    let items = store.repository::<InventoryItem>("inventory_items");
    let mut potion = item(Uuid::new_v4(), "potion", 1);

    items.create(&potion).await.expect("create");
    assert_eq!(items.get(potion.id).await.expect("get"), Some(potion.clone()));

    potion.quantity = 5;
    items.update(&potion).await.expect("update");
    assert_eq!(items.get(potion.id).await.expect("get"), Some(potion.clone()));

    items.remove(potion.id).await.expect("remove");
    assert_eq!(items.get(potion.id).await.expect("get"), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn duplicate_create_is_reported() {
    let (_container, store) = setup_store().await;
    let items = store.repository::<InventoryItem>("inventory_items");
    let potion = item(Uuid::new_v4(), "potion", 1);

    items.create(&potion).await.expect("create");
    let error = items.create(&potion).await.unwrap_err();

    assert_eq!(error, RepositoryError::DuplicateKey(potion.id));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn update_of_missing_entity_is_not_found() {
    let (_container, store) = setup_store().await;
    let items = store.repository::<InventoryItem>("inventory_items");
    let ghost = item(Uuid::new_v4(), "ghost", 1);

    let error = items.update(&ghost).await.unwrap_err();

    assert_eq!(error, RepositoryError::NotFound(ghost.id));
    assert!(items.get_all().await.expect("get_all").is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn remove_of_unknown_id_succeeds() {
    let (_container, store) = setup_store().await;
    let items = store.repository::<InventoryItem>("inventory_items");
    let potion = item(Uuid::new_v4(), "potion", 1);
    items.create(&potion).await.expect("create");

    items.remove(Uuid::new_v4()).await.expect("remove");

    assert_eq!(items.get_all().await.expect("get_all"), vec![potion]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn filters_are_evaluated_by_the_server() {
    let (_container, store) = setup_store().await;
    let items = store.repository::<InventoryItem>("inventory_items");
    let ana = Uuid::new_v4();
    let ben = Uuid::new_v4();
    let potion = item(ana, "potion", 3);
    let ether = item(ana, "ether", 1);
    let elixir = item(ben, "elixir", 7);
    for entity in [&potion, &ether, &elixir] {
        items.create(entity).await.expect("create");
    }

    let owned_by_ana = Filter::eq("user_id", ana.to_string());
    let mut found = items
        .get_all_matching(&owned_by_ana)
        .await
        .expect("get_all_matching");
    found.sort_by(|a, b| a.catalog_item.cmp(&b.catalog_item));
    assert_eq!(found, vec![ether.clone(), potion.clone()]);

    let stacked = owned_by_ana & Filter::gte("quantity", 2);
    assert_eq!(items.find(&stacked).await.expect("find"), Some(potion));

    assert_eq!(
        items.find(&Filter::eq("catalog_item", "megalixir")).await.expect("find"),
        None
    );
    assert_eq!(
        items.find(&Filter::id(elixir.id)).await.expect("find"),
        Some(elixir)
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn identifiers_and_timestamps_are_stored_as_strings() {
    let (_container, store) = setup_store().await;
    let items = store.repository::<InventoryItem>("inventory_items");
    let potion = item(Uuid::new_v4(), "potion", 1);
    items.create(&potion).await.expect("create");

    let raw = store
        .database()
        .collection::<bson::Document>("inventory_items")
        .find_one(bson::doc! { "_id": potion.id.to_string() })
        .await
        .expect("raw find")
        .expect("document exists");

    assert_eq!(raw.get_str("_id").unwrap(), potion.id.to_string());
    assert_eq!(raw.get_str("user_id").unwrap(), potion.user_id.to_string());
    assert!(raw.get_str("acquired_at").unwrap().starts_with("2024-05-01T10:00:00"));
}

#[tokio::test]
async fn unreachable_server_fails_connect() {
    let service = ServiceSettings {
        service_name: "inventory".to_string(),
    };
    let mongodb = MongoDbSettings {
        connection_string: "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200".to_string(),
    };

    let error = MongoStore::connect(&service, &mongodb).await.unwrap_err();
    assert!(matches!(error, RepositoryError::StoreUnavailable(_)));
}
