//! Repository contract tests, run against the in-memory implementation.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use service_common_core::entity::Entity;
use service_common_core::filter::Filter;
use service_common_core::repository::{Repository, RepositoryError, RepositoryFactory};
use service_common_testing::{InMemoryRepository, InMemoryStore};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct CatalogItem {
    #[serde(rename = "_id", with = "service_common_core::entity::uuid_string")]
    id: Uuid,
    name: String,
    price: u32,
    tags: Vec<String>,
}

impl Entity for CatalogItem {
    fn id(&self) -> Uuid {
        self.id
    }
}

fn item(name: &str, price: u32) -> CatalogItem {
    CatalogItem {
        id: Uuid::new_v4(),
        name: name.to_string(),
        price,
        tags: Vec::new(),
    }
}

#[tokio::test]
async fn create_then_get_returns_equal_entity() {
    let items = InMemoryRepository::new();
    let potion = item("Potion", 5);

    items.create(&potion).await.unwrap();

    assert_eq!(items.get(potion.id).await.unwrap(), Some(potion));
}

#[tokio::test]
async fn creating_twice_is_a_duplicate_key() {
    let items = InMemoryRepository::new();
    let potion = item("Potion", 5);

    items.create(&potion).await.unwrap();
    let error = items.create(&potion).await.unwrap_err();

    assert_eq!(error, RepositoryError::DuplicateKey(potion.id));
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn update_replaces_the_whole_document() {
    let items = InMemoryRepository::new();
    let mut potion = item("Potion", 5);
    potion.tags.push("consumable".to_string());
    items.create(&potion).await.unwrap();

    let updated = CatalogItem {
        name: "Hi-Potion".to_string(),
        price: 9,
        tags: Vec::new(),
        ..potion.clone()
    };
    items.update(&updated).await.unwrap();

    assert_eq!(items.get(potion.id).await.unwrap(), Some(updated));
}

#[tokio::test]
async fn update_of_missing_entity_is_not_found() {
    let items = InMemoryRepository::<CatalogItem>::new();
    let ghost = item("Ghost", 1);

    let error = items.update(&ghost).await.unwrap_err();

    assert_eq!(error, RepositoryError::NotFound(ghost.id));
    assert!(items.is_empty());
}

#[tokio::test]
async fn remove_of_unknown_id_changes_nothing() {
    let items = InMemoryRepository::new();
    let potion = item("Potion", 5);
    items.create(&potion).await.unwrap();

    items.remove(Uuid::new_v4()).await.unwrap();

    assert_eq!(items.get_all().await.unwrap(), vec![potion]);
}

#[tokio::test]
async fn remove_deletes_the_entity() {
    let items = InMemoryRepository::new();
    let potion = item("Potion", 5);
    items.create(&potion).await.unwrap();

    items.remove(potion.id).await.unwrap();

    assert_eq!(items.get(potion.id).await.unwrap(), None);
}

#[tokio::test]
async fn find_returns_none_one_or_any_match() {
    let items = InMemoryRepository::new();
    let potion = item("Potion", 5);
    let ether = item("Ether", 5);
    let elixir = item("Elixir", 50);
    for entity in [&potion, &ether, &elixir] {
        items.create(entity).await.unwrap();
    }

    assert_eq!(items.find(&Filter::gt("price", 100)).await.unwrap(), None);
    assert_eq!(items.find(&Filter::eq("name", "Elixir")).await.unwrap(), Some(elixir));

    let cheap = items.find(&Filter::eq("price", 5)).await.unwrap().unwrap();
    assert!(cheap == potion || cheap == ether);
}

#[tokio::test]
async fn find_by_id_filter() {
    let items = InMemoryRepository::new();
    let potion = item("Potion", 5);
    items.create(&potion).await.unwrap();
    items.create(&item("Ether", 7)).await.unwrap();

    assert_eq!(items.find(&Filter::id(potion.id)).await.unwrap(), Some(potion));
}

#[tokio::test]
async fn factory_repositories_are_trait_objects() {
    let store = InMemoryStore::new();
    let items = store.repository::<CatalogItem>("catalog-items");
    let potion = item("Potion", 5);

    items.create(&potion).await.unwrap();

    let matching = items
        .get_all_matching(&(Filter::gte("price", 1) & Filter::lt("price", 10)))
        .await
        .unwrap();
    assert_eq!(matching, vec![potion]);
}

proptest! {
    #[test]
    fn get_all_matching_returns_exactly_the_satisfying_subset(
        prices in proptest::collection::vec(0u32..100, 0..20),
        threshold in 0u32..100,
    ) {
        futures::executor::block_on(async {
            let items = InMemoryRepository::new();
            let mut expected = Vec::new();
            for (index, price) in prices.iter().enumerate() {
                let entity = item(&format!("item-{index}"), *price);
                if *price >= threshold {
                    expected.push(entity.clone());
                }
                items.create(&entity).await.unwrap();
            }

            let matching = items
                .get_all_matching(&Filter::gte("price", threshold))
                .await
                .unwrap();

            prop_assert_eq!(matching, expected);
            Ok(())
        })?;
    }
}
