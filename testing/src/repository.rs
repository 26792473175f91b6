//! In-memory repository testing utilities
//!
//! - [`InMemoryRepository`]: HashMap-backed [`Repository`] for one collection
//! - [`InMemoryStore`]: [`RepositoryFactory`] handing out shared in-memory collections
//!
//! Entities are kept as their serialized JSON documents, so filters are evaluated
//! against the same shape the document store would see.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use serde_json::Value;
use service_common_core::entity::{Entity, ID_FIELD};
use service_common_core::filter::Filter;
use service_common_core::repository::{
    Repository, RepositoryError, RepositoryFactory, RepositoryFuture, ensure_present,
};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

type Collection = Arc<RwLock<Vec<(Uuid, Value)>>>;

/// In-memory repository for fast, deterministic testing.
///
/// Documents keep insertion order, which stands in for the store's natural order.
///
/// # Example
///
/// ```
/// use service_common_core::prelude::*;
/// use service_common_testing::InMemoryRepository;
///
/// #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// struct Item {
///     #[serde(rename = "_id", with = "service_common_core::entity::uuid_string")]
///     id: Uuid,
///     name: String,
/// }
///
/// impl Entity for Item {
///     fn id(&self) -> Uuid {
///         self.id
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let items = InMemoryRepository::<Item>::new();
/// let potion = Item { id: Uuid::new_v4(), name: "Potion".into() };
///
/// items.create(&potion).await?;
/// assert_eq!(items.get(potion.id).await?, Some(potion));
/// # Ok(())
/// # }
/// ```
pub struct InMemoryRepository<T> {
    documents: Collection,
    unavailable: Arc<RwLock<bool>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for InMemoryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            documents: Arc::clone(&self.documents),
            unavailable: Arc::clone(&self.unavailable),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> InMemoryRepository<T> {
    /// Create a new empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::with_collection(Arc::default(), Arc::default())
    }

    fn with_collection(documents: Collection, unavailable: Arc<RwLock<bool>>) -> Self {
        Self {
            documents,
            unavailable,
            _entity: PhantomData,
        }
    }

    /// Number of stored documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().unwrap().len()
    }

    /// Check if the repository is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().unwrap().is_empty()
    }

    /// Raw stored document for `id`, for asserting on the persisted shape.
    #[must_use]
    pub fn document(&self, id: Uuid) -> Option<Value> {
        self.documents
            .read()
            .unwrap()
            .iter()
            .find(|(stored, _)| *stored == id)
            .map(|(_, document)| document.clone())
    }

    /// Simulate a store outage: every call fails with `StoreUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().unwrap() = unavailable;
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if *self.unavailable.read().unwrap() {
            return Err(RepositoryError::StoreUnavailable(
                "in-memory store is marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn to_document(entity: &T) -> Result<Value, RepositoryError> {
        let document = serde_json::to_value(entity)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        if !document.is_object() {
            return Err(RepositoryError::Serialization(
                "entity must serialize to an object".to_string(),
            ));
        }
        // Same rule as the MongoDB repository: lookups go through the string `_id`
        let expected = entity.id().to_string();
        if document.get(ID_FIELD).and_then(Value::as_str) != Some(expected.as_str()) {
            return Err(RepositoryError::Serialization(format!(
                "entity must store its id {expected} as a string in '{ID_FIELD}'"
            )));
        }
        Ok(document)
    }

    fn from_document(document: &Value) -> Result<T, RepositoryError> {
        serde_json::from_value(document.clone())
            .map_err(|e| RepositoryError::Serialization(e.to_string()))
    }

    fn matching(&self, filter: &Filter) -> Result<Vec<T>, RepositoryError> {
        self.check_available()?;
        self.documents
            .read()
            .unwrap()
            .iter()
            .filter(|(_, document)| filter.matches(document))
            .map(|(_, document)| Self::from_document(document))
            .collect()
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    fn get_all(&self) -> RepositoryFuture<'_, Vec<T>> {
        Box::pin(async move { self.matching(&Filter::All) })
    }

    fn get_all_matching<'a>(&'a self, filter: &'a Filter) -> RepositoryFuture<'a, Vec<T>> {
        Box::pin(async move { self.matching(filter) })
    }

    fn get(&self, id: Uuid) -> RepositoryFuture<'_, Option<T>> {
        Box::pin(async move {
            self.check_available()?;
            self.document(id).as_ref().map(Self::from_document).transpose()
        })
    }

    fn find<'a>(&'a self, filter: &'a Filter) -> RepositoryFuture<'a, Option<T>> {
        Box::pin(async move {
            self.check_available()?;
            self.documents
                .read()
                .unwrap()
                .iter()
                .find(|(_, document)| filter.matches(document))
                .map(|(_, document)| Self::from_document(document))
                .transpose()
        })
    }

    fn create<'a>(&'a self, entity: &'a T) -> RepositoryFuture<'a, ()> {
        Box::pin(async move {
            ensure_present(entity)?;
            self.check_available()?;
            let id = entity.id();
            let document = Self::to_document(entity)?;

            let mut documents = self.documents.write().unwrap();
            if documents.iter().any(|(stored, _)| *stored == id) {
                return Err(RepositoryError::DuplicateKey(id));
            }
            documents.push((id, document));
            Ok(())
        })
    }

    fn update<'a>(&'a self, entity: &'a T) -> RepositoryFuture<'a, ()> {
        Box::pin(async move {
            ensure_present(entity)?;
            self.check_available()?;
            let id = entity.id();
            let document = Self::to_document(entity)?;

            let mut documents = self.documents.write().unwrap();
            let slot = documents
                .iter_mut()
                .find(|(stored, _)| *stored == id)
                .ok_or(RepositoryError::NotFound(id))?;
            slot.1 = document;
            Ok(())
        })
    }

    fn remove(&self, id: Uuid) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            self.check_available()?;
            self.documents.write().unwrap().retain(|(stored, _)| *stored != id);
            Ok(())
        })
    }
}

/// In-memory [`RepositoryFactory`].
///
/// Repositories for the same collection name share their documents, like two
/// handles onto one database collection.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
    unavailable: Arc<RwLock<bool>>,
}

impl InMemoryStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the collections handed out so far
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Simulate an outage of the whole store.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().unwrap() = unavailable;
    }

    /// A typed in-memory repository over `collection_name`.
    #[must_use]
    pub fn collection<T: Entity>(&self, collection_name: &str) -> InMemoryRepository<T> {
        let documents = Arc::clone(
            self.collections
                .write()
                .unwrap()
                .entry(collection_name.to_string())
                .or_default(),
        );
        InMemoryRepository::with_collection(documents, Arc::clone(&self.unavailable))
    }
}

impl RepositoryFactory for InMemoryStore {
    fn repository<T: Entity>(&self, collection_name: &str) -> Arc<dyn Repository<T>> {
        Arc::new(self.collection::<T>(collection_name))
    }
}
