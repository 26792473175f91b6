//! MongoDB implementation of [`Repository`].

use crate::error::map_driver_error;
use crate::query::{id_query, to_query};
use bson::Document;
use futures::TryStreamExt;
use mongodb::Collection;
use service_common_core::entity::{Entity, ID_FIELD};
use service_common_core::filter::Filter;
use service_common_core::repository::{
    Repository, RepositoryError, RepositoryFuture, ensure_present,
};
use uuid::Uuid;

/// Repository over one MongoDB collection.
///
/// Cheap to clone: the driver collection handle shares the client's connection pool.
pub struct MongoRepository<T: Entity> {
    collection: Collection<T>,
}

impl<T: Entity> Clone for MongoRepository<T> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
        }
    }
}

impl<T: Entity> MongoRepository<T> {
    /// Wrap an existing collection handle.
    #[must_use]
    pub const fn new(collection: Collection<T>) -> Self {
        Self { collection }
    }

    /// Name of the backing collection.
    #[must_use]
    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    async fn find_many(&self, query: Document) -> Result<Vec<T>, RepositoryError> {
        tracing::trace!(collection = self.collection_name(), ?query, "find");
        let cursor = self
            .collection
            .find(query)
            .await
            .map_err(|e| map_driver_error(e, None))?;
        cursor.try_collect().await.map_err(|e| map_driver_error(e, None))
    }

    async fn find_first(&self, query: Document) -> Result<Option<T>, RepositoryError> {
        tracing::trace!(collection = self.collection_name(), ?query, "find_one");
        self.collection
            .find_one(query)
            .await
            .map_err(|e| map_driver_error(e, None))
    }
}

/// Serialize `entity` for writing and check that lookups by id will find it.
///
/// Reads query `_id` by the identifier's string form, so an entity that stores its
/// id anywhere else (or as binary) would be written but never found again.
fn to_stored_document<T: Entity>(entity: &T) -> Result<Document, RepositoryError> {
    let document =
        bson::to_document(entity).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    let expected = entity.id().to_string();
    match document.get_str(ID_FIELD) {
        Ok(stored) if stored == expected => Ok(document),
        _ => Err(RepositoryError::Serialization(format!(
            "entity must store its id {expected} as a string in '{ID_FIELD}'; \
             annotate the id field with #[serde(rename = \"_id\", with = \"uuid_string\")]"
        ))),
    }
}

impl<T: Entity> Repository<T> for MongoRepository<T> {
    fn get_all(&self) -> RepositoryFuture<'_, Vec<T>> {
        Box::pin(self.find_many(Document::new()))
    }

    fn get_all_matching<'a>(&'a self, filter: &'a Filter) -> RepositoryFuture<'a, Vec<T>> {
        Box::pin(async move { self.find_many(to_query(filter)?).await })
    }

    fn get(&self, id: Uuid) -> RepositoryFuture<'_, Option<T>> {
        Box::pin(self.find_first(id_query(id)))
    }

    fn find<'a>(&'a self, filter: &'a Filter) -> RepositoryFuture<'a, Option<T>> {
        Box::pin(async move { self.find_first(to_query(filter)?).await })
    }

    fn create<'a>(&'a self, entity: &'a T) -> RepositoryFuture<'a, ()> {
        Box::pin(async move {
            ensure_present(entity)?;
            let id = entity.id();
            let document = to_stored_document(entity)?;

            self.collection
                .clone_with_type::<Document>()
                .insert_one(document)
                .await
                .map_err(|e| map_driver_error(e, Some(id)))?;

            tracing::debug!(collection = self.collection_name(), %id, "Entity created");
            Ok(())
        })
    }

    fn update<'a>(&'a self, entity: &'a T) -> RepositoryFuture<'a, ()> {
        Box::pin(async move {
            ensure_present(entity)?;
            let id = entity.id();
            let document = to_stored_document(entity)?;

            let result = self
                .collection
                .clone_with_type::<Document>()
                .replace_one(id_query(id), document)
                .await
                .map_err(|e| map_driver_error(e, Some(id)))?;

            if result.matched_count == 0 {
                return Err(RepositoryError::NotFound(id));
            }

            tracing::debug!(collection = self.collection_name(), %id, "Entity replaced");
            Ok(())
        })
    }

    fn remove(&self, id: Uuid) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            let result = self
                .collection
                .delete_one(id_query(id))
                .await
                .map_err(|e| map_driver_error(e, Some(id)))?;

            tracing::debug!(
                collection = self.collection_name(),
                %id,
                deleted = result.deleted_count,
                "Entity removed"
            );
            Ok(())
        })
    }
}
