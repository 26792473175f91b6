//! Repository trait and related types for document persistence.
//!
//! This module defines the storage-agnostic CRUD contract for one entity type. A
//! repository is bound to a single collection and translates calls into round trips
//! against the underlying store.
//!
//! # Design
//!
//! The `Repository` trait is deliberately small:
//!
//! - Read everything, or everything matching a [`Filter`]
//! - Read one entity by identifier, or the first one matching a [`Filter`]
//! - Create, replace, and remove single entities
//!
//! It does NOT provide transactions, partial updates, paging, or sorting. Each call is
//! atomic from the caller's point of view and there are no partial-success states.
//!
//! # Implementations
//!
//! - `MongoRepository` (in `service-common-mongodb`): production implementation
//! - `InMemoryRepository` (in `service-common-testing`): fast, deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use service_common_core::entity::Entity;
//! use service_common_core::filter::Filter;
//! use service_common_core::repository::{Repository, RepositoryError};
//!
//! async fn rename<T: Entity + Clone>(
//!     repository: &dyn Repository<T>,
//!     id: uuid::Uuid,
//!     apply: impl FnOnce(&mut T),
//! ) -> Result<(), RepositoryError> {
//!     let mut entity = repository.get(id).await?.ok_or(RepositoryError::NotFound(id))?;
//!     apply(&mut entity);
//!     repository.update(&entity).await
//! }
//! ```

use crate::entity::Entity;
use crate::filter::Filter;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Boxed future returned by every repository operation.
pub type RepositoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Errors that can occur during repository operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// A required entity argument was absent (nil identifier).
    ///
    /// Raised before any I/O is attempted.
    #[error("Invalid argument '{argument}': {reason}")]
    InvalidArgument {
        /// The offending argument
        argument: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The update target does not exist. Never retried automatically.
    #[error("Entity not found: {0}")]
    NotFound(Uuid),

    /// An entity with the same identifier already exists.
    #[error("Duplicate key: an entity with id {0} already exists")]
    DuplicateKey(Uuid),

    /// The store could not be reached or rejected the operation at transport level.
    ///
    /// Not retried by the repository layer; retry is the caller's decision.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored document could not be converted to or from the entity type.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    /// Build the error returned for the absent-entity sentinel.
    #[must_use]
    pub fn absent_entity() -> Self {
        Self::InvalidArgument {
            argument: "entity",
            reason: "entity is absent (nil identifier)".to_string(),
        }
    }
}

/// Storage-agnostic CRUD contract for one entity type.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: a single repository instance is shared by
/// every request handler in a service and many calls run concurrently. No call may
/// hold state that another call observes, other than the store itself.
///
/// # Ordering
///
/// Results come back in store-native order. Callers must not rely on it, and with
/// multiple matches [`find`](Repository::find) may return any one of them.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn Repository<T>>`), which is how repositories
/// are handed to the hosting service by a [`RepositoryFactory`].
pub trait Repository<T: Entity>: Send + Sync {
    /// Load every stored entity.
    ///
    /// The result is fully materialized when the future resolves. It is not a
    /// transactional snapshot with respect to concurrent writes.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store could not be reached
    /// - `Serialization`: a stored document does not decode as `T`
    fn get_all(&self) -> RepositoryFuture<'_, Vec<T>>;

    /// Load every entity matching `filter`.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store could not be reached
    /// - `Serialization`: a stored document does not decode as `T`
    fn get_all_matching<'a>(&'a self, filter: &'a Filter) -> RepositoryFuture<'a, Vec<T>>;

    /// Load the entity with identifier `id`.
    ///
    /// Returns `Ok(None)` when no such entity exists. Absence is not an error.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store could not be reached
    /// - `Serialization`: the stored document does not decode as `T`
    fn get(&self, id: Uuid) -> RepositoryFuture<'_, Option<T>>;

    /// Load the first entity matching `filter`, in store-native order.
    ///
    /// Returns `Ok(None)` when nothing matches.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store could not be reached
    /// - `Serialization`: the stored document does not decode as `T`
    fn find<'a>(&'a self, filter: &'a Filter) -> RepositoryFuture<'a, Option<T>>;

    /// Persist a new entity.
    ///
    /// The entity is visible to subsequent reads once the future resolves.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: the entity carries the nil identifier
    /// - `DuplicateKey`: an entity with the same identifier already exists
    /// - `StoreUnavailable`: the store could not be reached
    fn create<'a>(&'a self, entity: &'a T) -> RepositoryFuture<'a, ()>;

    /// Replace the stored entity that has `entity`'s identifier.
    ///
    /// This is a full-document replace, never a partial patch, and never an upsert.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: the entity carries the nil identifier
    /// - `NotFound`: no entity with that identifier exists
    /// - `StoreUnavailable`: the store could not be reached
    fn update<'a>(&'a self, entity: &'a T) -> RepositoryFuture<'a, ()>;

    /// Delete the entity with identifier `id`.
    ///
    /// Removing an identifier that does not exist succeeds and changes nothing.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store could not be reached
    fn remove(&self, id: Uuid) -> RepositoryFuture<'_, ()>;
}

/// Hands out repositories bound to a shared store connection.
///
/// The hosting service holds one factory per process and asks it for one repository
/// per entity type during startup.
///
/// ```ignore
/// let store = MongoStore::connect(&settings.service, &settings.mongodb).await?;
/// let items: Arc<dyn Repository<Item>> = store.repository("items");
/// ```
pub trait RepositoryFactory: Send + Sync {
    /// A repository for entities of type `T` stored in `collection_name`.
    ///
    /// Creating a repository performs no I/O.
    fn repository<T: Entity>(&self, collection_name: &str) -> Arc<dyn Repository<T>>;
}

/// Reject the absent-entity sentinel before any I/O happens.
///
/// # Errors
///
/// Returns [`RepositoryError::InvalidArgument`] when `entity` carries the nil identifier.
pub fn ensure_present<T: Entity>(entity: &T) -> Result<(), RepositoryError> {
    if entity.is_absent() {
        return Err(RepositoryError::absent_entity());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Note {
        id: Uuid,
    }

    impl Entity for Note {
        fn id(&self) -> Uuid {
            self.id
        }
    }

    #[test]
    fn absent_entity_is_rejected() {
        let error = ensure_present(&Note { id: Uuid::nil() });
        assert!(matches!(
            error,
            Err(RepositoryError::InvalidArgument { argument: "entity", .. })
        ));
    }

    #[test]
    fn present_entity_passes() {
        assert!(ensure_present(&Note { id: Uuid::new_v4() }).is_ok());
    }

    #[test]
    fn duplicate_key_error_display() {
        let id = Uuid::new_v4();
        let display = format!("{}", RepositoryError::DuplicateKey(id));
        assert!(display.contains(&id.to_string()));
        assert!(display.contains("already exists"));
    }

    #[test]
    fn not_found_error_display() {
        let id = Uuid::new_v4();
        let display = format!("{}", RepositoryError::NotFound(id));
        assert!(display.contains("not found"));
    }
}
