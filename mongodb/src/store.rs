//! Shared MongoDB connection handing out repositories.

use crate::error::map_driver_error;
use crate::repository::MongoRepository;
use bson::doc;
use mongodb::{Client, Database};
use service_common_core::entity::Entity;
use service_common_core::repository::{Repository, RepositoryError, RepositoryFactory};
use service_common_core::settings::{MongoDbSettings, ServiceSettings};
use std::sync::Arc;

/// Process-wide store handle: one client, one database named after the service.
///
/// Clone freely; every clone shares the driver's connection pool.
#[derive(Clone, Debug)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Wrap an existing database handle.
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    /// Connect using the service's settings and verify the server answers.
    ///
    /// The database is named after `service.service_name`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::StoreUnavailable`] if the connection string is
    /// invalid or the server does not answer a ping.
    pub async fn connect(
        service: &ServiceSettings,
        mongodb: &MongoDbSettings,
    ) -> Result<Self, RepositoryError> {
        let client = Client::with_uri_str(&mongodb.connection_string)
            .await
            .map_err(|e| map_driver_error(e, None))?;
        let store = Self::new(client.database(&service.service_name));
        store.ping().await?;

        tracing::info!(database = %service.service_name, "Connected to document store");
        Ok(store)
    }

    /// Round-trip a `ping` command to the server.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::StoreUnavailable`] if the server does not answer.
    pub async fn ping(&self) -> Result<(), RepositoryError> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| map_driver_error(e, None))?;
        Ok(())
    }

    /// The underlying database handle.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }

    /// A typed repository over `collection_name`.
    #[must_use]
    pub fn collection<T: Entity>(&self, collection_name: &str) -> MongoRepository<T> {
        MongoRepository::new(self.database.collection::<T>(collection_name))
    }
}

impl RepositoryFactory for MongoStore {
    fn repository<T: Entity>(&self, collection_name: &str) -> Arc<dyn Repository<T>> {
        Arc::new(self.collection::<T>(collection_name))
    }
}
