//! Inventory service demo.
//!
//! Mirrors catalog items and grants items to players, wiring the document store and
//! the message bus from one settings file.
//!
//! ```bash
//! docker run -d -p 27017:27017 mongo:7
//! docker run -d -p 9092:9092 redpandadata/redpanda:latest redpanda start --overprovisioned
//! RUST_LOG=info cargo run -p inventory-service -- config/inventory.toml
//! ```

mod consumers;
mod contracts;
mod entities;

use anyhow::Context;
use consumers::{CatalogItemCreatedConsumer, GrantItemsConsumer};
use entities::{CatalogItem, InventoryItem};
use service_common_core::repository::RepositoryFactory;
use service_common_core::settings::Settings;
use service_common_core::transport::Transport;
use service_common_mongodb::MongoStore;
use service_common_redpanda::RedpandaTransport;
use service_common_runtime::{RetryPolicy, add_bus};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "config/inventory.toml";

/// Longest in-flight work the bus may need to drain: a message waiting out its retries.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let settings = Settings::load(&config_path)
        .with_context(|| format!("loading settings from {config_path}"))?;

    info!(service = %settings.service.service_name, "Starting inventory service");

    let store = MongoStore::connect(&settings.service, &settings.mongodb)
        .await
        .context("connecting to the document store")?;
    let catalog_items = store.repository::<CatalogItem>("catalog_items");
    let inventory_items = store.repository::<InventoryItem>("inventory_items");

    let transport: Arc<dyn Transport> = Arc::new(
        RedpandaTransport::from_settings(&settings.broker).context("configuring the broker")?,
    );

    let bus = add_bus(&settings.service, None)
        .add_consumer(CatalogItemCreatedConsumer::new(catalog_items))
        // Grants are user-facing, so give up sooner than the default
        .add_consumer_with_retry(
            GrantItemsConsumer::new(inventory_items, Arc::clone(&transport)),
            RetryPolicy::intervals([Duration::from_secs(1), Duration::from_secs(3)]),
        )
        .build(Arc::clone(&transport))?;

    for endpoint in bus.endpoints() {
        info!(endpoint, "Endpoint configured");
    }

    let handle = bus.start().await.context("starting the message bus")?;
    info!("Inventory service running, press Ctrl+C to stop");

    signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    handle.shutdown(SHUTDOWN_TIMEOUT).await?;
    info!("Inventory service stopped");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "inventory_service=info,service_common_runtime=info,service_common_mongodb=info,service_common_redpanda=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
