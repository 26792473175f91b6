//! # Service Common Testing
//!
//! Testing utilities for services built on the common repository and bus layers.
//!
//! This crate provides:
//! - [`InMemoryRepository`] and [`InMemoryStore`]: document-store stand-ins
//! - [`InMemoryTransport`]: a broker stand-in with an unreachable mode
//! - [`init_test_tracing`]: opt-in log output for tests
//!
//! ## Example
//!
//! ```ignore
//! use service_common_testing::{InMemoryStore, InMemoryTransport};
//!
//! #[tokio::test]
//! async fn grants_items() {
//!     let store = InMemoryStore::new();
//!     let transport = Arc::new(InMemoryTransport::new());
//!     let handle = add_bus(&settings, None)
//!         .add_consumer(GrantItemsConsumer::new(store.repository("items")))
//!         .build(transport.clone())?
//!         .start()
//!         .await?;
//!
//!     handle.publish(&GrantItems { quantity: 2 }).await?;
//! }
//! ```

/// In-memory repositories
pub mod repository;

/// In-memory broker transport
pub mod transport;

pub use repository::{InMemoryRepository, InMemoryStore};
pub use transport::InMemoryTransport;

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; safe to call from every test since only the first call wins.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
