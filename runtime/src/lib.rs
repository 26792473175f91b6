//! # Service Common Runtime
//!
//! Message bus runtime: hosts consumers on broker endpoints and publishes messages.
//!
//! ## Core Components
//!
//! - **`BusConfigurator`**: Registers consumers and retry policies at startup
//! - **`Bus` / `BusHandle`**: Starts endpoints fail-fast, publishes, shuts down
//! - **Retry**: Fixed-interval retries by default, with other policies available
//!
//! Messages a consumer cannot process within its retry budget are moved to the
//! endpoint's error queue (`{endpoint}_error`) with fault headers describing why.
//!
//! ## Example
//!
//! ```ignore
//! use service_common_runtime::{add_bus, RetryPolicy};
//!
//! let handle = add_bus(&settings.service, None)
//!     .add_consumer(GrantItemsConsumer::new(items))
//!     .build(transport)?
//!     .start()
//!     .await?;
//! ```

/// Retry policies and helpers
pub mod retry;

/// Bus bootstrap, startup and publishing
pub mod bus;

mod dispatch;

pub use bus::{Bus, BusConfigurator, BusHandle, DEFAULT_CONCURRENT_MESSAGE_LIMIT, add_bus};
pub use retry::{RetryError, RetryPolicy, retry_with_policy, retry_with_predicate};
