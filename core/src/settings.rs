//! Service configuration.
//!
//! Settings are read from a TOML document with one section per concern and can be
//! overridden from the environment, which is how deployments inject secrets such as
//! the database connection string.
//!
//! ```toml
//! [service]
//! service_name = "inventory"
//!
//! [mongodb]
//! connection_string = "mongodb://localhost:27017"
//!
//! [broker]
//! host = "localhost:9092"
//! ```
//!
//! | Environment variable        | Overrides                   |
//! |-----------------------------|-----------------------------|
//! | `SERVICE_NAME`              | `service.service_name`      |
//! | `MONGODB_CONNECTION_STRING` | `mongodb.connection_string` |
//! | `BROKER_HOST`               | `broker.host`               |
//!
//! # Example
//!
//! ```no_run
//! use service_common_core::settings::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load("config/inventory.toml")?;
//! println!("Starting {}", settings.service.service_name);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable overriding [`ServiceSettings::service_name`].
pub const SERVICE_NAME_VAR: &str = "SERVICE_NAME";
/// Environment variable overriding [`MongoDbSettings::connection_string`].
pub const MONGODB_CONNECTION_STRING_VAR: &str = "MONGODB_CONNECTION_STRING";
/// Environment variable overriding [`BrokerSettings::host`].
pub const BROKER_HOST_VAR: &str = "BROKER_HOST";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration file {path}: {reason}")]
    Io {
        /// Path that was read
        path: String,
        /// Underlying error
        reason: String,
    },

    /// The configuration could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// A setting has an invalid value
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Identity of the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Logical service name. Names the database and prefixes every endpoint.
    pub service_name: String,
}

/// Document store connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoDbSettings {
    /// Driver connection string (`mongodb://host:port` or `mongodb+srv://...`)
    pub connection_string: String,
}

/// Message broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Broker address(es), comma separated (`host:port[,host:port]`)
    pub host: String,
}

/// All settings a service reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Service identity
    pub service: ServiceSettings,
    /// Document store
    pub mongodb: MongoDbSettings,
    /// Message broker
    pub broker: BrokerSettings,
}

impl ServiceSettings {
    /// Validate the service identity.
    ///
    /// # Errors
    ///
    /// Returns error if the service name is blank or not ASCII.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "service.service_name cannot be empty".to_string(),
            ));
        }
        // Endpoint and error-queue names are derived from it
        if !self.service_name.is_ascii() {
            return Err(ConfigError::Validation(format!(
                "service.service_name must be ASCII, got '{}'",
                self.service_name
            )));
        }
        Ok(())
    }
}

impl MongoDbSettings {
    /// Validate the store connection settings.
    ///
    /// # Errors
    ///
    /// Returns error if the connection string is blank or has no MongoDB scheme.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let connection_string = self.connection_string.trim();
        if connection_string.is_empty() {
            return Err(ConfigError::Validation(
                "mongodb.connection_string cannot be empty".to_string(),
            ));
        }
        if !connection_string.starts_with("mongodb://")
            && !connection_string.starts_with("mongodb+srv://")
        {
            return Err(ConfigError::Validation(
                "mongodb.connection_string must start with mongodb:// or mongodb+srv://"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl BrokerSettings {
    /// Validate the broker settings.
    ///
    /// # Errors
    ///
    /// Returns error if no broker address is given.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.split(',').all(|host| host.trim().is_empty()) {
            return Err(ConfigError::Validation("broker.host cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Settings {
    /// Parse settings from a TOML document without applying environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is malformed or a section is missing.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read a TOML file, apply environment overrides, and validate.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut settings = Self::from_toml_str(&raw)?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Replace values with the environment variables that are set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Replace values using an arbitrary variable lookup.
    ///
    /// Blank values are ignored so an exported-but-empty variable cannot wipe a setting.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(service_name) = lookup(SERVICE_NAME_VAR) {
            self.service.service_name = service_name;
        }
        if let Some(connection_string) = lookup(MONGODB_CONNECTION_STRING_VAR) {
            self.mongodb.connection_string = connection_string;
        }
        if let Some(host) = lookup(BROKER_HOST_VAR) {
            self.broker.host = host;
        }
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service.validate()?;
        self.mongodb.validate()?;
        self.broker.validate()?;
        Ok(())
    }
}
