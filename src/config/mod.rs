//! Configuration loading
//!
//! The configuration is a TOML file; every section and key is optional.

mod schema;
mod store;

pub use schema::{AppConfig, GadgetBackend, GadgetConfig, StorageConfig, ToolsConfig};
pub use store::{default_locations, parse, ConfigStore, CONFIG_FILENAME};
