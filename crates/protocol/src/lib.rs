//! # Booster Protocol
//!
//! Shared vocabulary between the background coordinator, page sessions and
//! the popup: the persisted configuration and its sanitization rules, the
//! derived status snapshot, and the messages exchanged between processes.
//!
//! ```text
//! popup ──SET_CONFIG──> coordinator ──CONFIG_UPDATED──> page sessions
//! popup ──GET_STATUS──> coordinator ──GET_STATUS──────> active page session
//! ```

use anyhow::Result;

pub mod config;
pub mod message;

pub use config::{ExtensionConfig, ExtensionStatus, Limit, PartialConfig};
pub use message::{ExtensionMessage, ExtensionResponse};

pub const EXTENSION_NAME: &str = "ChatGPT Speed Booster";

/// Key under which the configuration lives in the key-value store.
pub const STORAGE_KEY: &str = "chatgpt_speed_booster_config";

pub const CSS_PREFIX: &str = "cgsb";

/// Attribute written on every tracked message node.
pub const DATA_ATTR: &str = "data-cgsb-managed";

pub const MUTATION_DEBOUNCE_MS: u64 = 150;

/// Host the page sessions are injected into.
pub const TARGET_HOST: &str = "chatgpt.com";

/// JSON schema describing the persisted configuration.
pub fn config_schema() -> Result<serde_json::Value> {
    serde_json::to_value(schemars::schema_for!(ExtensionConfig)).map_err(Into::into)
}

/// JSON schema describing every message kind.
pub fn message_schema() -> Result<serde_json::Value> {
    serde_json::to_value(schemars::schema_for!(ExtensionMessage)).map_err(Into::into)
}
