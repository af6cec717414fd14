use crate::config::{ExtensionConfig, ExtensionStatus, PartialConfig};
use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Messages exchanged between the popup, the background coordinator and the
/// page sessions. Serialized as `{"type": "GET_STATUS"}` or
/// `{"type": "SET_CONFIG", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionMessage {
    GetConfig,
    SetConfig(PartialConfig),
    ConfigUpdated(ExtensionConfig),
    GetStatus,
    StatusResponse(ExtensionStatus),
    ToggleEnabled,
}

impl ExtensionMessage {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("unrecognised extension message")
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::GetConfig => "GET_CONFIG",
            Self::SetConfig(_) => "SET_CONFIG",
            Self::ConfigUpdated(_) => "CONFIG_UPDATED",
            Self::GetStatus => "GET_STATUS",
            Self::StatusResponse(_) => "STATUS_RESPONSE",
            Self::ToggleEnabled => "TOGGLE_ENABLED",
        }
    }
}

/// Reply to an [`ExtensionMessage`]. `NotApplicable` covers both "this
/// receiver does not handle that kind" and "nobody could answer".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExtensionResponse {
    Config(ExtensionConfig),
    Status(ExtensionStatus),
    NotApplicable,
}

impl ExtensionResponse {
    pub const fn config(&self) -> Option<ExtensionConfig> {
        match self {
            Self::Config(config) => Some(*config),
            _ => None,
        }
    }

    pub const fn status(&self) -> Option<ExtensionStatus> {
        match self {
            Self::Status(status) => Some(*status),
            _ => None,
        }
    }
}
