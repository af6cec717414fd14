use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inclusive bounds for a numeric setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub min: u32,
    pub max: u32,
}

impl Limit {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Rounds to the nearest integer and clamps into `[min, max]`.
    /// Non-finite input yields `fallback`.
    pub fn clamp_or(self, value: f64, fallback: u32) -> u32 {
        if !value.is_finite() {
            return fallback;
        }
        let rounded = value.round();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let clamped = rounded.clamp(f64::from(self.min), f64::from(self.max)) as u32;
        clamped
    }

    /// Clamp for already-integral input.
    pub fn clamp_int(self, value: i64) -> u32 {
        let clamped = value.clamp(i64::from(self.min), i64::from(self.max));
        u32::try_from(clamped).unwrap_or(self.min)
    }
}

pub const VISIBLE_MESSAGE_LIMIT: Limit = Limit::new(1, 200);
pub const LOAD_MORE_BATCH_SIZE: Limit = Limit::new(1, 50);

/// Persisted extension settings. Every instance handed to the rest of the
/// system has gone through sanitization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionConfig {
    /// Number of newest messages kept displayed (1..=200).
    pub visible_message_limit: u32,
    /// Number of hidden messages revealed per "load more" (1..=50).
    pub load_more_batch_size: u32,
    pub enabled: bool,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            visible_message_limit: 10,
            load_more_batch_size: 5,
            enabled: true,
        }
    }
}

impl ExtensionConfig {
    /// Builds a config from whatever was found in storage. Missing fields,
    /// wrong types and non-finite numbers fall back to defaults; numbers are
    /// rounded and clamped.
    pub fn from_stored(raw: Option<&Value>) -> Self {
        let defaults = Self::default();
        let object = raw.and_then(Value::as_object);
        let field = |name: &str| object.and_then(|o| o.get(name));

        Self {
            visible_message_limit: clamp_stored(
                field("visibleMessageLimit"),
                VISIBLE_MESSAGE_LIMIT,
                defaults.visible_message_limit,
            ),
            load_more_batch_size: clamp_stored(
                field("loadMoreBatchSize"),
                LOAD_MORE_BATCH_SIZE,
                defaults.load_more_batch_size,
            ),
            enabled: field("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(defaults.enabled),
        }
    }

    /// Re-clamps numeric fields. Used on configs that arrived over the wire
    /// typed but unchecked.
    #[must_use]
    pub fn sanitized(self) -> Self {
        Self {
            visible_message_limit: VISIBLE_MESSAGE_LIMIT
                .clamp_int(i64::from(self.visible_message_limit)),
            load_more_batch_size: LOAD_MORE_BATCH_SIZE
                .clamp_int(i64::from(self.load_more_batch_size)),
            enabled: self.enabled,
        }
    }

    /// Overlays `partial` on top of `self` and sanitizes the result.
    #[must_use]
    pub fn merged(&self, partial: &PartialConfig) -> Self {
        let defaults = Self::default();
        Self {
            visible_message_limit: partial.visible_message_limit.map_or(
                self.visible_message_limit,
                |v| VISIBLE_MESSAGE_LIMIT.clamp_or(v, defaults.visible_message_limit),
            ),
            load_more_batch_size: partial.load_more_batch_size.map_or(
                self.load_more_batch_size,
                |v| LOAD_MORE_BATCH_SIZE.clamp_or(v, defaults.load_more_batch_size),
            ),
            enabled: partial.enabled.unwrap_or(self.enabled),
        }
        .sanitized()
    }
}

fn clamp_stored(value: Option<&Value>, limit: Limit, fallback: u32) -> u32 {
    value
        .and_then(Value::as_f64)
        .map_or(fallback, |v| limit.clamp_or(v, fallback))
}

/// A subset of settings to change. Absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartialConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_message_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_more_batch_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl From<ExtensionConfig> for PartialConfig {
    fn from(config: ExtensionConfig) -> Self {
        Self {
            visible_message_limit: Some(f64::from(config.visible_message_limit)),
            load_more_batch_size: Some(f64::from(config.load_more_batch_size)),
            enabled: Some(config.enabled),
        }
    }
}

/// Snapshot of what a page session is currently doing. Computed on demand,
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    pub enabled: bool,
    pub total_messages: usize,
    pub visible_messages: usize,
    pub hidden_messages: usize,
}

impl ExtensionStatus {
    pub fn new(enabled: bool, total_messages: usize, visible_messages: usize) -> Self {
        Self {
            enabled,
            total_messages,
            visible_messages,
            hidden_messages: total_messages.saturating_sub(visible_messages),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn zero_limit_clamps_to_one() {
        let config = ExtensionConfig::from_stored(Some(&json!({ "visibleMessageLimit": 0 })));
        assert_eq!(config.visible_message_limit, 1);
    }

    #[test]
    fn oversized_batch_clamps_to_fifty() {
        let config = ExtensionConfig::from_stored(Some(&json!({ "loadMoreBatchSize": 1000 })));
        assert_eq!(config.load_more_batch_size, 50);
    }

    #[test]
    fn missing_enabled_defaults_to_true() {
        let config = ExtensionConfig::from_stored(Some(&json!({ "visibleMessageLimit": 20 })));
        assert!(config.enabled);
        assert_eq!(config.visible_message_limit, 20);
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        let config = ExtensionConfig::from_stored(Some(&json!({
            "visibleMessageLimit": "lots",
            "loadMoreBatchSize": null,
            "enabled": "yes",
        })));
        assert_eq!(config, ExtensionConfig::default());

        assert_eq!(
            ExtensionConfig::from_stored(Some(&json!([1, 2, 3]))),
            ExtensionConfig::default()
        );
        assert_eq!(ExtensionConfig::from_stored(None), ExtensionConfig::default());
    }

    #[test]
    fn fractional_values_are_rounded() {
        let config = ExtensionConfig::from_stored(Some(&json!({
            "visibleMessageLimit": 12.6,
            "loadMoreBatchSize": 3.2,
        })));
        assert_eq!(config.visible_message_limit, 13);
        assert_eq!(config.load_more_batch_size, 3);
    }

    #[test]
    fn merge_keeps_untouched_fields_and_clamps_new_ones() {
        let current = ExtensionConfig {
            visible_message_limit: 40,
            load_more_batch_size: 7,
            enabled: false,
        };
        let merged = current.merged(&PartialConfig {
            visible_message_limit: Some(500.0),
            ..PartialConfig::default()
        });
        assert_eq!(
            merged,
            ExtensionConfig {
                visible_message_limit: 200,
                load_more_batch_size: 7,
                enabled: false,
            }
        );
    }

    #[test]
    fn sanitized_repairs_out_of_range_wire_values() {
        let raw = ExtensionConfig {
            visible_message_limit: 0,
            load_more_batch_size: 99,
            enabled: true,
        };
        let fixed = raw.sanitized();
        assert_eq!(fixed.visible_message_limit, 1);
        assert_eq!(fixed.load_more_batch_size, 50);
    }

    #[test]
    fn status_derives_hidden_count() {
        let status = ExtensionStatus::new(true, 15, 10);
        assert_eq!(status.hidden_messages, 5);
    }
}
