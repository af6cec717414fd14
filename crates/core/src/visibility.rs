use booster_page::{Document, NodeId};
use booster_protocol::{ExtensionConfig, ExtensionStatus, DATA_ATTR};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const TEST_ID_ATTR: &str = "data-testid";
const ARIA_HIDDEN: &str = "aria-hidden";

/// One message node under management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedMessage {
    pub id: String,
    pub node: NodeId,
    pub visible: bool,
}

/// Owns the ordered set of tracked messages and keeps at most
/// `visible_message_limit` of them displayed.
///
/// Order is tracking order: document order for [`initialise`], arrival order
/// for [`add_messages`].
///
/// [`initialise`]: VisibilityManager::initialise
/// [`add_messages`]: VisibilityManager::add_messages
pub struct VisibilityManager {
    document: Arc<Document>,
    messages: Vec<TrackedMessage>,
    config: ExtensionConfig,
}

impl VisibilityManager {
    pub fn new(document: Arc<Document>) -> Self {
        Self {
            document,
            messages: Vec::new(),
            config: ExtensionConfig::default(),
        }
    }

    pub const fn config(&self) -> ExtensionConfig {
        self.config
    }

    pub fn messages(&self) -> &[TrackedMessage] {
        &self.messages
    }

    pub fn update_config(&mut self, config: ExtensionConfig) {
        self.config = config;
        self.recalculate_visibility();
    }

    /// Replaces the tracked set with `nodes` and applies the full policy.
    pub fn initialise(&mut self, nodes: &[NodeId]) {
        self.messages.clear();
        for node in nodes {
            self.track(*node);
        }
        self.recalculate_visibility();
        debug!("initialised with {} messages", self.messages.len());
    }

    /// Tracks nodes not seen before, then hides just enough of the oldest
    /// visible records to get back under the limit.
    pub fn add_messages(&mut self, nodes: &[NodeId]) {
        for node in nodes {
            if self.messages.iter().any(|m| m.node == *node) {
                continue;
            }
            self.track(*node);
        }
        self.enforce_limit();
    }

    /// Forgets records for `nodes`. Remaining records keep their state.
    pub fn remove_messages(&mut self, nodes: &[NodeId]) {
        let removed: HashSet<NodeId> = nodes.iter().copied().collect();
        self.messages.retain(|m| !removed.contains(&m.node));
    }

    /// Reveals up to `load_more_batch_size` hidden records, newest hidden
    /// first. Returns how many were revealed.
    pub fn load_more(&mut self) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let hidden: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.visible)
            .map(|(index, _)| index)
            .collect();
        let batch = self.config.load_more_batch_size as usize;
        let reveal = &hidden[hidden.len().saturating_sub(batch)..];
        for index in reveal {
            set_visible(&self.document, &mut self.messages[*index], true);
        }
        debug!("revealed {} additional messages", reveal.len());
        reveal.len()
    }

    pub fn has_hidden_messages(&self) -> bool {
        self.messages.iter().any(|m| !m.visible)
    }

    pub fn status(&self) -> ExtensionStatus {
        ExtensionStatus::new(
            self.config.enabled,
            self.messages.len(),
            self.visible_count(),
        )
    }

    /// Shows everything, strips the tracking attribute and forgets all
    /// records.
    pub fn destroy(&mut self) {
        for message in &mut self.messages {
            set_visible(&self.document, message, true);
            if let Err(err) = self.document.remove_attribute(message.node, DATA_ATTR) {
                warn!("failed to clear annotation on {}: {err}", message.node);
            }
        }
        self.messages.clear();
        debug!("visibility manager destroyed");
    }

    fn visible_count(&self) -> usize {
        self.messages.iter().filter(|m| m.visible).count()
    }

    fn track(&mut self, node: NodeId) {
        let id = self.derive_id(node);
        if let Err(err) = self.document.set_attribute(node, DATA_ATTR, &id) {
            warn!("cannot annotate message node {node}: {err}");
        }
        self.messages.push(TrackedMessage {
            id,
            node,
            visible: !self.document.is_display_none(node),
        });
    }

    fn recalculate_visibility(&mut self) {
        let targets = window_visibility(self.messages.len(), &self.config);
        for (message, visible) in self.messages.iter_mut().zip(targets) {
            set_visible(&self.document, message, visible);
        }
    }

    fn enforce_limit(&mut self) {
        if !self.config.enabled {
            return;
        }
        let limit = self.config.visible_message_limit as usize;
        let mut excess = self.visible_count().saturating_sub(limit);
        for message in &mut self.messages {
            if excess == 0 {
                break;
            }
            if message.visible {
                set_visible(&self.document, message, false);
                excess -= 1;
            }
        }
    }

    fn derive_id(&self, node: NodeId) -> String {
        if let Some(test_id) = self
            .document
            .attribute(node, TEST_ID_ATTR)
            .filter(|id| !id.is_empty())
        {
            return test_id;
        }
        format!("msg-{}-{}", self.messages.len(), current_unix_ms())
    }
}

/// Target visibility for each of `total` records in tracking order: all
/// shown when disabled, otherwise only the newest `visible_message_limit`.
pub fn window_visibility(total: usize, config: &ExtensionConfig) -> Vec<bool> {
    if !config.enabled {
        return vec![true; total];
    }
    let first_visible = total.saturating_sub(config.visible_message_limit as usize);
    (0..total).map(|index| index >= first_visible).collect()
}

fn set_visible(document: &Document, message: &mut TrackedMessage, visible: bool) {
    if message.visible == visible {
        return;
    }
    message.visible = visible;
    let applied = if visible {
        document
            .set_style(message.node, "display", "")
            .and_then(|()| document.remove_attribute(message.node, ARIA_HIDDEN))
    } else {
        document
            .set_style(message.node, "display", "none")
            .and_then(|()| document.set_attribute(message.node, ARIA_HIDDEN, "true"))
    };
    if let Err(err) = applied {
        warn!("failed to toggle message {}: {err}", message.id);
    }
}

fn current_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis())
        .unwrap_or(0)
}
