use crate::{Document, NodeId};

/// Everything that depends on the chat application's markup. The watcher and
/// the visibility manager only ever ask these questions, so a page redesign
/// means a new adapter and nothing else.
pub trait PageAdapter: Send + Sync {
    fn is_message_node(&self, document: &Document, node: NodeId) -> bool;

    fn find_scroll_container(&self, document: &Document) -> Option<NodeId>;

    /// Message nodes currently in the document, in document order.
    fn find_message_nodes(&self, document: &Document) -> Vec<NodeId> {
        self.message_descendants(document, document.root())
    }

    /// Message nodes strictly below `node`, in document order.
    fn message_descendants(&self, document: &Document, node: NodeId) -> Vec<NodeId> {
        document
            .descendants(node)
            .into_iter()
            .filter(|candidate| self.is_message_node(document, *candidate))
            .collect()
    }
}

/// Selector strings for the chat application, kept for reference next to the
/// hand-written matchers below.
pub struct Selectors;

impl Selectors {
    pub const MESSAGE_TURN: &'static str = r#"[data-testid^="conversation-turn-"]"#;
    pub const SCROLL_CONTAINER: &'static str =
        r#"div[class*="react-scroll-to-bottom"] > div[class*="flex"]"#;
    pub const SCROLL_CONTAINER_ALT: &'static str = "main .overflow-y-auto";
}

const TEST_ID_ATTR: &str = "data-testid";
const TURN_PREFIX: &str = "conversation-turn-";

/// Adapter for the production chat page markup.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChatPageAdapter;

impl ChatPageAdapter {
    fn is_primary_scroll_container(document: &Document, node: NodeId) -> bool {
        if !is_div_with_class_fragment(document, node, "flex") {
            return false;
        }
        document
            .parent(node)
            .is_some_and(|parent| is_div_with_class_fragment(document, parent, "react-scroll-to-bottom"))
    }

    fn is_alternate_scroll_container(document: &Document, node: NodeId) -> bool {
        document.has_class(node, "overflow-y-auto")
            && document
                .ancestors(node)
                .into_iter()
                .any(|ancestor| document.tag_name(ancestor).as_deref() == Some("main"))
    }
}

impl PageAdapter for ChatPageAdapter {
    fn is_message_node(&self, document: &Document, node: NodeId) -> bool {
        document
            .attribute(node, TEST_ID_ATTR)
            .is_some_and(|id| id.starts_with(TURN_PREFIX))
    }

    fn find_scroll_container(&self, document: &Document) -> Option<NodeId> {
        let candidates = document.descendants(document.root());
        candidates
            .iter()
            .copied()
            .find(|node| Self::is_primary_scroll_container(document, *node))
            .or_else(|| {
                candidates
                    .iter()
                    .copied()
                    .find(|node| Self::is_alternate_scroll_container(document, *node))
            })
    }
}

fn is_div_with_class_fragment(document: &Document, node: NodeId, fragment: &str) -> bool {
    document.tag_name(node).as_deref() == Some("div")
        && document
            .attribute(node, "class")
            .is_some_and(|classes| classes.contains(fragment))
}
