use crate::Result;
use booster_page::{Document, NodeId};
use booster_protocol::CSS_PREFIX;
use log::debug;
use std::sync::Arc;
use tokio::sync::mpsc;

const FONT_STACK: &str =
    r#"-apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif"#;

pub fn load_more_label(hidden: usize) -> String {
    format!("Load more ({hidden} hidden)")
}

pub fn status_label(visible: usize, total: usize) -> String {
    format!("{visible}/{total} messages")
}

/// The connected "Load more" button, located by its class the way page
/// scripts would find it.
pub fn find_load_more_button(document: &Document) -> Option<NodeId> {
    let class = format!("{CSS_PREFIX}-load-more-btn");
    document
        .descendants(document.root())
        .into_iter()
        .find(|node| document.has_class(*node, &class))
}

fn apply_styles(document: &Document, node: NodeId, styles: &[(&str, &str)]) -> Result<()> {
    for (property, value) in styles {
        document.set_style(node, property, value)?;
    }
    Ok(())
}

/// "Load more" control placed right above the oldest displayed message.
/// The element is built once and moved around on every refresh.
pub struct LoadMoreBanner {
    document: Arc<Document>,
    clicks: mpsc::UnboundedSender<NodeId>,
    wrapper: Option<NodeId>,
    label: Option<NodeId>,
    hidden_count: usize,
}

impl LoadMoreBanner {
    /// Clicks on the button are forwarded to `clicks`.
    pub fn new(document: Arc<Document>, clicks: mpsc::UnboundedSender<NodeId>) -> Self {
        Self {
            document,
            clicks,
            wrapper: None,
            label: None,
            hidden_count: 0,
        }
    }

    /// Inserts the banner before `first_visible` when it is a child of
    /// `anchor_parent`, otherwise at the top of `anchor_parent`.
    pub fn show(
        &mut self,
        anchor_parent: NodeId,
        first_visible: Option<NodeId>,
        hidden_count: usize,
    ) -> Result<()> {
        let wrapper = match self.wrapper {
            Some(wrapper) => wrapper,
            None => self.create_element()?,
        };
        let anchor =
            first_visible.filter(|node| self.document.parent(*node) == Some(anchor_parent));
        self.update(hidden_count)?;
        if self.is_placed(wrapper, anchor_parent, anchor) {
            return Ok(());
        }

        match anchor {
            Some(anchor) => self.document.insert_before(anchor_parent, wrapper, Some(anchor))?,
            None => self.document.prepend(anchor_parent, wrapper)?,
        }
        Ok(())
    }

    /// Relabels the banner without moving it.
    pub fn update(&mut self, hidden_count: usize) -> Result<()> {
        self.hidden_count = hidden_count;
        self.update_label()
    }

    pub fn hide(&self) {
        if let Some(wrapper) = self.wrapper {
            self.document.remove(wrapper);
        }
    }

    pub fn destroy(&mut self) {
        self.hide();
        self.wrapper = None;
        self.label = None;
    }

    pub const fn element(&self) -> Option<NodeId> {
        self.wrapper
    }

    /// The clickable element, if the banner was ever built.
    pub fn button(&self) -> Option<NodeId> {
        let wrapper = self.wrapper?;
        self.document.first_child(wrapper)
    }

    pub fn is_shown(&self) -> bool {
        self.wrapper
            .is_some_and(|wrapper| self.document.is_connected(wrapper))
    }

    fn create_element(&mut self) -> Result<NodeId> {
        let doc = &self.document;

        let wrapper = doc.create_element("div");
        doc.set_attribute(wrapper, "class", &format!("{CSS_PREFIX}-load-more-wrapper"))?;
        doc.set_attribute(wrapper, "role", "banner")?;
        apply_styles(
            doc,
            wrapper,
            &[
                ("display", "flex"),
                ("justify-content", "center"),
                ("align-items", "center"),
                ("padding", "12px 16px"),
                ("margin", "4px 0"),
                ("border-radius", "8px"),
                ("background", "rgba(142, 142, 160, 0.08)"),
            ],
        )?;

        let button = doc.create_element("button");
        doc.set_attribute(button, "class", &format!("{CSS_PREFIX}-load-more-btn"))?;
        doc.set_attribute(button, "type", "button")?;
        doc.set_attribute(button, "aria-label", "Load older messages")?;
        apply_styles(
            doc,
            button,
            &[
                ("cursor", "pointer"),
                ("display", "inline-flex"),
                ("gap", "8px"),
                ("padding", "8px 20px"),
                ("font-size", "13px"),
                ("font-family", FONT_STACK),
                ("color", "var(--text-primary, #d1d5db)"),
            ],
        )?;

        let icon = doc.create_element("span");
        doc.set_attribute(icon, "aria-hidden", "true")?;
        doc.append_child(icon, create_arrow_up_icon(doc)?)?;

        let label = doc.create_element("span");
        doc.set_attribute(label, "class", &format!("{CSS_PREFIX}-load-more-label"))?;

        doc.append_child(button, icon)?;
        doc.append_child(button, label)?;
        doc.add_click_listener(button, self.clicks.clone())?;
        doc.append_child(wrapper, button)?;

        self.wrapper = Some(wrapper);
        self.label = Some(label);
        debug!("load more button created");
        Ok(wrapper)
    }

    fn is_placed(&self, wrapper: NodeId, parent: NodeId, anchor: Option<NodeId>) -> bool {
        let children = self.document.children(parent);
        match anchor {
            Some(anchor) => children.windows(2).any(|pair| pair == [wrapper, anchor]),
            None => children.first() == Some(&wrapper),
        }
    }

    fn update_label(&self) -> Result<()> {
        if let Some(label) = self.label {
            self.document
                .set_text_content(label, &load_more_label(self.hidden_count))?;
        }
        Ok(())
    }
}

fn create_arrow_up_icon(doc: &Document) -> Result<NodeId> {
    let svg = doc.create_element("svg");
    for (name, value) in [
        ("xmlns", "http://www.w3.org/2000/svg"),
        ("width", "16"),
        ("height", "16"),
        ("viewBox", "0 0 24 24"),
        ("fill", "none"),
        ("stroke", "currentColor"),
        ("stroke-width", "2"),
    ] {
        doc.set_attribute(svg, name, value)?;
    }
    for path in ["M12 19V5", "m5 12 7-7 7 7"] {
        let node = doc.create_element("path");
        doc.set_attribute(node, "d", path)?;
        doc.append_child(svg, node)?;
    }
    Ok(svg)
}

/// Small fixed-position readout of how many messages are displayed.
pub struct StatusIndicator {
    document: Arc<Document>,
    container: Option<NodeId>,
    label: Option<NodeId>,
}

impl StatusIndicator {
    pub fn new(document: Arc<Document>) -> Self {
        Self {
            document,
            container: None,
            label: None,
        }
    }

    pub fn show(&mut self, visible: usize, total: usize) -> Result<()> {
        let label = match self.label {
            Some(label) => label,
            None => self.create_element()?,
        };
        self.document
            .set_text_content(label, &status_label(visible, total))?;
        Ok(())
    }

    /// Removes the readout; the next `show` builds a fresh one.
    pub fn hide(&mut self) {
        if let Some(container) = self.container.take() {
            self.document.remove(container);
        }
        self.label = None;
    }

    pub fn destroy(&mut self) {
        self.hide();
    }

    pub const fn element(&self) -> Option<NodeId> {
        self.container
    }

    fn create_element(&mut self) -> Result<NodeId> {
        let doc = &self.document;
        let container = doc.create_element("div");
        doc.set_attribute(container, "class", &format!("{CSS_PREFIX}-status-indicator"))?;
        doc.set_attribute(container, "role", "status")?;
        doc.set_attribute(container, "aria-live", "polite")?;
        apply_styles(
            doc,
            container,
            &[
                ("position", "fixed"),
                ("bottom", "80px"),
                ("right", "20px"),
                ("z-index", "10000"),
                ("padding", "6px 12px"),
                ("font-size", "11px"),
                ("font-family", FONT_STACK),
                ("pointer-events", "none"),
                ("opacity", "0.85"),
            ],
        )?;

        let label = doc.create_element("span");
        doc.set_attribute(label, "class", &format!("{CSS_PREFIX}-status-label"))?;
        doc.append_child(container, label)?;
        doc.append_child(doc.body(), container)?;

        self.container = Some(container);
        self.label = Some(label);
        Ok(label)
    }
}
