//! Builders reproducing the chat application's conversation markup:
//!
//! ```text
//! body
//! └── main
//!     └── div.react-scroll-to-bottom--css-xyz      (scroll root)
//!         └── div.flex.flex-col.text-sm            (thread)
//!             ├── article[data-testid=conversation-turn-0]
//!             └── ...
//! ```

use crate::{Document, NodeId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatLayout {
    pub main: NodeId,
    pub scroll_root: NodeId,
    pub thread: NodeId,
}

impl ChatLayout {
    /// Builds the skeleton detached and attaches it to `body` in one step.
    pub fn build(document: &Document) -> Result<Self> {
        let main = document.create_element("main");
        let scroll_root = document.create_element("div");
        document.set_attribute(scroll_root, "class", "react-scroll-to-bottom--css-ikyem")?;
        let thread = new_thread(document)?;
        document.append_child(scroll_root, thread)?;
        document.append_child(main, scroll_root)?;
        document.append_child(document.body(), main)?;
        Ok(Self {
            main,
            scroll_root,
            thread,
        })
    }

    /// Appends `count` turns numbered from `first_index`, one insertion each.
    pub fn append_turns(
        &self,
        document: &Document,
        first_index: usize,
        count: usize,
    ) -> Result<Vec<NodeId>> {
        let mut turns = Vec::with_capacity(count);
        for index in first_index..first_index + count {
            let turn = create_turn(document, index)?;
            document.append_child(self.thread, turn)?;
            turns.push(turn);
        }
        Ok(turns)
    }

    /// Appends a single wrapper element holding `count` turns.
    pub fn append_wrapper(
        &self,
        document: &Document,
        first_index: usize,
        count: usize,
    ) -> Result<(NodeId, Vec<NodeId>)> {
        let (wrapper, turns) = create_wrapper(document, first_index, count)?;
        document.append_child(self.thread, wrapper)?;
        Ok((wrapper, turns))
    }

    /// Swaps the whole thread for a fresh one holding `count` turns, the way
    /// the application re-renders on conversation navigation.
    pub fn replace_thread(
        &mut self,
        document: &Document,
        first_index: usize,
        count: usize,
    ) -> Result<Vec<NodeId>> {
        let thread = new_thread(document)?;
        let mut turns = Vec::with_capacity(count);
        for index in first_index..first_index + count {
            let turn = create_turn(document, index)?;
            document.append_child(thread, turn)?;
            turns.push(turn);
        }
        document.remove(self.thread);
        document.append_child(self.scroll_root, thread)?;
        self.thread = thread;
        Ok(turns)
    }
}

fn new_thread(document: &Document) -> Result<NodeId> {
    let thread = document.create_element("div");
    document.set_attribute(thread, "class", "flex flex-col text-sm")?;
    Ok(thread)
}

/// A detached conversation turn with some body text.
pub fn create_turn(document: &Document, index: usize) -> Result<NodeId> {
    let turn = document.create_element("article");
    document.set_attribute(turn, "data-testid", &format!("conversation-turn-{index}"))?;
    let body = document.create_element("div");
    document.set_text_content(body, &format!("message {index}"))?;
    document.append_child(turn, body)?;
    Ok(turn)
}

/// A detached `div` wrapping `count` turns.
pub fn create_wrapper(
    document: &Document,
    first_index: usize,
    count: usize,
) -> Result<(NodeId, Vec<NodeId>)> {
    let wrapper = document.create_element("div");
    let mut turns = Vec::with_capacity(count);
    for index in first_index..first_index + count {
        let turn = create_turn(document, index)?;
        document.append_child(wrapper, turn)?;
        turns.push(turn);
    }
    Ok((wrapper, turns))
}
