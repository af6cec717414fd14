//! # Booster Page
//!
//! The page host the booster runs against: an in-memory element tree with
//! inline styles, attributes, child-list observation and click dispatch, plus
//! the [`PageAdapter`] seam that encapsulates every assumption about the chat
//! application's markup.
//!
//! ```text
//! Document ──MutationRecord──> observers (mutation watcher)
//!    │
//!    └── PageAdapter (is_message_node / find_message_nodes /
//!                     find_scroll_container)
//! ```

mod adapter;
mod document;
mod error;
pub mod layout;

pub use adapter::{ChatPageAdapter, PageAdapter, Selectors};
pub use document::{Document, MutationRecord, NodeId, ObserverId};
pub use error::{PageError, Result};
