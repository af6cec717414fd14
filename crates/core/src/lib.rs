//! # Booster Core
//!
//! Keeps long chat conversations responsive by displaying only the newest
//! messages and hiding the rest behind a "Load more" control.
//!
//! ## Architecture
//!
//! ```text
//! Document ──records──> MutationWatcher ──(150 ms quiet)──> WatcherEvent
//!                                                              │
//!        ConfigStore ──changes──┐                              ▼
//!                               ├────────────────────>  content session
//! Coordinator ──CONFIG_UPDATED──┘  <──GET_STATUS──      │
//!                                                       ├─> VisibilityManager
//!                                                       └─> LoadMoreBanner / StatusIndicator
//! ```
//!
//! Each page gets one session task (see [`bootstrap`]); the watcher runs as
//! its own task and only talks to the session through events.

mod coordinator;
mod error;
mod session;
mod storage;
mod ui;
mod visibility;
mod watcher;

pub use coordinator::{is_target_url, Coordinator, InstallReason, TabChannel, TabInfo};
pub use error::{BoosterError, Result};
pub use session::{bootstrap, SessionHandle, SessionOptions};
pub use storage::{ConfigStore, FileBackend, MemoryBackend, StorageBackend};
pub use ui::{
    find_load_more_button, load_more_label, status_label, LoadMoreBanner, StatusIndicator,
};
pub use visibility::{window_visibility, TrackedMessage, VisibilityManager};
pub use watcher::{
    classify_batch, BatchClassification, MutationWatcher, MutationWatcherConfig, WatcherEvent,
};
