//! Scripted runs of a content session against an in-memory chat page.

use crate::popup::status_line;
use anyhow::{Context, Result};
use booster_core::{
    bootstrap, find_load_more_button, ConfigStore, Coordinator, SessionOptions, TabInfo,
};
use booster_page::layout::ChatLayout;
use booster_page::{ChatPageAdapter, Document, PageAdapter};
use booster_protocol::{ExtensionMessage, ExtensionStatus, PartialConfig};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SETTLE_MARGIN: Duration = Duration::from_millis(50);
const SIMULATED_TAB_ID: u32 = 1;
const SIMULATED_TAB_URL: &str = "https://chatgpt.com/c/simulated";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Scenario {
    /// Stored config before the page loads.
    #[serde(default)]
    pub config: Option<PartialConfig>,
    /// Turns already on the page at bootstrap.
    #[serde(default)]
    pub initial_messages: usize,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid scenario {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// New turns appended one by one to the thread.
    AppendMessages { count: usize },
    /// New turns arriving inside a single wrapper element.
    AppendWrapper { count: usize },
    RemoveOldest { count: usize },
    /// Navigation to another conversation with `count` turns.
    ReplaceConversation { count: usize },
    Wait { ms: u64 },
    /// Clicks the banner, if there is one.
    LoadMore,
    SetConfig(PartialConfig),
    Toggle,
    Status,
}

impl Step {
    const fn name(&self) -> &'static str {
        match self {
            Self::AppendMessages { .. } => "append_messages",
            Self::AppendWrapper { .. } => "append_wrapper",
            Self::RemoveOldest { .. } => "remove_oldest",
            Self::ReplaceConversation { .. } => "replace_conversation",
            Self::Wait { .. } => "wait",
            Self::LoadMore => "load_more",
            Self::SetConfig(_) => "set_config",
            Self::Toggle => "toggle",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step: usize,
    pub op: &'static str,
    pub status: Option<ExtensionStatus>,
    pub line: String,
}

struct SimulatedPage {
    document: Arc<Document>,
    layout: ChatLayout,
    next_index: usize,
}

impl SimulatedPage {
    fn new(initial: usize) -> Result<Self> {
        let document = Arc::new(Document::new());
        let layout = ChatLayout::build(&document)?;
        layout.append_turns(&document, 0, initial)?;
        Ok(Self {
            document,
            layout,
            next_index: initial,
        })
    }

    fn append(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.layout.append_turns(&self.document, self.next_index, 1)?;
            self.next_index += 1;
        }
        Ok(())
    }

    fn append_wrapper(&mut self, count: usize) -> Result<()> {
        self.layout
            .append_wrapper(&self.document, self.next_index, count)?;
        self.next_index += count;
        Ok(())
    }

    fn remove_oldest(&self, count: usize) {
        let messages = ChatPageAdapter.find_message_nodes(&self.document);
        for node in messages.into_iter().take(count) {
            self.document.remove(node);
        }
    }

    fn replace(&mut self, count: usize) -> Result<()> {
        self.layout.replace_thread(&self.document, 0, count)?;
        self.next_index = count;
        Ok(())
    }
}

/// Runs `scenario` in real time and reports the popup status line after
/// every step.
pub async fn run(scenario: Scenario, options: SessionOptions) -> Result<Vec<StepReport>> {
    let store = Arc::new(ConfigStore::in_memory());
    if let Some(partial) = &scenario.config {
        store.save(partial).await?;
    }
    let coordinator = Coordinator::new(store.clone());

    let mut page = SimulatedPage::new(scenario.initial_messages)?;
    let session = bootstrap(
        page.document.clone(),
        Arc::new(ChatPageAdapter),
        &store,
        options,
    )
    .await;
    coordinator
        .register_tab(
            TabInfo {
                id: SIMULATED_TAB_ID,
                url: SIMULATED_TAB_URL.to_string(),
                active: true,
            },
            Arc::new(session.clone()),
        )
        .await;
    info!(
        "simulating {} step(s) on a page with {} message(s)",
        scenario.steps.len(),
        scenario.initial_messages
    );

    let settle = options.debounce + SETTLE_MARGIN;
    let mut reports = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        debug!("step {index}: {step:?}");
        match step {
            Step::AppendMessages { count } => {
                page.append(*count)?;
                tokio::time::sleep(settle).await;
            }
            Step::AppendWrapper { count } => {
                page.append_wrapper(*count)?;
                tokio::time::sleep(settle).await;
            }
            Step::RemoveOldest { count } => {
                page.remove_oldest(*count);
                tokio::time::sleep(settle).await;
            }
            Step::ReplaceConversation { count } => {
                page.replace(*count)?;
                tokio::time::sleep(settle + options.reset_rescan_delay).await;
            }
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
            Step::LoadMore => {
                match find_load_more_button(&page.document) {
                    Some(button) => {
                        page.document.click(button);
                    }
                    None => info!("no load more button on the page"),
                }
                tokio::time::sleep(SETTLE_MARGIN).await;
            }
            Step::SetConfig(partial) => {
                coordinator
                    .handle(ExtensionMessage::SetConfig(*partial))
                    .await;
                tokio::time::sleep(SETTLE_MARGIN).await;
            }
            Step::Toggle => {
                coordinator.handle(ExtensionMessage::ToggleEnabled).await;
                tokio::time::sleep(SETTLE_MARGIN).await;
            }
            Step::Status => {}
        }

        let status = coordinator
            .handle(ExtensionMessage::GetStatus)
            .await
            .status();
        reports.push(StepReport {
            step: index + 1,
            op: step.name(),
            status,
            line: status_line(status.as_ref()),
        });
    }

    session.teardown().await?;
    Ok(reports)
}
