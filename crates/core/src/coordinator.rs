use crate::session::SessionHandle;
use crate::storage::ConfigStore;
use crate::Result;
use async_trait::async_trait;
use booster_protocol::{
    ExtensionConfig, ExtensionMessage, ExtensionResponse, PartialConfig, TARGET_HOST,
};
use log::{debug, error, info};
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Request/response path from the coordinator into one page.
#[async_trait]
pub trait TabChannel: Send + Sync {
    async fn send(&self, message: ExtensionMessage) -> Result<ExtensionResponse>;
}

#[async_trait]
impl TabChannel for SessionHandle {
    async fn send(&self, message: ExtensionMessage) -> Result<ExtensionResponse> {
        self.send_message(message).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: u32,
    pub url: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update,
}

struct RegisteredTab {
    info: TabInfo,
    channel: Arc<dyn TabChannel>,
}

/// Whether a page at `url` runs a content session: http(s) on the chat host.
pub fn is_target_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|parsed| {
        matches!(parsed.scheme(), "http" | "https") && parsed.host_str() == Some(TARGET_HOST)
    })
}

/// Background side: owns config writes, fans `CONFIG_UPDATED` out to pages
/// and routes status requests to the active page.
pub struct Coordinator {
    store: Arc<ConfigStore>,
    tabs: RwLock<Vec<RegisteredTab>>,
}

impl Coordinator {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            store,
            tabs: RwLock::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Registers (or replaces) a tab. Registering an active tab deactivates
    /// the others.
    pub async fn register_tab(&self, info: TabInfo, channel: Arc<dyn TabChannel>) {
        let mut tabs = self.tabs.write().await;
        tabs.retain(|tab| tab.info.id != info.id);
        if info.active {
            for tab in tabs.iter_mut() {
                tab.info.active = false;
            }
        }
        debug!("tab {} registered ({})", info.id, info.url);
        tabs.push(RegisteredTab { info, channel });
    }

    pub async fn unregister_tab(&self, id: u32) -> bool {
        let mut tabs = self.tabs.write().await;
        let before = tabs.len();
        tabs.retain(|tab| tab.info.id != id);
        tabs.len() != before
    }

    /// Returns false when no tab has `id`; nothing changes in that case.
    pub async fn set_active_tab(&self, id: u32) -> bool {
        let mut tabs = self.tabs.write().await;
        if !tabs.iter().any(|tab| tab.info.id == id) {
            return false;
        }
        for tab in tabs.iter_mut() {
            tab.info.active = tab.info.id == id;
        }
        true
    }

    pub async fn tabs(&self) -> Vec<TabInfo> {
        self.tabs
            .read()
            .await
            .iter()
            .map(|tab| tab.info.clone())
            .collect()
    }

    pub async fn on_installed(&self, reason: InstallReason) -> ExtensionConfig {
        let config = self.store.load().await;
        match reason {
            InstallReason::Install => info!("extension installed, config initialised: {config:?}"),
            InstallReason::Update => info!("extension updated"),
        }
        config
    }

    /// Answers a raw JSON message; anything that does not decode is not
    /// applicable.
    pub async fn handle_json(&self, raw: &str) -> ExtensionResponse {
        match ExtensionMessage::from_json(raw) {
            Ok(message) => self.handle(message).await,
            Err(err) => {
                debug!("{err:#}");
                ExtensionResponse::NotApplicable
            }
        }
    }

    pub async fn handle(&self, message: ExtensionMessage) -> ExtensionResponse {
        match message {
            ExtensionMessage::GetConfig => ExtensionResponse::Config(self.store.load().await),
            ExtensionMessage::SetConfig(partial) => self.save_and_broadcast(&partial).await,
            ExtensionMessage::ToggleEnabled => {
                let current = self.store.load().await;
                let partial = PartialConfig {
                    enabled: Some(!current.enabled),
                    ..PartialConfig::default()
                };
                self.save_and_broadcast(&partial).await
            }
            ExtensionMessage::GetStatus => self.forward_to_active_tab(message).await,
            ExtensionMessage::ConfigUpdated(_) | ExtensionMessage::StatusResponse(_) => {
                ExtensionResponse::NotApplicable
            }
        }
    }

    async fn save_and_broadcast(&self, partial: &PartialConfig) -> ExtensionResponse {
        match self.store.save(partial).await {
            Ok(updated) => {
                self.broadcast(ExtensionMessage::ConfigUpdated(updated)).await;
                ExtensionResponse::Config(updated)
            }
            Err(err) => {
                error!("message handler error: {err}");
                ExtensionResponse::NotApplicable
            }
        }
    }

    /// Delivers to every target tab. Tabs that fail to answer are skipped.
    async fn broadcast(&self, message: ExtensionMessage) {
        let targets: Vec<(u32, Arc<dyn TabChannel>)> = self
            .tabs
            .read()
            .await
            .iter()
            .filter(|tab| is_target_url(&tab.info.url))
            .map(|tab| (tab.info.id, tab.channel.clone()))
            .collect();

        for (id, channel) in targets {
            if let Err(err) = channel.send(message.clone()).await {
                debug!("tab {id} did not take {}: {err}", message.kind());
            }
        }
    }

    async fn forward_to_active_tab(&self, message: ExtensionMessage) -> ExtensionResponse {
        let active = self
            .tabs
            .read()
            .await
            .iter()
            .find(|tab| tab.info.active && is_target_url(&tab.info.url))
            .map(|tab| tab.channel.clone());

        let Some(channel) = active else {
            return ExtensionResponse::NotApplicable;
        };
        match channel.send(message).await {
            Ok(response @ ExtensionResponse::Status(_)) => response,
            Ok(_) => ExtensionResponse::NotApplicable,
            Err(err) => {
                debug!("active tab did not answer: {err}");
                ExtensionResponse::NotApplicable
            }
        }
    }
}
