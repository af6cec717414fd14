use crate::storage::ConfigStore;
use crate::ui::{LoadMoreBanner, StatusIndicator};
use crate::visibility::VisibilityManager;
use crate::watcher::{MutationWatcher, MutationWatcherConfig, WatcherEvent};
use crate::{BoosterError, Result};
use booster_page::{Document, NodeId, PageAdapter};
use booster_protocol::{
    ExtensionConfig, ExtensionMessage, ExtensionResponse, ExtensionStatus, MUTATION_DEBOUNCE_MS,
};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Instant};

const INITIAL_SCAN_RETRY_MS: u64 = 500;
const RESET_RESCAN_DELAY_MS: u64 = 300;

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Quiet period of the mutation watcher.
    pub debounce: Duration,
    /// Delay between initial scans while the page has no messages yet.
    pub initial_scan_retry: Duration,
    /// Delay before re-scanning after the conversation container changed.
    pub reset_rescan_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(MUTATION_DEBOUNCE_MS),
            initial_scan_retry: Duration::from_millis(INITIAL_SCAN_RETRY_MS),
            reset_rescan_delay: Duration::from_millis(RESET_RESCAN_DELAY_MS),
        }
    }
}

enum SessionCommand {
    Message {
        message: ExtensionMessage,
        reply: oneshot::Sender<ExtensionResponse>,
    },
    LoadMore {
        reply: oneshot::Sender<usize>,
    },
    Teardown {
        done: oneshot::Sender<()>,
    },
}

/// Cheap handle onto a running content session. The session tears itself
/// down once every handle is gone.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Delivers a message as the page would receive it from the background.
    pub async fn send_message(&self, message: ExtensionMessage) -> Result<ExtensionResponse> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Message { message, reply })
            .map_err(|_| BoosterError::SessionClosed)?;
        rx.await.map_err(|_| BoosterError::SessionClosed)
    }

    /// Same as clicking the banner. Returns how many messages were revealed.
    pub async fn load_more(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::LoadMore { reply })
            .map_err(|_| BoosterError::SessionClosed)?;
        rx.await.map_err(|_| BoosterError::SessionClosed)
    }

    pub async fn status(&self) -> Result<ExtensionStatus> {
        match self.send_message(ExtensionMessage::GetStatus).await? {
            ExtensionResponse::Status(status) => Ok(status),
            other => Err(BoosterError::Other(format!(
                "unexpected status reply: {other:?}"
            ))),
        }
    }

    /// Restores the page and stops the session. Idempotent.
    pub async fn teardown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::Teardown { done }).is_err() {
            return Ok(());
        }
        // The loop may already be gone; either way nothing is left running.
        let _ = rx.await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Starts managing `document`: loads the config, attaches the mutation
/// watcher, performs the first scan and spawns the session task. Must be
/// called inside a tokio runtime.
pub async fn bootstrap(
    document: Arc<Document>,
    adapter: Arc<dyn PageAdapter>,
    store: &ConfigStore,
    options: SessionOptions,
) -> SessionHandle {
    info!("bootstrapping content session");
    let config = store.load().await;
    let changes = store.subscribe_changes();

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (click_tx, click_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let mut session = ContentSession::new(document, adapter, options, click_tx);
    session.manager.update_config(config);
    session.watcher.start(event_tx);
    session.initial_scan();

    tokio::spawn(run_session_loop(
        session, command_rx, event_rx, click_rx, changes,
    ));

    SessionHandle {
        commands: command_tx,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanKind {
    Initial,
    AfterReset,
}

#[derive(Debug, Clone, Copy)]
struct PendingScan {
    kind: ScanKind,
    deadline: Instant,
}

/// Per-page state. Lives on the session task; every policy decision for the
/// page happens here, one event at a time.
struct ContentSession {
    document: Arc<Document>,
    adapter: Arc<dyn PageAdapter>,
    options: SessionOptions,
    manager: VisibilityManager,
    watcher: MutationWatcher,
    banner: LoadMoreBanner,
    indicator: StatusIndicator,
    pending_scan: Option<PendingScan>,
}

impl ContentSession {
    fn new(
        document: Arc<Document>,
        adapter: Arc<dyn PageAdapter>,
        options: SessionOptions,
        clicks: mpsc::UnboundedSender<NodeId>,
    ) -> Self {
        let watcher = MutationWatcher::new(
            document.clone(),
            adapter.clone(),
            MutationWatcherConfig {
                debounce: options.debounce,
            },
        );
        Self {
            manager: VisibilityManager::new(document.clone()),
            banner: LoadMoreBanner::new(document.clone(), clicks),
            indicator: StatusIndicator::new(document.clone()),
            watcher,
            document,
            adapter,
            options,
            pending_scan: None,
        }
    }

    fn config(&self) -> ExtensionConfig {
        self.manager.config()
    }

    fn initial_scan(&mut self) {
        let existing = self.watcher.query_all_messages();
        if existing.is_empty() {
            self.schedule_scan(ScanKind::Initial, self.options.initial_scan_retry);
            return;
        }
        self.manager.initialise(&existing);
        self.refresh_ui();
        info!("initial scan: {} messages", existing.len());
    }

    fn schedule_scan(&mut self, kind: ScanKind, delay: Duration) {
        self.pending_scan = Some(PendingScan {
            kind,
            deadline: Instant::now() + delay,
        });
    }

    fn run_scheduled_scan(&mut self) {
        let Some(scan) = self.pending_scan.take() else {
            return;
        };
        match scan.kind {
            ScanKind::Initial => self.initial_scan(),
            ScanKind::AfterReset => {
                let messages = self.watcher.query_all_messages();
                self.manager.initialise(&messages);
                self.refresh_ui();
            }
        }
    }

    fn handle_event(&mut self, event: WatcherEvent) {
        match event {
            WatcherEvent::MessagesAdded(nodes) => {
                self.manager.add_messages(&nodes);
                self.refresh_ui();
            }
            WatcherEvent::MessagesRemoved(nodes) => {
                self.manager.remove_messages(&nodes);
                self.refresh_ui();
            }
            WatcherEvent::ContainerReset => {
                debug!("conversation changed, re-initialising");
                self.banner.hide();
                self.indicator.hide();
                self.schedule_scan(ScanKind::AfterReset, self.options.reset_rescan_delay);
            }
        }
    }

    fn handle_message(&mut self, message: ExtensionMessage) -> ExtensionResponse {
        match message {
            ExtensionMessage::GetStatus => ExtensionResponse::Status(self.manager.status()),
            ExtensionMessage::ConfigUpdated(config) => {
                self.apply_config(config.sanitized());
                ExtensionResponse::NotApplicable
            }
            other => {
                debug!("content session ignores {}", other.kind());
                ExtensionResponse::NotApplicable
            }
        }
    }

    fn apply_config(&mut self, config: ExtensionConfig) {
        self.manager.update_config(config);
        self.refresh_ui();
        debug!("config applied: {config:?}");
    }

    fn load_more(&mut self) -> usize {
        let revealed = self.manager.load_more();
        if revealed > 0 {
            self.refresh_ui();
        }
        revealed
    }

    fn refresh_ui(&mut self) {
        let status = self.manager.status();
        let enabled = self.config().enabled;

        if status.hidden_messages > 0 && enabled {
            let messages = self.adapter.find_message_nodes(&self.document);
            let first_visible = messages
                .iter()
                .copied()
                .find(|node| !self.document.is_display_none(*node));
            let container = messages
                .first()
                .and_then(|node| self.document.parent(*node));
            let placed = match container {
                Some(container) => {
                    self.banner
                        .show(container, first_visible, status.hidden_messages)
                }
                None => Ok(()),
            };
            if let Err(err) = placed {
                warn!("failed to place load more button: {err}");
            }
        } else {
            self.banner.hide();
        }

        if enabled && status.total_messages > 0 {
            if let Err(err) = self
                .indicator
                .show(status.visible_messages, status.total_messages)
            {
                warn!("failed to update status indicator: {err}");
            }
        } else {
            self.indicator.hide();
        }
    }

    fn teardown(&mut self) {
        self.pending_scan = None;
        self.watcher.stop();
        self.manager.destroy();
        self.banner.destroy();
        self.indicator.destroy();
        info!("content session torn down");
    }
}

async fn run_session_loop(
    mut session: ContentSession,
    mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    mut event_rx: mpsc::UnboundedReceiver<WatcherEvent>,
    mut click_rx: mpsc::UnboundedReceiver<NodeId>,
    mut changes: broadcast::Receiver<ExtensionConfig>,
) {
    let mut changes_open = true;

    loop {
        let scan_deadline = session.pending_scan.map(|scan| scan.deadline);

        tokio::select! {
            biased;

            cmd = command_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Message { message, reply }) => {
                        let _ = reply.send(session.handle_message(message));
                    }
                    Some(SessionCommand::LoadMore { reply }) => {
                        let _ = reply.send(session.load_more());
                    }
                    Some(SessionCommand::Teardown { done }) => {
                        session.teardown();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        session.teardown();
                        break;
                    }
                }
            }
            Some(event) = event_rx.recv() => {
                session.handle_event(event);
            }
            Some(_button) = click_rx.recv() => {
                session.load_more();
            }
            change = changes.recv(), if changes_open => {
                match change {
                    Ok(config) => {
                        debug!("config updated from external source");
                        session.apply_config(config);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("missed {skipped} config change(s); catching up");
                    }
                    Err(RecvError::Closed) => {
                        changes_open = false;
                    }
                }
            }
            () = async {
                if let Some(deadline) = scan_deadline {
                    time::sleep_until(deadline).await;
                }
            }, if scan_deadline.is_some() => {
                session.run_scheduled_scan();
            }
        }
    }
}
