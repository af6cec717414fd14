use booster_page::{Document, MutationRecord, NodeId, ObserverId, PageAdapter};
use booster_protocol::MUTATION_DEBOUNCE_MS;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// More than this many message descendants under a single inserted or
/// removed node is read as the whole conversation being swapped. This is a
/// proxy: a bulk insert of several turns in one wrapper trips it as well.
const RESET_DESCENDANT_THRESHOLD: usize = 1;

/// What a debounced batch of mutations meant for the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    MessagesAdded(Vec<NodeId>),
    MessagesRemoved(Vec<NodeId>),
    ContainerReset,
}

#[derive(Debug, Clone, Copy)]
pub struct MutationWatcherConfig {
    /// Quiet period required before a batch is classified.
    pub debounce: Duration,
}

impl Default for MutationWatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(MUTATION_DEBOUNCE_MS),
        }
    }
}

/// Observes the document for child-list changes and turns debounced batches
/// into [`WatcherEvent`]s.
pub struct MutationWatcher {
    document: Arc<Document>,
    adapter: Arc<dyn PageAdapter>,
    config: MutationWatcherConfig,
    running: Option<RunningWatcher>,
}

struct RunningWatcher {
    observer: ObserverId,
    command_tx: mpsc::UnboundedSender<WatcherCommand>,
    _task: JoinHandle<()>,
}

enum WatcherCommand {
    Shutdown,
}

impl MutationWatcher {
    pub fn new(
        document: Arc<Document>,
        adapter: Arc<dyn PageAdapter>,
        config: MutationWatcherConfig,
    ) -> Self {
        Self {
            document,
            adapter,
            config,
            running: None,
        }
    }

    /// Starts observing and delivering events to `events`. Must be called
    /// inside a tokio runtime. Returns false (and changes nothing) when the
    /// watcher is already running.
    pub fn start(&mut self, events: mpsc::UnboundedSender<WatcherEvent>) -> bool {
        if self.running.is_some() {
            warn!("mutation watcher already running");
            return false;
        }

        let (mutation_tx, mutation_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let observer = self.document.observe(mutation_tx);

        let task = tokio::spawn(run_watch_loop(
            self.document.clone(),
            self.adapter.clone(),
            self.config.debounce,
            mutation_rx,
            command_rx,
            events,
        ));

        self.running = Some(RunningWatcher {
            observer,
            command_tx,
            _task: task,
        });
        debug!("mutation watcher started");
        true
    }

    /// Detaches observation and drops any batch still waiting for its quiet
    /// period. No-op when not running.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        self.document.disconnect(running.observer);
        let _ = running.command_tx.send(WatcherCommand::Shutdown);
        debug!("mutation watcher stopped");
    }

    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn query_all_messages(&self) -> Vec<NodeId> {
        self.adapter.find_message_nodes(&self.document)
    }

    pub fn find_scroll_container(&self) -> Option<NodeId> {
        self.adapter.find_scroll_container(&self.document)
    }
}

impl Drop for MutationWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_watch_loop(
    document: Arc<Document>,
    adapter: Arc<dyn PageAdapter>,
    debounce: Duration,
    mut mutation_rx: mpsc::UnboundedReceiver<MutationRecord>,
    mut command_rx: mpsc::UnboundedReceiver<WatcherCommand>,
    events: mpsc::UnboundedSender<WatcherEvent>,
) {
    let mut debouncer = MutationDebouncer::new(debounce);

    loop {
        let next_deadline = debouncer.deadline();

        tokio::select! {
            biased;

            cmd = command_rx.recv() => {
                match cmd {
                    Some(WatcherCommand::Shutdown) | None => break,
                }
            }
            Some(record) = mutation_rx.recv() => {
                debouncer.record(record, Instant::now());
            }
            () = async {
                if let Some(deadline) = next_deadline {
                    time::sleep_until(deadline).await;
                }
            }, if next_deadline.is_some() => {
                let batch = debouncer.take();
                let classified = classify_batch(&document, adapter.as_ref(), &batch);
                for event in classified.into_events() {
                    if events.send(event).is_err() {
                        debug!("watcher event receiver gone; stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Trailing-edge debounce as an explicit state machine:
/// `Idle → Pending(batch, deadline) → Idle`. Every record arriving while
/// pending pushes the deadline out and joins the batch.
#[derive(Debug)]
struct MutationDebouncer {
    window: Duration,
    phase: DebouncePhase,
}

#[derive(Debug)]
enum DebouncePhase {
    Idle,
    Pending {
        deadline: Instant,
        batch: Vec<MutationRecord>,
    },
}

impl MutationDebouncer {
    const fn new(window: Duration) -> Self {
        Self {
            window,
            phase: DebouncePhase::Idle,
        }
    }

    fn record(&mut self, record: MutationRecord, now: Instant) {
        let deadline = now + self.window;
        if let DebouncePhase::Pending {
            deadline: current,
            batch,
        } = &mut self.phase
        {
            *current = deadline;
            batch.push(record);
            return;
        }
        self.phase = DebouncePhase::Pending {
            deadline,
            batch: vec![record],
        };
    }

    fn deadline(&self) -> Option<Instant> {
        match &self.phase {
            DebouncePhase::Idle => None,
            DebouncePhase::Pending { deadline, .. } => Some(*deadline),
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        match &self.phase {
            DebouncePhase::Idle => 0,
            DebouncePhase::Pending { batch, .. } => batch.len(),
        }
    }

    fn take(&mut self) -> Vec<MutationRecord> {
        match std::mem::replace(&mut self.phase, DebouncePhase::Idle) {
            DebouncePhase::Idle => Vec::new(),
            DebouncePhase::Pending { batch, .. } => batch,
        }
    }
}

/// Message nodes found in one debounced batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchClassification {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub container_reset: bool,
}

impl BatchClassification {
    /// A reset suppresses per-message events; empty lists are dropped.
    pub fn into_events(self) -> Vec<WatcherEvent> {
        if self.container_reset {
            debug!("conversation container changed");
            return vec![WatcherEvent::ContainerReset];
        }
        let mut events = Vec::new();
        if !self.added.is_empty() {
            debug!("{} message turn(s) added", self.added.len());
            events.push(WatcherEvent::MessagesAdded(self.added));
        }
        if !self.removed.is_empty() {
            debug!("{} message turn(s) removed", self.removed.len());
            events.push(WatcherEvent::MessagesRemoved(self.removed));
        }
        events
    }
}

pub fn classify_batch(
    document: &Document,
    adapter: &dyn PageAdapter,
    records: &[MutationRecord],
) -> BatchClassification {
    let mut out = BatchClassification::default();
    for record in records {
        for node in &record.added_nodes {
            out.container_reset |= collect_messages(document, adapter, *node, &mut out.added);
        }
        for node in &record.removed_nodes {
            out.container_reset |= collect_messages(document, adapter, *node, &mut out.removed);
        }
    }
    // A node moved within the page during the window is still present.
    out.removed.retain(|node| !document.is_connected(*node));
    out
}

/// Pushes the message nodes `node` stands for and reports whether it looks
/// like a whole conversation container.
fn collect_messages(
    document: &Document,
    adapter: &dyn PageAdapter,
    node: NodeId,
    into: &mut Vec<NodeId>,
) -> bool {
    if !document.is_element(node) {
        return false;
    }
    let nested = adapter.message_descendants(document, node);
    let looks_like_container = nested.len() > RESET_DESCENDANT_THRESHOLD;
    if adapter.is_message_node(document, node) {
        into.push(node);
    } else {
        into.extend(nested);
    }
    looks_like_container
}

#[cfg(test)]
mod tests {
    use super::*;
    use booster_page::layout::{create_turn, create_wrapper, ChatLayout};
    use booster_page::ChatPageAdapter;
    use pretty_assertions::assert_eq;

    fn record_added(target: NodeId, nodes: Vec<NodeId>) -> MutationRecord {
        MutationRecord {
            target,
            added_nodes: nodes,
            removed_nodes: Vec::new(),
        }
    }

    fn record_removed(target: NodeId, nodes: Vec<NodeId>) -> MutationRecord {
        MutationRecord {
            target,
            added_nodes: Vec::new(),
            removed_nodes: nodes,
        }
    }

    #[test]
    fn debouncer_extends_deadline_and_merges() {
        let mut debouncer = MutationDebouncer::new(Duration::from_millis(150));
        assert_eq!(debouncer.deadline(), None);

        let start = Instant::now();
        let doc = Document::new();
        debouncer.record(record_added(doc.body(), vec![]), start);
        assert_eq!(debouncer.deadline(), Some(start + Duration::from_millis(150)));

        let later = start + Duration::from_millis(100);
        debouncer.record(record_added(doc.body(), vec![]), later);
        assert_eq!(debouncer.deadline(), Some(later + Duration::from_millis(150)));
        assert_eq!(debouncer.pending(), 2);

        assert_eq!(debouncer.take().len(), 2);
        assert_eq!(debouncer.deadline(), None);
        assert_eq!(debouncer.pending(), 0);
    }

    #[test]
    fn direct_turn_insert_is_an_add() {
        let doc = Document::new();
        let turn = create_turn(&doc, 0).unwrap();
        let classified = classify_batch(
            &doc,
            &ChatPageAdapter,
            &[record_added(doc.body(), vec![turn])],
        );
        assert_eq!(classified.added, vec![turn]);
        assert!(!classified.container_reset);
    }

    #[test]
    fn wrapper_with_one_turn_is_an_add() {
        let doc = Document::new();
        let (wrapper, turns) = create_wrapper(&doc, 0, 1).unwrap();
        let classified = classify_batch(
            &doc,
            &ChatPageAdapter,
            &[record_added(doc.body(), vec![wrapper])],
        );
        assert_eq!(classified.added, turns);
        assert!(!classified.container_reset);
        assert_eq!(
            classified.into_events(),
            vec![WatcherEvent::MessagesAdded(turns)]
        );
    }

    #[test]
    fn wrapper_with_two_turns_is_a_reset() {
        let doc = Document::new();
        let (wrapper, _) = create_wrapper(&doc, 0, 2).unwrap();
        let classified = classify_batch(
            &doc,
            &ChatPageAdapter,
            &[record_added(doc.body(), vec![wrapper])],
        );
        assert!(classified.container_reset);
        assert_eq!(classified.into_events(), vec![WatcherEvent::ContainerReset]);
    }

    #[test]
    fn wrapper_with_three_turns_is_a_reset() {
        let doc = Document::new();
        let (wrapper, turns) = create_wrapper(&doc, 0, 3).unwrap();
        let classified = classify_batch(
            &doc,
            &ChatPageAdapter,
            &[record_added(doc.body(), vec![wrapper])],
        );
        assert_eq!(classified.added, turns);
        assert_eq!(classified.into_events(), vec![WatcherEvent::ContainerReset]);
    }

    #[test]
    fn removed_thread_triggers_reset_even_with_adds() {
        let doc = Document::new();
        let mut layout = ChatLayout::build(&doc).unwrap();
        layout.append_turns(&doc, 0, 5).unwrap();
        let old_thread = layout.thread;
        layout.replace_thread(&doc, 0, 1).unwrap();

        let classified = classify_batch(
            &doc,
            &ChatPageAdapter,
            &[
                record_removed(layout.scroll_root, vec![old_thread]),
                record_added(layout.scroll_root, vec![layout.thread]),
            ],
        );
        assert!(classified.container_reset);
        assert_eq!(classified.into_events(), vec![WatcherEvent::ContainerReset]);
    }

    #[test]
    fn text_and_unrelated_nodes_are_skipped() {
        let doc = Document::new();
        let text = doc.create_text("typing...");
        let banner = doc.create_element("div");
        let classified = classify_batch(
            &doc,
            &ChatPageAdapter,
            &[record_added(doc.body(), vec![text, banner])],
        );
        assert_eq!(classified, BatchClassification::default());
        assert!(classified.into_events().is_empty());
    }

    #[test]
    fn adds_and_removes_are_both_emitted() {
        let doc = Document::new();
        let added = create_turn(&doc, 1).unwrap();
        let removed = create_turn(&doc, 0).unwrap();
        let classified = classify_batch(
            &doc,
            &ChatPageAdapter,
            &[
                record_added(doc.body(), vec![added]),
                record_removed(doc.body(), vec![removed]),
            ],
        );
        assert_eq!(
            classified.into_events(),
            vec![
                WatcherEvent::MessagesAdded(vec![added]),
                WatcherEvent::MessagesRemoved(vec![removed]),
            ]
        );
    }

    #[test]
    fn moved_turn_is_not_reported_removed() {
        let doc = Document::new();
        let layout = ChatLayout::build(&doc).unwrap();
        let turns = layout.append_turns(&doc, 0, 2).unwrap();
        let wrapper = doc.create_element("div");
        doc.append_child(layout.thread, wrapper).unwrap();
        doc.append_child(wrapper, turns[0]).unwrap();

        let classified = classify_batch(
            &doc,
            &ChatPageAdapter,
            &[
                record_removed(layout.thread, vec![turns[0]]),
                record_added(layout.thread, vec![wrapper]),
            ],
        );
        assert_eq!(classified.added, vec![turns[0]]);
        assert!(classified.removed.is_empty());
        assert!(!classified.container_reset);
    }

    fn watcher_for(doc: &Arc<Document>) -> MutationWatcher {
        MutationWatcher::new(
            doc.clone(),
            Arc::new(ChatPageAdapter),
            MutationWatcherConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_are_coalesced_into_one_event() {
        let doc = Arc::new(Document::new());
        let layout = ChatLayout::build(&doc).unwrap();
        let mut watcher = watcher_for(&doc);
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(watcher.start(tx));

        let mut turns = layout.append_turns(&doc, 0, 2).unwrap();
        time::sleep(Duration::from_millis(100)).await;
        turns.extend(layout.append_turns(&doc, 2, 1).unwrap());
        time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rx.try_recv().unwrap(), WatcherEvent::MessagesAdded(turns));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_refused() {
        let doc = Arc::new(Document::new());
        let mut watcher = watcher_for(&doc);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(watcher.start(tx.clone()));
        assert!(!watcher.start(tx));
        assert_eq!(doc.observer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drops_pending_batch() {
        let doc = Arc::new(Document::new());
        let layout = ChatLayout::build(&doc).unwrap();
        let mut watcher = watcher_for(&doc);
        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.start(tx);

        layout.append_turns(&doc, 0, 1).unwrap();
        time::sleep(Duration::from_millis(50)).await;
        watcher.stop();
        watcher.stop();
        time::sleep(Duration::from_millis(500)).await;

        assert!(!watcher.is_running());
        assert_eq!(doc.observer_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn queries_go_through_the_adapter() {
        let doc = Arc::new(Document::new());
        let layout = ChatLayout::build(&doc).unwrap();
        let turns = layout.append_turns(&doc, 0, 3).unwrap();
        let watcher = watcher_for(&doc);
        assert_eq!(watcher.query_all_messages(), turns);
        assert_eq!(watcher.find_scroll_container(), Some(layout.thread));
    }
}
