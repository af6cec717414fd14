use booster_core::{bootstrap, ConfigStore, Coordinator, SessionOptions, TabInfo};
use booster_page::layout::ChatLayout;
use booster_page::{ChatPageAdapter, Document};
use booster_protocol::{ExtensionMessage, ExtensionResponse, ExtensionStatus, PartialConfig};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time;

#[tokio::test(start_paused = true)]
async fn popup_round_trip_through_live_session() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ConfigStore::file(temp.path().join("storage.json")));
    let coordinator = Coordinator::new(store.clone());

    let document = Arc::new(Document::new());
    let layout = ChatLayout::build(&document).unwrap();
    layout.append_turns(&document, 0, 30).unwrap();
    let session = bootstrap(
        document.clone(),
        Arc::new(ChatPageAdapter),
        &store,
        SessionOptions::default(),
    )
    .await;
    coordinator
        .register_tab(
            TabInfo {
                id: 7,
                url: "https://chatgpt.com/c/abc".to_string(),
                active: true,
            },
            Arc::new(session.clone()),
        )
        .await;

    assert_eq!(
        coordinator.handle(ExtensionMessage::GetStatus).await,
        ExtensionResponse::Status(ExtensionStatus::new(true, 30, 10))
    );

    let reply = coordinator
        .handle(ExtensionMessage::SetConfig(PartialConfig {
            visible_message_limit: Some(20.0),
            ..PartialConfig::default()
        }))
        .await;
    assert_eq!(reply.config().unwrap().visible_message_limit, 20);
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        coordinator.handle(ExtensionMessage::GetStatus).await,
        ExtensionResponse::Status(ExtensionStatus::new(true, 30, 20))
    );

    let toggled = coordinator.handle(ExtensionMessage::ToggleEnabled).await;
    assert!(!toggled.config().unwrap().enabled);
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        coordinator.handle(ExtensionMessage::GetStatus).await,
        ExtensionResponse::Status(ExtensionStatus::new(false, 30, 30))
    );

    // The file store outlives the coordinator.
    let reopened = ConfigStore::file(temp.path().join("storage.json"));
    let persisted = reopened.load().await;
    assert_eq!(persisted.visible_message_limit, 20);
    assert!(!persisted.enabled);
}

#[tokio::test(start_paused = true)]
async fn torn_down_tab_is_not_applicable() {
    let store = Arc::new(ConfigStore::in_memory());
    let coordinator = Coordinator::new(store.clone());
    let document = Arc::new(Document::new());
    let session = bootstrap(
        document,
        Arc::new(ChatPageAdapter),
        &store,
        SessionOptions::default(),
    )
    .await;
    coordinator
        .register_tab(
            TabInfo {
                id: 1,
                url: "https://chatgpt.com/".to_string(),
                active: true,
            },
            Arc::new(session.clone()),
        )
        .await;

    session.teardown().await.unwrap();
    assert_eq!(
        coordinator.handle(ExtensionMessage::GetStatus).await,
        ExtensionResponse::NotApplicable
    );
    // Broadcasting to the dead tab must not fail the save.
    let reply = coordinator
        .handle(ExtensionMessage::SetConfig(PartialConfig {
            load_more_batch_size: Some(2.4),
            ..PartialConfig::default()
        }))
        .await;
    assert_eq!(reply.config().unwrap().load_more_batch_size, 2);
}
