use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use stocktake_core::conversation::{
    ConversationService, Disposition, InboundEvent, InboundKind, ServiceSettings,
};
use stocktake_core::flows::ErrorClass;
use stocktake_core::views::UNKNOWN_COMMAND;
use stocktake_core::{
    Action, CategoryTree, ChatId, ContainerId, FormatSpec, GatewayError, InMemoryAuditSink,
    MessageId, MessagingGateway, OutgoingMessage, Row, SectionId, Step, StoreError, TabularStore,
    UserId,
};

const CATALOG: &str = r#"
[[categories]]
name = "Fruit"
items = ["Apples [kg]", "Pears [kg]"]

[[categories]]
name = "Meat"

[[categories.subcategories]]
name = "Beef"
items = ["Steak", "Mince"]
"#;

#[derive(Clone, Debug, PartialEq)]
enum Delivery {
    Sent(MessageId, String),
    Edited(MessageId, String),
    Deleted(MessageId),
    Answered(String, Option<String>),
}

#[derive(Default)]
struct RecordingGateway {
    next_id: AtomicI64,
    fail_sends: AtomicBool,
    log: Mutex<Vec<Delivery>>,
}

impl RecordingGateway {
    fn deliveries(&self) -> Vec<Delivery> {
        self.log.lock().expect("gateway log").clone()
    }

    fn clear(&self) {
        self.log.lock().expect("gateway log").clear();
    }

    fn last_text(&self) -> String {
        self.deliveries()
            .into_iter()
            .rev()
            .find_map(|delivery| match delivery {
                Delivery::Sent(_, text) | Delivery::Edited(_, text) => Some(text),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send_message(
        &self,
        _chat: ChatId,
        message: &OutgoingMessage,
    ) -> Result<MessageId, GatewayError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection reset".to_owned()));
        }
        let id = MessageId(1000 + self.next_id.fetch_add(1, Ordering::SeqCst));
        self.log.lock().expect("gateway log").push(Delivery::Sent(id, message.text.clone()));
        Ok(id)
    }

    async fn edit_message(
        &self,
        _chat: ChatId,
        message_id: MessageId,
        message: &OutgoingMessage,
    ) -> Result<(), GatewayError> {
        self.log
            .lock()
            .expect("gateway log")
            .push(Delivery::Edited(message_id, message.text.clone()));
        Ok(())
    }

    async fn delete_message(
        &self,
        _chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), GatewayError> {
        self.log.lock().expect("gateway log").push(Delivery::Deleted(message_id));
        Ok(())
    }

    async fn answer_pending_action(
        &self,
        action_id: &str,
        text: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.log
            .lock()
            .expect("gateway log")
            .push(Delivery::Answered(action_id.to_owned(), text.map(str::to_owned)));
        Ok(())
    }
}

#[derive(Default)]
struct SheetStore {
    containers: Mutex<HashMap<String, Vec<(String, Vec<Row>)>>>,
    failing_writes: AtomicI64,
}

impl SheetStore {
    fn sections(&self, container: &str) -> Vec<(String, Vec<Row>)> {
        self.containers.lock().expect("store").get(container).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TabularStore for SheetStore {
    async fn find_or_create_container(&self, name: &str) -> Result<ContainerId, StoreError> {
        self.containers.lock().expect("store").entry(name.to_owned()).or_default();
        Ok(ContainerId(name.to_owned()))
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerId>, StoreError> {
        let containers = self.containers.lock().expect("store");
        Ok(containers.contains_key(name).then(|| ContainerId(name.to_owned())))
    }

    async fn list_sections(&self, container: &ContainerId) -> Result<Vec<String>, StoreError> {
        Ok(self.sections(&container.0).into_iter().map(|(name, _)| name).collect())
    }

    async fn create_section(
        &self,
        container: &ContainerId,
        name: &str,
    ) -> Result<SectionId, StoreError> {
        let mut containers = self.containers.lock().expect("store");
        let sections = containers
            .get_mut(&container.0)
            .ok_or_else(|| StoreError::ContainerNotFound(container.0.clone()))?;
        if !sections.iter().any(|(existing, _)| existing == name) {
            sections.push((name.to_owned(), Vec::new()));
        }
        Ok(SectionId(name.to_owned()))
    }

    async fn write_rows(
        &self,
        container: &ContainerId,
        section: &str,
        rows: &[Row],
    ) -> Result<(), StoreError> {
        if self.failing_writes.load(Ordering::SeqCst) > 0 {
            self.failing_writes.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Timeout);
        }
        let mut containers = self.containers.lock().expect("store");
        let target = containers
            .get_mut(&container.0)
            .and_then(|sections| sections.iter_mut().find(|(name, _)| name == section))
            .ok_or_else(|| StoreError::SectionNotFound {
                container: container.0.clone(),
                section: section.to_owned(),
            })?;
        target.1 = rows.to_vec();
        Ok(())
    }

    async fn apply_formatting(
        &self,
        _container: &ContainerId,
        _section: &SectionId,
        _format: &FormatSpec,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

struct Harness {
    service: ConversationService,
    gateway: Arc<RecordingGateway>,
    store: Arc<SheetStore>,
    audit: Arc<InMemoryAuditSink>,
    next_update: AtomicI64,
}

const USER: UserId = UserId(42);
const CHAT: ChatId = ChatId(42);

impl Harness {
    fn new() -> Self {
        let gateway = Arc::new(RecordingGateway::default());
        let store = Arc::new(SheetStore::default());
        let audit = Arc::new(InMemoryAuditSink::default());
        let catalog = Arc::new(CategoryTree::from_toml_str(CATALOG).expect("catalog"));
        let service = ConversationService::new(
            gateway.clone(),
            store.clone(),
            catalog,
            vec!["Central".to_owned(), "North".to_owned()],
            ServiceSettings::default(),
        )
        .with_audit_sink(audit.clone())
        .with_clock(|| NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date"));
        Self { service, gateway, store, audit, next_update: AtomicI64::new(1) }
    }

    fn event(&self, kind: InboundKind) -> InboundEvent {
        let update_id = self.next_update.fetch_add(1, Ordering::SeqCst);
        InboundEvent::new(update_id, USER, CHAT, kind).with_message(MessageId(update_id))
    }

    async fn text(&self, text: &str) -> stocktake_core::HandleOutcome {
        self.service.handle(self.event(InboundKind::Text(text.to_owned()))).await
    }

    async fn press(&self, action: Action) -> stocktake_core::HandleOutcome {
        let event = self.event(InboundKind::Callback(action));
        let action_id = format!("cb-{}", event.update_id);
        self.service.handle(event.with_pending_action(action_id)).await
    }

    /// Walks a fresh user up to the Fruit menu of the Central warehouse.
    async fn browse_fruit(&self) {
        self.browse_fruit_in(0).await;
    }

    async fn browse_fruit_in(&self, warehouse: usize) {
        let _ = self.service.handle(self.event(InboundKind::ContactShared("+100".into()))).await;
        let _ = self.text("Jane Doe").await;
        self.enter_fruit(warehouse).await;
    }

    /// From the warehouse menu to the Fruit menu.
    async fn enter_fruit(&self, warehouse: usize) {
        let _ = self.press(Action::SelectWarehouse(warehouse)).await;
        let _ = self.press(Action::ConfirmWarehouse).await;
        let outcome = self.press(Action::SelectCategory(0)).await;
        assert_eq!(outcome.step, Some(Step::SelectingProduct));
    }
}

#[tokio::test]
async fn full_conversation_submits_one_dated_section() {
    let harness = Harness::new();

    let outcome = harness.text("hello").await;
    assert_eq!(outcome.disposition, Disposition::Rejected(ErrorClass::InvalidTransition));
    assert_eq!(outcome.step, Some(Step::AwaitingPhone));
    assert!(harness.gateway.last_text().contains("share your phone number"));

    harness.browse_fruit().await;
    let outcome = harness.press(Action::SelectItem(0)).await;
    assert_eq!(outcome.step, Some(Step::AwaitingQuantity));
    assert!(harness.gateway.last_text().contains("Apples [kg]"));

    let outcome = harness.text("abc").await;
    assert_eq!(outcome.disposition, Disposition::Rejected(ErrorClass::Validation));
    assert_eq!(outcome.step, Some(Step::AwaitingQuantity));

    harness.gateway.clear();
    let outcome = harness.text("5").await;
    assert_eq!(outcome.disposition, Disposition::Applied);
    assert_eq!(outcome.step, Some(Step::SelectingProduct));

    let deliveries = harness.gateway.deliveries();
    let deleted = deliveries.iter().filter(|d| matches!(d, Delivery::Deleted(_))).count();
    assert_eq!(deleted, 4, "re-prompt, bad reply, prompt and the quantity reply: {deliveries:?}");
    assert!(harness.gateway.last_text().starts_with("✅ Quantity for Apples [kg] saved: 5"));
    assert!(harness.gateway.last_text().contains("Apples [kg] ✓ 5"));

    let outcome = harness.press(Action::Finish).await;
    assert_eq!(outcome.step, Some(Step::ReviewingSummary));
    assert!(harness.gateway.last_text().contains("1. Apples [kg] | 5"));

    let outcome = harness.press(Action::ConfirmSave).await;
    assert_eq!(
        outcome.disposition,
        Disposition::Submitted { section: "Inventory 2026-03-14_1".to_owned() }
    );
    assert_eq!(outcome.step, None);
    assert!(harness.service.sessions().get(USER).await.is_none());

    let sections = harness.store.sections("Central");
    assert_eq!(sections.len(), 1);
    let (name, rows) = &sections[0];
    assert_eq!(name, "Inventory 2026-03-14_1");
    let line = rows.last().expect("inventory line");
    assert_eq!(line[1].display(), "Apples");
    assert_eq!(line[3].display(), "kg");

    assert_eq!(harness.audit.events_of_type("submission.completed").len(), 1);
    assert!(!harness.audit.events_of_type("flow.transition_applied").is_empty());
}

#[tokio::test]
async fn second_submission_on_the_same_day_gets_the_next_number() {
    let harness = Harness::new();
    for quantity in ["1", "2"] {
        let _ = harness.press(Action::StartNew).await;
        harness.browse_fruit().await;
        let _ = harness.press(Action::SelectItem(1)).await;
        let _ = harness.text(quantity).await;
        let _ = harness.press(Action::Finish).await;
        let _ = harness.press(Action::ConfirmSave).await;
    }

    let names: Vec<String> =
        harness.store.sections("Central").into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["Inventory 2026-03-14_1", "Inventory 2026-03-14_2"]);
}

#[tokio::test]
async fn failed_submission_keeps_the_session_and_retry_reuses_the_section() {
    let harness = Harness::new();
    harness.browse_fruit().await;
    let _ = harness.press(Action::SelectItem(0)).await;
    let _ = harness.text("3.5").await;
    let _ = harness.press(Action::Finish).await;

    harness.store.failing_writes.store(1, Ordering::SeqCst);
    let outcome = harness.press(Action::ConfirmSave).await;
    assert_eq!(outcome.disposition, Disposition::SubmissionFailed);
    assert_eq!(outcome.step, Some(Step::ReviewingSummary));
    assert!(harness.gateway.last_text().contains("could not be saved"));

    let retained = harness.service.sessions().get(USER).await.expect("session kept");
    assert_eq!(retained.collected.get("Apples [kg]"), Some(3.5));
    let pending = retained.pending_section.expect("pending section");
    assert_eq!(pending.name, "Inventory 2026-03-14_1");
    assert_eq!(pending.warehouse, "Central");

    let outcome = harness.press(Action::ConfirmSave).await;
    assert_eq!(
        outcome.disposition,
        Disposition::Submitted { section: "Inventory 2026-03-14_1".to_owned() }
    );
    let sections = harness.store.sections("Central");
    assert_eq!(sections.len(), 1);
    assert!(!sections[0].1.is_empty());
}

#[tokio::test]
async fn switching_warehouse_after_a_failure_never_overwrites_saved_inventories() {
    let harness = Harness::new();
    harness.browse_fruit_in(1).await;
    let _ = harness.press(Action::SelectItem(1)).await;
    let _ = harness.text("9").await;
    let _ = harness.press(Action::Finish).await;
    let _ = harness.press(Action::ConfirmSave).await;

    let _ = harness.press(Action::StartNew).await;
    harness.browse_fruit().await;
    let _ = harness.press(Action::SelectItem(0)).await;
    let _ = harness.text("3").await;
    let _ = harness.press(Action::Finish).await;
    harness.store.failing_writes.store(1, Ordering::SeqCst);
    let outcome = harness.press(Action::ConfirmSave).await;
    assert_eq!(outcome.disposition, Disposition::SubmissionFailed);

    for _ in 0..3 {
        let _ = harness.press(Action::Back).await;
    }
    let session = harness.service.sessions().get(USER).await.expect("session");
    assert_eq!(session.step, Step::AwaitingWarehouse);
    assert_eq!(session.pending_section, None);

    harness.enter_fruit(1).await;
    let _ = harness.press(Action::Finish).await;
    let outcome = harness.press(Action::ConfirmSave).await;
    assert_eq!(
        outcome.disposition,
        Disposition::Submitted { section: "Inventory 2026-03-14_2".to_owned() }
    );

    let north = harness.store.sections("North");
    assert_eq!(north.len(), 2);
    let first = north[0].1.last().expect("first inventory line");
    assert_eq!(first[1].display(), "Pears");
    assert_eq!(first[2].display(), "9");
}

#[tokio::test]
async fn failed_menu_after_a_quantity_keeps_the_prompt_on_screen() {
    let harness = Harness::new();
    harness.browse_fruit().await;
    let _ = harness.press(Action::SelectItem(0)).await;
    let before = harness.service.sessions().get(USER).await.expect("session");

    harness.gateway.clear();
    harness.gateway.fail_sends.store(true, Ordering::SeqCst);
    let outcome = harness.text("5").await;

    assert_eq!(outcome.disposition, Disposition::RolledBack);
    assert_eq!(outcome.step, Some(Step::AwaitingQuantity));
    assert!(harness
        .gateway
        .deliveries()
        .iter()
        .all(|delivery| !matches!(delivery, Delivery::Deleted(_))));
    assert_eq!(harness.service.sessions().get(USER).await, Some(before));
}

#[tokio::test]
async fn gateway_failure_rolls_the_transition_back() {
    let harness = Harness::new();
    harness.gateway.fail_sends.store(true, Ordering::SeqCst);

    let outcome =
        harness.service.handle(harness.event(InboundKind::ContactShared("+100".into()))).await;

    assert_eq!(outcome.disposition, Disposition::RolledBack);
    assert_eq!(outcome.step, Some(Step::AwaitingPhone));
    let session = harness.service.sessions().get(USER).await.expect("session");
    assert_eq!(session.phone_number, None);
}

#[tokio::test]
async fn out_of_place_buttons_are_answered_without_touching_the_session() {
    let harness = Harness::new();
    harness.browse_fruit().await;
    let before = harness.service.sessions().get(USER).await.expect("session");

    let outcome = harness.press(Action::ConfirmSave).await;

    assert_eq!(outcome.disposition, Disposition::Rejected(ErrorClass::InvalidTransition));
    assert_eq!(harness.service.sessions().get(USER).await, Some(before));
    let last = harness.gateway.deliveries().pop().expect("answer");
    assert!(matches!(last, Delivery::Answered(_, Some(text)) if text == UNKNOWN_COMMAND));
}

#[tokio::test]
async fn back_walks_up_the_tree_and_out_to_the_warehouse_menu() {
    let harness = Harness::new();
    harness.browse_fruit().await;

    let outcome = harness.press(Action::Back).await;
    assert_eq!(outcome.step, Some(Step::SelectingCategory));

    let outcome = harness.press(Action::Back).await;
    assert_eq!(outcome.step, Some(Step::AwaitingWarehouse));
    let session = harness.service.sessions().get(USER).await.expect("session");
    assert_eq!(session.warehouse, None);
    assert!(harness.gateway.last_text().starts_with("Choose a warehouse"));
}

#[tokio::test]
async fn cancel_discards_everything_and_the_next_message_starts_over() {
    let harness = Harness::new();
    harness.browse_fruit().await;
    let _ = harness.press(Action::Finish).await;

    let outcome = harness.press(Action::Cancel).await;
    assert_eq!(outcome.disposition, Disposition::Cancelled);
    assert_eq!(outcome.step, None);
    assert!(harness.store.sections("Central").is_empty());

    let outcome = harness.text("hello again").await;
    assert_eq!(outcome.step, Some(Step::AwaitingPhone));
}

#[tokio::test]
async fn history_lists_sections_for_the_chosen_warehouse() {
    let harness = Harness::new();

    let outcome = harness.service.handle(harness.event(InboundKind::Command("history".into()))).await;
    assert_eq!(outcome.disposition, Disposition::HistoryShown);
    assert!(harness.gateway.last_text().contains("Choose a warehouse first"));

    harness.browse_fruit().await;
    let _ = harness.service.handle(harness.event(InboundKind::Command("history".into()))).await;
    assert!(harness.gateway.last_text().ends_with("No inventories saved yet."));

    let outcome = harness.service.handle(harness.event(InboundKind::Command("start".into()))).await;
    assert_eq!(outcome.disposition, Disposition::Welcomed);
    assert_eq!(outcome.step, Some(Step::AwaitingPhone));
}
