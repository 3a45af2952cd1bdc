//! Drives one inbound chat event end to end.
//!
//! The service locks the user's session, runs the flow engine on a copy, and
//! dispatches the resulting side effects through the Messaging Gateway and
//! the Tabular Store. The stored session is replaced only after the effects
//! that matter have succeeded; a failed send leaves it untouched.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use crate::catalog::CategoryTree;
use crate::domain::session::{ChatId, MessageId, Session, Step, UiTrail, UserId};
use crate::errors::{ApplicationError, DomainError};
use crate::flows::{
    Action, ErrorClass, FlowAction, FlowContext, FlowEngine, FlowEvent, FlowTransitionError,
    InventoryFlow, Transition,
};
use crate::gateway::{GatewayError, MessagingGateway, OutgoingMessage, TabularStore};
use crate::listing::ListingCache;
use crate::session_store::{SessionGuard, SessionStore};
use crate::submission::{assemble, InventorySubmitter};
use crate::views;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundKind {
    Command(String),
    Callback(Action),
    Text(String),
    ContactShared(String),
}

impl InboundKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::Callback(_) => "callback",
            Self::Text(_) => "text",
            Self::ContactShared(_) => "contact",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub update_id: i64,
    pub user_id: UserId,
    pub chat_id: ChatId,
    /// The user's own message, when the event carries one.
    pub message_id: Option<MessageId>,
    /// Callback acknowledgement handle for button presses.
    pub pending_action: Option<String>,
    pub kind: InboundKind,
}

impl InboundEvent {
    pub fn new(update_id: i64, user_id: UserId, chat_id: ChatId, kind: InboundKind) -> Self {
        Self { update_id, user_id, chat_id, message_id: None, pending_action: None, kind }
    }

    pub fn with_message(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_pending_action(mut self, action_id: impl Into<String>) -> Self {
        self.pending_action = Some(action_id.into());
        self
    }

    pub fn correlation_id(&self) -> String {
        format!("upd-{}", self.update_id)
    }

    fn is_callback(&self) -> bool {
        matches!(self.kind, InboundKind::Callback(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    Rejected(ErrorClass),
    RolledBack,
    Submitted { section: String },
    SubmissionFailed,
    Cancelled,
    Welcomed,
    HistoryShown,
    UnknownCommand,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandleOutcome {
    pub disposition: Disposition,
    /// Step of the stored session after handling; `None` once it is deleted.
    pub step: Option<Step>,
}

#[derive(Clone, Copy, Debug)]
pub struct ServiceSettings {
    pub store_timeout: Duration,
    pub gateway_timeout: Duration,
    pub listing_ttl: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(30),
            gateway_timeout: Duration::from_secs(15),
            listing_ttl: Duration::from_secs(300),
        }
    }
}

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct ConversationService {
    gateway: Arc<dyn MessagingGateway>,
    store: Arc<dyn TabularStore>,
    catalog: Arc<CategoryTree>,
    warehouses: Vec<String>,
    sessions: SessionStore,
    submitter: InventorySubmitter,
    history: ListingCache,
    engine: FlowEngine<InventoryFlow>,
    audit: Arc<dyn AuditSink>,
    today: Clock,
    gateway_timeout: Duration,
}

struct Handled {
    disposition: Disposition,
    answer: Option<String>,
}

impl Handled {
    fn new(disposition: Disposition) -> Self {
        Self { disposition, answer: None }
    }

    fn answered(disposition: Disposition, answer: impl Into<String>) -> Self {
        Self { disposition, answer: Some(answer.into()) }
    }
}

impl ConversationService {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        store: Arc<dyn TabularStore>,
        catalog: Arc<CategoryTree>,
        warehouses: Vec<String>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            gateway,
            submitter: InventorySubmitter::new(Arc::clone(&store), settings.store_timeout),
            store,
            catalog,
            warehouses,
            sessions: SessionStore::new(),
            history: ListingCache::new(settings.listing_ttl),
            engine: FlowEngine::default(),
            audit: Arc::new(TracingAuditSink),
            today: Arc::new(|| Local::now().date_naive()),
            gateway_timeout: settings.gateway_timeout,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock<F>(mut self, today: F) -> Self
    where
        F: Fn() -> NaiveDate + Send + Sync + 'static,
    {
        self.today = Arc::new(today);
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handle(&self, event: InboundEvent) -> HandleOutcome {
        let correlation_id = event.correlation_id();
        info!(
            event_name = "ingress.event_received",
            correlation_id = %correlation_id,
            user_id = event.user_id.0,
            kind = event.kind.name(),
            "inbound event received"
        );

        let mut guard = self.sessions.acquire(event.user_id).await;
        let handled = match &event.kind {
            InboundKind::Command(name) => self.handle_command(&mut guard, &event, name).await,
            InboundKind::Callback(action) => {
                self.handle_flow(&mut guard, &event, FlowEvent::Action(action.clone())).await
            }
            InboundKind::Text(text) => {
                self.handle_flow(&mut guard, &event, FlowEvent::TextEntered(text.clone())).await
            }
            InboundKind::ContactShared(phone) => {
                self.handle_flow(&mut guard, &event, FlowEvent::PhoneShared(phone.clone())).await
            }
        };

        if let Some(action_id) = &event.pending_action {
            let answer = self.gateway.answer_pending_action(action_id, handled.answer.as_deref());
            if let Err(error) = self.bounded(answer).await {
                warn!(
                    event_name = "ingress.callback_answer_failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "could not acknowledge callback"
                );
            }
        }

        let step = guard.get().map(|session| session.step);
        debug!(
            event_name = "ingress.event_handled",
            correlation_id = %correlation_id,
            disposition = ?handled.disposition,
            step = step.map(|step| step.as_str()),
            "inbound event handled"
        );
        HandleOutcome { disposition: handled.disposition, step }
    }

    async fn handle_command(
        &self,
        guard: &mut SessionGuard,
        event: &InboundEvent,
        name: &str,
    ) -> Handled {
        match name {
            "start" => {
                let mut session = Session::new(event.user_id);
                match self.present(event.chat_id, &mut session.ui, &views::welcome(), false).await
                {
                    Ok(()) => {
                        guard.put(session);
                        Handled::new(Disposition::Welcomed)
                    }
                    Err(error) => self.rolled_back(event, &error),
                }
            }
            "history" => {
                let message = match guard.get().and_then(|session| session.warehouse.clone()) {
                    Some(warehouse) => {
                        match self.history.sections(&warehouse, self.store.as_ref()).await {
                            Ok(sections) => views::history(&warehouse, &sections),
                            Err(error) => {
                                warn!(
                                    event_name = "listing.history_failed",
                                    correlation_id = %event.correlation_id(),
                                    error = %error,
                                    "history listing unavailable"
                                );
                                views::history_unavailable()
                            }
                        }
                    }
                    None => views::history_requires_warehouse(),
                };
                self.notify(event, &message).await;
                Handled::new(Disposition::HistoryShown)
            }
            _ => {
                self.notify(event, &views::unknown_command()).await;
                Handled::new(Disposition::UnknownCommand)
            }
        }
    }

    async fn handle_flow(
        &self,
        guard: &mut SessionGuard,
        event: &InboundEvent,
        flow_event: FlowEvent,
    ) -> Handled {
        let current = guard.get_or_create().clone();
        let context = FlowContext {
            catalog: &self.catalog,
            warehouses: &self.warehouses,
            today: (self.today)(),
        };
        let audit = AuditContext::new(
            Some(event.user_id),
            Some(event.chat_id),
            event.correlation_id(),
            "conversation",
        );

        match self.engine.apply_with_audit(
            &current,
            &flow_event,
            &context,
            self.audit.as_ref(),
            &audit,
        ) {
            Ok(transition) => self.dispatch(guard, event, current, transition, &audit).await,
            Err(error) => self.reject(guard, event, &current, error).await,
        }
    }

    async fn reject(
        &self,
        guard: &mut SessionGuard,
        event: &InboundEvent,
        current: &Session,
        error: FlowTransitionError,
    ) -> Handled {
        let class = error.class();
        let correlation_id = event.correlation_id();
        match class {
            ErrorClass::Validation => {
                debug!(
                    event_name = "flow.validation_failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "re-prompting in the same step"
                );
                let prompt = match error {
                    FlowTransitionError::InvalidQuantity { .. } => views::invalid_quantity(),
                    FlowTransitionError::EmptyName => views::empty_name(),
                    _ => views::contact_request(),
                };
                let sent = self.send(event.chat_id, &prompt).await;
                if current.step == Step::AwaitingQuantity {
                    let ui = &mut guard.get_or_create().ui;
                    ui.stale_messages.extend(event.message_id);
                    ui.stale_messages.extend(sent);
                }
                Handled::new(Disposition::Rejected(class))
            }
            ErrorClass::NotFound => {
                let interface = ApplicationError::from(DomainError::from(error.clone()))
                    .into_interface(correlation_id.clone());
                warn!(
                    event_name = "flow.lookup_failed",
                    correlation_id = %correlation_id,
                    step = current.step.as_str(),
                    error = %error,
                    "transition aborted"
                );
                self.notify(event, &views::failure(interface.user_message())).await;
                Handled::new(Disposition::Rejected(class))
            }
            ErrorClass::InvalidTransition => {
                debug!(
                    event_name = "flow.transition_ignored",
                    correlation_id = %correlation_id,
                    step = current.step.as_str(),
                    error = %error,
                    "event does not apply to the current step"
                );
                if current.step == Step::AwaitingPhone && !event.is_callback() {
                    let _ = self.send(event.chat_id, &views::contact_request()).await;
                    return Handled::new(Disposition::Rejected(class));
                }
                if event.is_callback() {
                    return Handled::answered(
                        Disposition::Rejected(class),
                        views::UNKNOWN_COMMAND,
                    );
                }
                self.notify(event, &views::unknown_command()).await;
                Handled::new(Disposition::Rejected(class))
            }
        }
    }

    async fn dispatch(
        &self,
        guard: &mut SessionGuard,
        event: &InboundEvent,
        previous: Session,
        transition: Transition,
        audit: &AuditContext,
    ) -> Handled {
        let Transition { session: mut next, outcome } = transition;
        let prefer_edit = event.is_callback();
        let mut header: Option<String> = None;
        let mut superseded: Vec<MessageId> = Vec::new();

        for action in &outcome.actions {
            let message = match action {
                FlowAction::NotifyUnknownCommand => {
                    if event.is_callback() {
                        return Handled::answered(
                            Disposition::UnknownCommand,
                            views::UNKNOWN_COMMAND,
                        );
                    }
                    self.notify(event, &views::unknown_command()).await;
                    return Handled::new(Disposition::UnknownCommand);
                }
                FlowAction::SubmitInventory => {
                    return self.submit(guard, event, previous, next, audit).await;
                }
                FlowAction::DiscardSession => {
                    guard.delete();
                    let cancelled = views::cancelled();
                    let _ =
                        self.present(event.chat_id, &mut next.ui, &cancelled, prefer_edit).await;
                    info!(
                        event_name = "flow.session_cancelled",
                        correlation_id = %audit.correlation_id,
                        user_id = event.user_id.0,
                        "session discarded"
                    );
                    return Handled::new(Disposition::Cancelled);
                }
                FlowAction::AcknowledgeQuantity { product, quantity } => {
                    header = Some(views::quantity_saved(product, *quantity));
                    superseded.extend(take_quantity_prompt(event, &mut next.ui));
                    continue;
                }
                FlowAction::RequestContact => views::contact_request(),
                FlowAction::PromptName => views::name_prompt(),
                FlowAction::ShowWarehouseMenu => views::warehouse_menu(&self.warehouses),
                FlowAction::AskWarehouseConfirmation { warehouse } => {
                    views::warehouse_confirmation(warehouse)
                }
                FlowAction::ShowCategoryMenu => {
                    match views::category_menu(&self.catalog, &next, header.as_deref()) {
                        Ok(message) => message,
                        Err(error) => {
                            return self
                                .reject(guard, event, &previous, FlowTransitionError::from(error))
                                .await;
                        }
                    }
                }
                FlowAction::PromptQuantity { product } => views::quantity_prompt(product),
                FlowAction::ShowSummary => views::summary(&next),
            };

            // Reply keyboards cannot be attached by editing an inline message.
            let editable = prefer_edit && message.menu().is_some();
            let presented = self.present(event.chat_id, &mut next.ui, &message, editable).await;
            if let Err(error) = presented {
                return self.rolled_back(event, &error);
            }
        }

        // Superseded messages go only after everything above was delivered.
        for message_id in superseded {
            self.delete(event.chat_id, message_id).await;
        }
        guard.put(next);
        Handled::new(Disposition::Applied)
    }

    async fn submit(
        &self,
        guard: &mut SessionGuard,
        event: &InboundEvent,
        previous: Session,
        mut finished: Session,
        audit: &AuditContext,
    ) -> Handled {
        let record = match assemble(&finished) {
            Ok(record) => record,
            Err(error) => {
                error!(
                    event_name = "submission.assembly_failed",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "finished session is incomplete"
                );
                let interface = ApplicationError::from(DomainError::InvariantViolation(
                    error.to_string(),
                ))
                .into_interface(audit.correlation_id.clone());
                self.notify(event, &views::failure(interface.user_message())).await;
                return Handled::new(Disposition::SubmissionFailed);
            }
        };

        match self.submitter.submit(&record, previous.pending_section.as_ref()).await {
            Ok(receipt) => {
                self.history.invalidate(&record.warehouse).await;
                guard.delete();
                self.audit.emit(
                    AuditEvent::new(
                        audit,
                        "submission.completed",
                        AuditCategory::Submission,
                        AuditOutcome::Success,
                    )
                    .with_metadata("warehouse", record.warehouse.clone())
                    .with_metadata("section", receipt.section_name.clone())
                    .with_metadata("lines", record.lines.len().to_string()),
                );
                let message = views::submitted(&finished, &receipt.section_name);
                if let Err(error) =
                    self.present(event.chat_id, &mut finished.ui, &message, true).await
                {
                    warn!(
                        event_name = "submission.confirmation_failed",
                        correlation_id = %audit.correlation_id,
                        error = %error,
                        "inventory saved but confirmation not delivered"
                    );
                }
                Handled::answered(
                    Disposition::Submitted { section: receipt.section_name },
                    "✅ Inventory saved",
                )
            }
            Err(failure) => {
                error!(
                    event_name = "submission.failed",
                    correlation_id = %audit.correlation_id,
                    stage = failure.stage.as_str(),
                    error = %failure,
                    "inventory submission failed; session retained"
                );
                self.audit.emit(
                    AuditEvent::new(
                        audit,
                        "submission.failed",
                        AuditCategory::Submission,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("stage", failure.stage.as_str())
                    .with_metadata("error", failure.to_string()),
                );
                let mut retained = previous;
                retained.pending_section = failure.section.clone();
                let _ = self
                    .present(event.chat_id, &mut retained.ui, &views::submission_failed(), true)
                    .await;
                guard.put(retained);
                Handled::new(Disposition::SubmissionFailed)
            }
        }
    }

    /// Edits the current menu in place when asked to, otherwise sends a new
    /// message. A failed edit falls back to sending.
    async fn present(
        &self,
        chat: ChatId,
        ui: &mut UiTrail,
        message: &OutgoingMessage,
        prefer_edit: bool,
    ) -> Result<(), GatewayError> {
        if prefer_edit {
            if let Some(menu_id) = ui.menu_message {
                match self.bounded(self.gateway.edit_message(chat, menu_id, message)).await {
                    Ok(()) => return Ok(()),
                    Err(error) => warn!(
                        event_name = "gateway.edit_failed",
                        message_id = menu_id.0,
                        error = %error,
                        "falling back to a new message"
                    ),
                }
            }
        }

        let message_id = self.bounded(self.gateway.send_message(chat, message)).await?;
        if message.menu().is_some() {
            ui.menu_message = Some(message_id);
        }
        Ok(())
    }

    async fn send(&self, chat: ChatId, message: &OutgoingMessage) -> Option<MessageId> {
        match self.bounded(self.gateway.send_message(chat, message)).await {
            Ok(message_id) => Some(message_id),
            Err(error) => {
                warn!(event_name = "gateway.send_failed", error = %error, "message not delivered");
                None
            }
        }
    }

    async fn delete(&self, chat: ChatId, message_id: MessageId) {
        if let Err(error) = self.bounded(self.gateway.delete_message(chat, message_id)).await {
            warn!(
                event_name = "gateway.delete_failed",
                message_id = message_id.0,
                error = %error,
                "stale message left in chat"
            );
        }
    }

    /// Sends a standalone notice; delivery failures are only logged.
    async fn notify(&self, event: &InboundEvent, message: &OutgoingMessage) {
        let _ = self.send(event.chat_id, message).await;
    }

    fn rolled_back(&self, event: &InboundEvent, error: &GatewayError) -> Handled {
        error!(
            event_name = "flow.transition_rolled_back",
            correlation_id = %event.correlation_id(),
            user_id = event.user_id.0,
            error = %error,
            "gateway failure; session left unchanged"
        );
        let interface =
            ApplicationError::from(error.clone()).into_interface(event.correlation_id());
        Handled::answered(Disposition::RolledBack, interface.user_message())
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        tokio::time::timeout(self.gateway_timeout, call).await.map_err(|_| GatewayError::Timeout)?
    }
}

/// The quantity prompt, the user's reply and any re-prompts. Taking them off
/// the trail makes the next menu a fresh message.
fn take_quantity_prompt(event: &InboundEvent, ui: &mut UiTrail) -> Vec<MessageId> {
    ui.stale_messages.drain(..).chain(ui.menu_message.take()).chain(event.message_id).collect()
}
