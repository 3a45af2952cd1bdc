use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use stocktake_core::conversation::{ConversationService, HandleOutcome, InboundEvent};

use crate::updates::{Update, UpdateKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl EventContext {
    pub fn for_update(update: &Update) -> Self {
        Self { correlation_id: format!("upd-{}", update.update_id) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed(HandleOutcome),
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("update {update_id} has no sender or chat")]
    Malformed { update_id: i64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

/// Entry point of the conversation core as seen from the transport.
#[async_trait]
pub trait ConversationPort: Send + Sync {
    async fn handle(&self, event: InboundEvent) -> HandleOutcome;
}

#[async_trait]
impl ConversationPort for ConversationService {
    async fn handle(&self, event: InboundEvent) -> HandleOutcome {
        ConversationService::handle(self, event).await
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn kind(&self) -> UpdateKind;
    async fn handle(
        &self,
        update: &Update,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<UpdateKind, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        update: &Update,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&update.kind()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(update, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Routes commands, free text, shared contacts and button presses to the
/// conversation. Unsupported updates stay unhandled.
pub fn conversation_dispatcher(port: Arc<dyn ConversationPort>) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    for kind in [UpdateKind::Command, UpdateKind::Text, UpdateKind::Contact, UpdateKind::Callback] {
        dispatcher.register(ConversationHandler::new(kind, Arc::clone(&port)));
    }
    dispatcher
}

pub struct ConversationHandler {
    kind: UpdateKind,
    port: Arc<dyn ConversationPort>,
}

impl ConversationHandler {
    pub fn new(kind: UpdateKind, port: Arc<dyn ConversationPort>) -> Self {
        Self { kind, port }
    }
}

#[async_trait]
impl EventHandler for ConversationHandler {
    fn kind(&self) -> UpdateKind {
        self.kind
    }

    async fn handle(
        &self,
        update: &Update,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        if update.kind() != self.kind {
            return Ok(HandlerResult::Ignored);
        }
        let event = update
            .clone()
            .into_inbound()
            .ok_or(EventHandlerError::Malformed { update_id: update.update_id })?;
        Ok(HandlerResult::Processed(self.port.handle(event).await))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use stocktake_core::conversation::{Disposition, HandleOutcome, InboundEvent, InboundKind};

    use super::{
        conversation_dispatcher, ConversationPort, DispatchError, EventContext,
        EventHandlerError, HandlerResult,
    };
    use crate::updates::Update;

    #[derive(Default)]
    struct RecordingPort {
        events: Mutex<Vec<InboundEvent>>,
    }

    #[async_trait]
    impl ConversationPort for RecordingPort {
        async fn handle(&self, event: InboundEvent) -> HandleOutcome {
            self.events.lock().expect("events").push(event);
            HandleOutcome { disposition: Disposition::Applied, step: None }
        }
    }

    fn update(raw: &str) -> Update {
        serde_json::from_str(raw).expect("update json")
    }

    #[tokio::test]
    async fn supported_updates_reach_the_conversation() {
        let port = Arc::new(RecordingPort::default());
        let dispatcher = conversation_dispatcher(port.clone());
        assert_eq!(dispatcher.handler_count(), 4);

        let text = update(
            r#"{"update_id": 1, "message": {"message_id": 1, "from": {"id": 5},
                "chat": {"id": 5}, "text": "12.5"}}"#,
        );
        let result =
            dispatcher.dispatch(&text, &EventContext::for_update(&text)).await.expect("dispatch");

        assert!(matches!(result, HandlerResult::Processed(_)));
        let events = port.events.lock().expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, InboundKind::Text("12.5".to_owned()));
    }

    #[tokio::test]
    async fn unsupported_updates_are_ignored_and_senderless_ones_rejected() {
        let port = Arc::new(RecordingPort::default());
        let dispatcher = conversation_dispatcher(port.clone());

        let edited = update(r#"{"update_id": 2}"#);
        assert_eq!(
            dispatcher.dispatch(&edited, &EventContext::for_update(&edited)).await,
            Ok(HandlerResult::Ignored)
        );

        let anonymous = update(
            r#"{"update_id": 3, "message": {"message_id": 1, "chat": {"id": 5}, "text": "hi"}}"#,
        );
        assert_eq!(
            dispatcher.dispatch(&anonymous, &EventContext::for_update(&anonymous)).await,
            Err(DispatchError::Handler(EventHandlerError::Malformed { update_id: 3 }))
        );
        assert!(port.events.lock().expect("events").is_empty());
    }
}
