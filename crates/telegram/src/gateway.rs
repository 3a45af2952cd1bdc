use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use stocktake_core::domain::session::{ChatId, MessageId};
use stocktake_core::gateway::{GatewayError, MessagingGateway, OutgoingMessage};

use crate::keyboards::message_payload;

/// A message as it currently appears in a chat.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub chat: ChatId,
    pub id: MessageId,
    pub message: OutgoingMessage,
    pub edited: bool,
}

/// Messaging Gateway that renders every outgoing request to the log and keeps
/// the resulting chat state in memory.
///
/// Payloads are encoded exactly as a Bot API client would send them, so
/// oversized callback data fails here the same way it would on the wire.
#[derive(Default)]
pub struct LoopbackGateway {
    next_id: AtomicI64,
    messages: RwLock<BTreeMap<(i64, i64), ChatMessage>>,
    answers: RwLock<Vec<(String, Option<String>)>>,
}

impl LoopbackGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages still visible in `chat`, oldest first.
    pub async fn transcript(&self, chat: ChatId) -> Vec<ChatMessage> {
        self.messages
            .read()
            .await
            .values()
            .filter(|entry| entry.chat == chat)
            .cloned()
            .collect()
    }

    pub async fn answers(&self) -> Vec<(String, Option<String>)> {
        self.answers.read().await.clone()
    }
}

#[async_trait]
impl MessagingGateway for LoopbackGateway {
    async fn send_message(
        &self,
        chat: ChatId,
        message: &OutgoingMessage,
    ) -> Result<MessageId, GatewayError> {
        let payload =
            message_payload(message).map_err(|error| GatewayError::Transport(error.to_string()))?;
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        info!(
            event_name = "egress.telegram.send_message",
            chat_id = chat.0,
            message_id = id.0,
            payload = %payload,
            "sendMessage"
        );
        self.messages.write().await.insert(
            (chat.0, id.0),
            ChatMessage { chat, id, message: message.clone(), edited: false },
        );
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        message: &OutgoingMessage,
    ) -> Result<(), GatewayError> {
        let payload =
            message_payload(message).map_err(|error| GatewayError::Transport(error.to_string()))?;
        let mut messages = self.messages.write().await;
        let existing = messages
            .get_mut(&(chat.0, message_id.0))
            .ok_or(GatewayError::MessageNotFound(message_id))?;
        info!(
            event_name = "egress.telegram.edit_message",
            chat_id = chat.0,
            message_id = message_id.0,
            payload = %payload,
            "editMessageText"
        );
        existing.message = message.clone();
        existing.edited = true;
        Ok(())
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), GatewayError> {
        let removed = self.messages.write().await.remove(&(chat.0, message_id.0));
        info!(
            event_name = "egress.telegram.delete_message",
            chat_id = chat.0,
            message_id = message_id.0,
            existed = removed.is_some(),
            "deleteMessage"
        );
        Ok(())
    }

    async fn answer_pending_action(
        &self,
        action_id: &str,
        text: Option<&str>,
    ) -> Result<(), GatewayError> {
        info!(
            event_name = "egress.telegram.answer_callback",
            callback_query_id = action_id,
            text = text.unwrap_or_default(),
            "answerCallbackQuery"
        );
        self.answers.write().await.push((action_id.to_owned(), text.map(str::to_owned)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use stocktake_core::catalog::CategoryTree;
    use stocktake_core::conversation::{ConversationService, ServiceSettings};
    use stocktake_core::domain::session::ChatId;
    use stocktake_core::flows::Action;
    use stocktake_core::gateway::{
        ContainerId, FormatSpec, GatewayError, Keyboard, Menu, MenuButton, MessagingGateway,
        OutgoingMessage, Row, SectionId, StoreError, TabularStore,
    };

    use super::LoopbackGateway;
    use crate::events::{conversation_dispatcher, EventContext};
    use crate::updates::Update;

    struct UnreachableStore;

    #[async_trait::async_trait]
    impl TabularStore for UnreachableStore {
        async fn find_or_create_container(&self, _: &str) -> Result<ContainerId, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn find_container(&self, _: &str) -> Result<Option<ContainerId>, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn list_sections(&self, _: &ContainerId) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn create_section(&self, _: &ContainerId, _: &str) -> Result<SectionId, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn write_rows(&self, _: &ContainerId, _: &str, _: &[Row]) -> Result<(), StoreError> {
            Err(StoreError::Timeout)
        }

        async fn apply_formatting(
            &self,
            _: &ContainerId,
            _: &SectionId,
            _: &FormatSpec,
        ) -> Result<(), StoreError> {
            Err(StoreError::Timeout)
        }
    }

    #[tokio::test]
    async fn edits_replace_in_place_and_deletes_are_idempotent() {
        let gateway = LoopbackGateway::new();
        let chat = ChatId(9);

        let id = gateway.send_message(chat, &OutgoingMessage::text("first")).await.expect("send");
        gateway.edit_message(chat, id, &OutgoingMessage::text("second")).await.expect("edit");

        let transcript = gateway.transcript(chat).await;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].message.text, "second");
        assert!(transcript[0].edited);

        gateway.delete_message(chat, id).await.expect("delete");
        gateway.delete_message(chat, id).await.expect("delete again");
        assert_eq!(
            gateway.edit_message(chat, id, &OutgoingMessage::text("third")).await,
            Err(GatewayError::MessageNotFound(id))
        );
    }

    #[tokio::test]
    async fn unencodable_keyboards_fail_before_delivery() {
        let gateway = LoopbackGateway::new();
        let menu = Menu {
            rows: vec![vec![MenuButton::new("odd", Action::Unknown("z".repeat(65)))]],
        };
        let message = OutgoingMessage::text("menu").with_keyboard(Keyboard::Inline(menu));

        let result = gateway.send_message(ChatId(9), &message).await;

        assert!(matches!(result, Err(GatewayError::Transport(_))));
        assert!(gateway.transcript(ChatId(9)).await.is_empty());
    }

    #[tokio::test]
    async fn start_command_round_trips_through_the_dispatcher() {
        let gateway = Arc::new(LoopbackGateway::new());
        let service = ConversationService::new(
            gateway.clone(),
            Arc::new(UnreachableStore),
            Arc::new(CategoryTree::builtin()),
            vec!["Central".to_owned()],
            ServiceSettings::default(),
        )
        .with_clock(|| NaiveDate::from_ymd_opt(2026, 3, 14).expect("date"));
        let dispatcher = conversation_dispatcher(Arc::new(service));

        let update: Update = serde_json::from_str(
            r#"{"update_id": 1, "message": {"message_id": 1, "from": {"id": 9},
                "chat": {"id": 9}, "text": "/start"}}"#,
        )
        .expect("update");
        dispatcher.dispatch(&update, &EventContext::for_update(&update)).await.expect("dispatch");

        let transcript = gateway.transcript(ChatId(9)).await;
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].message.text.starts_with("Welcome"));
    }
}
