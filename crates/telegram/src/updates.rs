use serde::Deserialize;

use stocktake_core::conversation::{InboundEvent, InboundKind};
use stocktake_core::domain::session::{ChatId, MessageId, UserId};

use crate::callbacks;

/// The subset of a Bot API `Update` the bot reacts to.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Contact {
    pub phone_number: String,
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub contact: Option<Contact>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Command,
    Text,
    Contact,
    Callback,
    Unsupported,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Text => "text",
            Self::Contact => "contact",
            Self::Callback => "callback",
            Self::Unsupported => "unsupported",
        }
    }
}

impl Update {
    pub fn kind(&self) -> UpdateKind {
        if self.callback_query.is_some() {
            return UpdateKind::Callback;
        }
        let Some(message) = &self.message else {
            return UpdateKind::Unsupported;
        };
        if message.contact.is_some() {
            return UpdateKind::Contact;
        }
        match message.text.as_deref() {
            Some(text) if command_name(text).is_some() => UpdateKind::Command,
            Some(_) => UpdateKind::Text,
            None => UpdateKind::Unsupported,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match (&self.callback_query, &self.message) {
            (Some(query), _) => Some(query.from.id),
            (None, Some(message)) => message.from.as_ref().map(|user| user.id),
            (None, None) => None,
        }
    }

    /// Translates the update into the core's inbound event. Updates without a
    /// sender, a chat, or any content the bot understands yield `None`.
    pub fn into_inbound(self) -> Option<InboundEvent> {
        let update_id = self.update_id;
        if let Some(query) = self.callback_query {
            let message = query.message?;
            let action = callbacks::decode(query.data.as_deref().unwrap_or_default());
            return Some(
                InboundEvent::new(
                    update_id,
                    UserId(query.from.id),
                    ChatId(message.chat.id),
                    InboundKind::Callback(action),
                )
                .with_message(MessageId(message.message_id))
                .with_pending_action(query.id),
            );
        }

        let message = self.message?;
        let user_id = UserId(message.from.as_ref()?.id);
        let kind = match (message.contact, message.text) {
            (Some(contact), _) => InboundKind::ContactShared(contact.phone_number),
            (None, Some(text)) => match command_name(&text) {
                Some(name) => InboundKind::Command(name.to_owned()),
                None => InboundKind::Text(text),
            },
            (None, None) => return None,
        };
        Some(
            InboundEvent::new(update_id, user_id, ChatId(message.chat.id), kind)
                .with_message(MessageId(message.message_id)),
        )
    }
}

/// `/start`, `/start@stocktake_bot` and `/history extra` all name a command.
fn command_name(text: &str) -> Option<&str> {
    let first = text.trim().split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    (!name.is_empty()).then_some(name)
}
