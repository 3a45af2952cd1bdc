use serde::Serialize;
use thiserror::Error;

use stocktake_core::gateway::{Keyboard, OutgoingMessage};

use crate::callbacks;

pub const MAX_CALLBACK_BYTES: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub request_contact: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReplyMarkup {
    Inline { inline_keyboard: Vec<Vec<InlineKeyboardButton>> },
    Reply { keyboard: Vec<Vec<KeyboardButton>>, resize_keyboard: bool, one_time_keyboard: bool },
    Remove { remove_keyboard: bool },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyboardError {
    #[error("callback data for button `{label}` is {len} bytes; the limit is {MAX_CALLBACK_BYTES}")]
    CallbackTooLong { label: String, len: usize },
}

pub fn reply_markup(keyboard: &Keyboard) -> Result<ReplyMarkup, KeyboardError> {
    match keyboard {
        Keyboard::Inline(menu) => {
            let inline_keyboard = menu
                .rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|button| {
                            let callback_data = callbacks::encode(&button.action);
                            if callback_data.len() > MAX_CALLBACK_BYTES {
                                return Err(KeyboardError::CallbackTooLong {
                                    label: button.label.clone(),
                                    len: callback_data.len(),
                                });
                            }
                            Ok(InlineKeyboardButton { text: button.label.clone(), callback_data })
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ReplyMarkup::Inline { inline_keyboard })
        }
        Keyboard::RequestContact { label } => Ok(ReplyMarkup::Reply {
            keyboard: vec![vec![KeyboardButton { text: label.clone(), request_contact: true }]],
            resize_keyboard: true,
            one_time_keyboard: true,
        }),
        Keyboard::Remove => Ok(ReplyMarkup::Remove { remove_keyboard: true }),
    }
}

/// Body of a `sendMessage` / `editMessageText` request, minus chat and
/// message ids.
pub fn message_payload(message: &OutgoingMessage) -> Result<serde_json::Value, KeyboardError> {
    let mut payload = serde_json::json!({ "text": message.text });
    if let Some(keyboard) = &message.keyboard {
        let markup = reply_markup(keyboard)?;
        payload["reply_markup"] = serde_json::to_value(markup).unwrap_or(serde_json::Value::Null);
    }
    Ok(payload)
}
