//! Contracts the conversation core needs from its two external collaborators.
//!
//! The Messaging Gateway delivers and manages chat messages; the Tabular Store
//! persists submitted inventories as named sections inside per-warehouse
//! containers. Adapters live in other crates; only the shapes are fixed here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::session::{ChatId, MessageId};
use crate::flows::states::Action;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuButton {
    pub label: String,
    pub action: Action,
}

impl MenuButton {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self { label: label.into(), action }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub rows: Vec<Vec<MenuButton>>,
}

impl Menu {
    pub fn buttons(&self) -> impl Iterator<Item = &MenuButton> {
        self.rows.iter().flatten()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Keyboard {
    Inline(Menu),
    RequestContact { label: String },
    Remove,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), keyboard: None }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn menu(&self) -> Option<&Menu> {
        match &self.keyboard {
            Some(Keyboard::Inline(menu)) => Some(menu),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("message {0:?} not found")]
    MessageNotFound(MessageId),
    #[error("message {0:?} cannot be edited")]
    NotEditable(MessageId),
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_message(
        &self,
        chat: ChatId,
        message: &OutgoingMessage,
    ) -> Result<MessageId, GatewayError>;

    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        message: &OutgoingMessage,
    ) -> Result<(), GatewayError>;

    /// Must treat an already deleted message as success.
    async fn delete_message(&self, chat: ChatId, message_id: MessageId)
        -> Result<(), GatewayError>;

    async fn answer_pending_action(
        &self,
        action_id: &str,
        text: Option<&str>,
    ) -> Result<(), GatewayError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Text(String),
    Integer(i64),
    Number(f64),
    Empty,
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn display(&self) -> String {
        match self {
            Self::Text(value) => value.clone(),
            Self::Integer(value) => value.to_string(),
            Self::Number(value) => value.to_string(),
            Self::Empty => String::new(),
        }
    }
}

pub type Row = Vec<Cell>;

/// Cosmetic layout of a written section. Indices are zero-based.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    /// Rows whose first `merge_columns` cells are merged into one.
    pub merged_rows: Vec<usize>,
    pub merge_columns: usize,
    pub bordered_rows: usize,
    pub bordered_columns: usize,
    pub column_widths_px: Vec<u32>,
    pub header_row: Option<usize>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("container `{0}` not found")]
    ContainerNotFound(String),
    #[error("section `{section}` not found in container `{container}`")]
    SectionNotFound { container: String, section: String },
    #[error("store request timed out")]
    Timeout,
    #[error("store backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait TabularStore: Send + Sync {
    async fn find_or_create_container(&self, name: &str) -> Result<ContainerId, StoreError>;

    /// Lookup without creation, used by read-only listings.
    async fn find_container(&self, name: &str) -> Result<Option<ContainerId>, StoreError>;

    /// Section names in creation order.
    async fn list_sections(&self, container: &ContainerId) -> Result<Vec<String>, StoreError>;

    /// Creating a section that already exists returns the existing id.
    async fn create_section(
        &self,
        container: &ContainerId,
        name: &str,
    ) -> Result<SectionId, StoreError>;

    /// Replaces the section's contents with `rows`.
    async fn write_rows(
        &self,
        container: &ContainerId,
        section: &str,
        rows: &[Row],
    ) -> Result<(), StoreError>;

    async fn apply_formatting(
        &self,
        container: &ContainerId,
        section: &SectionId,
        spec: &FormatSpec,
    ) -> Result<(), StoreError>;
}
