use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::catalog::CategoryTree;
use crate::domain::session::{Session, Step};

/// Structured user action, decoded once at the transport boundary.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    StartNew,
    SelectWarehouse(usize),
    ConfirmWarehouse,
    RejectWarehouse,
    SelectCategory(usize),
    SelectSubcategory(usize),
    SelectItem(usize),
    Back,
    Finish,
    ConfirmSave,
    Cancel,
    Unknown(String),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartNew => "start_new",
            Self::SelectWarehouse(_) => "select_warehouse",
            Self::ConfirmWarehouse => "confirm_warehouse",
            Self::RejectWarehouse => "reject_warehouse",
            Self::SelectCategory(_) => "select_category",
            Self::SelectSubcategory(_) => "select_subcategory",
            Self::SelectItem(_) => "select_item",
            Self::Back => "back",
            Self::Finish => "finish",
            Self::ConfirmSave => "confirm_save",
            Self::Cancel => "cancel",
            Self::Unknown(_) => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    PhoneShared(String),
    TextEntered(String),
    Action(Action),
}

impl FlowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhoneShared(_) => "phone_shared",
            Self::TextEntered(_) => "text_entered",
            Self::Action(action) => action.name(),
        }
    }
}

/// Read-only inputs a transition may consult.
#[derive(Clone, Copy, Debug)]
pub struct FlowContext<'a> {
    pub catalog: &'a CategoryTree,
    pub warehouses: &'a [String],
    pub today: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FlowAction {
    RequestContact,
    PromptName,
    ShowWarehouseMenu,
    AskWarehouseConfirmation { warehouse: String },
    ShowCategoryMenu,
    PromptQuantity { product: String },
    AcknowledgeQuantity { product: String, quantity: f64 },
    ShowSummary,
    SubmitInventory,
    DiscardSession,
    NotifyUnknownCommand,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: Step,
    pub to: Step,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}

/// Successor session plus the side effects the caller must dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub session: Session,
    pub outcome: TransitionOutcome,
}

impl Transition {
    pub fn changed_state(&self) -> bool {
        self.outcome.from != self.outcome.to
    }
}
