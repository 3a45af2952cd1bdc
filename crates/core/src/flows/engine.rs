use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::catalog::CatalogError;
use crate::domain::session::{CategoryPath, Session, Step, TerminalOutcome};
use crate::flows::states::{
    Action, FlowAction, FlowContext, FlowEvent, Transition, TransitionOutcome,
};

pub trait FlowDefinition {
    fn name(&self) -> &'static str;
    fn initial_step(&self) -> Step;
    fn transition(
        &self,
        current: &Session,
        event: &FlowEvent,
        context: &FlowContext<'_>,
    ) -> Result<Transition, FlowTransitionError>;
}

/// Phone, name, warehouse, category browsing, quantities, summary.
#[derive(Clone, Debug, Default)]
pub struct InventoryFlow;

impl FlowDefinition for InventoryFlow {
    fn name(&self) -> &'static str {
        "inventory"
    }

    fn initial_step(&self) -> Step {
        Step::AwaitingPhone
    }

    fn transition(
        &self,
        current: &Session,
        event: &FlowEvent,
        context: &FlowContext<'_>,
    ) -> Result<Transition, FlowTransitionError> {
        transition_inventory(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_name(&self) -> &'static str {
        self.flow.name()
    }

    pub fn initial_step(&self) -> Step {
        self.flow.initial_step()
    }

    /// Computes the successor session. `current` is never mutated, so a
    /// rejected or rolled-back transition leaves the stored session intact.
    pub fn apply(
        &self,
        current: &Session,
        event: &FlowEvent,
        context: &FlowContext<'_>,
    ) -> Result<Transition, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &Session,
        event: &FlowEvent,
        context: &FlowContext<'_>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<Transition, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(transition) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", transition.outcome.from.as_str())
                    .with_metadata("to", transition.outcome.to.as_str())
                    .with_metadata("event", transition.outcome.event.name()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("from", current.step.as_str())
                    .with_metadata("event", event.name())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<InventoryFlow> {
    fn default() -> Self {
        Self::new(InventoryFlow)
    }
}

/// How the conversation layer recovers from a rejected transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Re-prompt in the same state.
    Validation,
    /// Should not happen with well-formed menus; generic failure notice.
    NotFound,
    /// Event does not apply to the current state.
    InvalidTransition,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("quantity `{input}` is not a non-negative number")]
    InvalidQuantity { input: String },
    #[error("responsible person name is empty")]
    EmptyName,
    #[error("shared contact carries no phone number")]
    EmptyPhone,
    #[error("warehouse index {index} is outside 0..{available}")]
    WarehouseNotFound { index: usize, available: usize },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("missing required fields before entering {state:?}: {missing_fields:?}")]
    MissingRequiredFields { state: Step, missing_fields: Vec<String> },
    #[error("invalid transition from {state:?} using event {event}")]
    InvalidTransition { state: Step, event: String },
}

impl FlowTransitionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidQuantity { .. } | Self::EmptyName | Self::EmptyPhone => {
                ErrorClass::Validation
            }
            Self::WarehouseNotFound { .. } | Self::Catalog(_) => ErrorClass::NotFound,
            Self::MissingRequiredFields { .. } | Self::InvalidTransition { .. } => {
                ErrorClass::InvalidTransition
            }
        }
    }
}

pub fn parse_quantity(input: &str) -> Result<f64, FlowTransitionError> {
    let invalid = || FlowTransitionError::InvalidQuantity { input: input.to_owned() };
    let quantity: f64 = input.trim().parse().map_err(|_| invalid())?;
    if !quantity.is_finite() || quantity < 0.0 {
        return Err(invalid());
    }
    // -0 parses as a valid zero.
    Ok(if quantity == 0.0 { 0.0 } else { quantity })
}

fn transition_inventory(
    current: &Session,
    event: &FlowEvent,
    context: &FlowContext<'_>,
) -> Result<Transition, FlowTransitionError> {
    use FlowAction::{
        AcknowledgeQuantity, AskWarehouseConfirmation, DiscardSession, NotifyUnknownCommand,
        PromptName, PromptQuantity, RequestContact, ShowCategoryMenu, ShowSummary,
        ShowWarehouseMenu, SubmitInventory,
    };
    use Step::{
        AwaitingName, AwaitingPhone, AwaitingQuantity, AwaitingWarehouse,
        AwaitingWarehouseConfirm, ReviewingSummary, Terminal,
    };

    let invalid = || FlowTransitionError::InvalidTransition {
        state: current.step,
        event: event.name().to_owned(),
    };

    let mut next = current.clone();
    let actions = match (current.step, event) {
        (_, FlowEvent::Action(Action::Unknown(_))) => vec![NotifyUnknownCommand],
        (_, FlowEvent::Action(Action::StartNew)) => {
            next = Session::new(current.user_id);
            next.ui = current.ui.clone();
            vec![RequestContact]
        }
        (AwaitingPhone, FlowEvent::PhoneShared(phone)) => {
            let phone = phone.trim();
            if phone.is_empty() {
                return Err(FlowTransitionError::EmptyPhone);
            }
            next.phone_number = Some(phone.to_owned());
            next.step = AwaitingName;
            vec![PromptName]
        }
        (AwaitingName, FlowEvent::TextEntered(text)) => {
            let name = text.trim();
            if name.is_empty() {
                return Err(FlowTransitionError::EmptyName);
            }
            next.responsible_name = Some(name.to_owned());
            next.date = Some(context.today);
            next.step = AwaitingWarehouse;
            vec![ShowWarehouseMenu]
        }
        (AwaitingWarehouse, FlowEvent::Action(Action::SelectWarehouse(index))) => {
            let warehouse = warehouse_at(context, *index)?;
            next.warehouse_candidate = Some(*index);
            next.step = AwaitingWarehouseConfirm;
            vec![AskWarehouseConfirmation { warehouse: warehouse.to_owned() }]
        }
        (AwaitingWarehouseConfirm, FlowEvent::Action(Action::ConfirmWarehouse)) => {
            let index = current.warehouse_candidate.ok_or_else(|| {
                FlowTransitionError::MissingRequiredFields {
                    state: current.step,
                    missing_fields: vec!["warehouse_candidate".to_owned()],
                }
            })?;
            let warehouse = warehouse_at(context, index)?;
            next.warehouse = Some(warehouse.to_owned());
            next.warehouse_candidate = None;
            next.pending_section = None;
            next.category_path = CategoryPath::root();
            next.previous_category_path = None;
            next.step = Step::SelectingCategory;
            vec![ShowCategoryMenu]
        }
        (AwaitingWarehouseConfirm, FlowEvent::Action(Action::RejectWarehouse)) => {
            next.warehouse_candidate = None;
            next.step = AwaitingWarehouse;
            vec![ShowWarehouseMenu]
        }
        (step, FlowEvent::Action(Action::SelectCategory(index))) if step.is_browsing() => {
            let root = context.catalog.root();
            let name = root.subcategory_at(*index).ok_or_else(|| CatalogError::IndexOutOfRange {
                path: CategoryPath::root().to_string(),
                kind: "category",
                index: *index,
            })?;
            next.category_path = CategoryPath::from_segments([name]);
            next.step = Step::browsing_for(&next.category_path);
            vec![ShowCategoryMenu]
        }
        (step, FlowEvent::Action(Action::SelectSubcategory(index))) if step.is_browsing() => {
            let node = context.catalog.resolve(&current.category_path)?;
            let name = node.subcategory_at(*index).ok_or_else(|| CatalogError::IndexOutOfRange {
                path: current.category_path.to_string(),
                kind: "subcategory",
                index: *index,
            })?;
            next.category_path.push(name);
            next.step = Step::browsing_for(&next.category_path);
            vec![ShowCategoryMenu]
        }
        (step, FlowEvent::Action(Action::SelectItem(index))) if step.is_browsing() => {
            let node = context.catalog.resolve(&current.category_path)?;
            let product = node.item_at(*index).ok_or_else(|| CatalogError::IndexOutOfRange {
                path: current.category_path.to_string(),
                kind: "item",
                index: *index,
            })?;
            next.current_product = Some(product.to_owned());
            next.step = AwaitingQuantity;
            vec![PromptQuantity { product: product.to_owned() }]
        }
        (step, FlowEvent::Action(Action::Finish)) if step.is_browsing() => {
            next.previous_category_path = Some(current.category_path.clone());
            next.step = ReviewingSummary;
            vec![ShowSummary]
        }
        (step, FlowEvent::Action(Action::Back))
            if step.is_browsing() || step == AwaitingQuantity || step == ReviewingSummary =>
        {
            next.current_product = None;
            navigate_back(&mut next)
        }
        (AwaitingQuantity, FlowEvent::TextEntered(text)) => {
            let quantity = parse_quantity(text)?;
            let product = current.current_product.clone().ok_or_else(|| {
                FlowTransitionError::MissingRequiredFields {
                    state: current.step,
                    missing_fields: vec!["current_product".to_owned()],
                }
            })?;
            next.collected.record(product.clone(), quantity);
            next.current_product = None;
            next.step = Step::browsing_for(&next.category_path);
            vec![AcknowledgeQuantity { product, quantity }, ShowCategoryMenu]
        }
        (ReviewingSummary, FlowEvent::Action(Action::ConfirmSave)) => {
            next.step = Terminal(TerminalOutcome::Submitted);
            vec![SubmitInventory]
        }
        (ReviewingSummary, FlowEvent::Action(Action::Cancel)) => {
            next.step = Terminal(TerminalOutcome::Cancelled);
            vec![DiscardSession]
        }
        _ => return Err(invalid()),
    };

    let missing_fields = next.missing_fields_for(&next.step);
    if !missing_fields.is_empty() {
        return Err(FlowTransitionError::MissingRequiredFields { state: next.step, missing_fields });
    }

    let outcome =
        TransitionOutcome { from: current.step, to: next.step, event: event.clone(), actions };
    Ok(Transition { session: next, outcome })
}

fn warehouse_at<'a>(
    context: &FlowContext<'a>,
    index: usize,
) -> Result<&'a str, FlowTransitionError> {
    context.warehouses.get(index).map(String::as_str).ok_or(
        FlowTransitionError::WarehouseNotFound { index, available: context.warehouses.len() },
    )
}

/// Restores the path saved by "finish" (clearing it), else climbs one level,
/// else leaves the catalog for the warehouse menu, dropping the warehouse and
/// any section a failed submission left for it.
fn navigate_back(session: &mut Session) -> Vec<FlowAction> {
    if let Some(saved) = session.previous_category_path.take() {
        session.category_path = saved;
    } else if session.category_path.pop().is_none() {
        session.warehouse = None;
        session.pending_section = None;
        session.step = Step::AwaitingWarehouse;
        return vec![FlowAction::ShowWarehouseMenu];
    }
    session.step = Step::browsing_for(&session.category_path);
    vec![FlowAction::ShowCategoryMenu]
}
