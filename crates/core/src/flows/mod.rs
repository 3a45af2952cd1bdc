pub mod engine;
pub mod states;

pub use engine::{
    parse_quantity, ErrorClass, FlowDefinition, FlowEngine, FlowTransitionError, InventoryFlow,
};
pub use states::{Action, FlowAction, FlowContext, FlowEvent, Transition, TransitionOutcome};
