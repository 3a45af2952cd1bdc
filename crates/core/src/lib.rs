pub mod audit;
pub mod catalog;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod gateway;
pub mod listing;
pub mod session_store;
pub mod submission;
pub mod views;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use catalog::{CatalogError, CategoryNode, CategoryTree, NamedNode};
pub use conversation::{
    ConversationService, Disposition, HandleOutcome, InboundEvent, InboundKind, ServiceSettings,
};
pub use domain::inventory::{InventoryLine, InventoryRecord};
pub use domain::session::{
    CategoryPath, ChatId, MessageId, PendingSection, Session, Step, TerminalOutcome, UserId,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{Action, FlowEngine, FlowEvent, InventoryFlow};
pub use gateway::{
    Cell, ContainerId, FormatSpec, GatewayError, Keyboard, Menu, MenuButton, MessagingGateway,
    OutgoingMessage, Row, SectionId, StoreError, TabularStore,
};
pub use listing::ListingCache;
pub use session_store::SessionStore;
pub use submission::{assemble, InventorySubmitter, SubmissionError, SubmissionReceipt};
