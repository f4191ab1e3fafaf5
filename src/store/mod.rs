pub mod memory;
pub mod models;

pub use memory::SchedulerStore;
pub use models::{
    scopes, AgentMessage, AgentMessageType, CalendarIntegration, Connection, ConnectionStatus,
    DelegationLink, NegotiationSession, Notification, Permissions, SessionOutcome, SessionStatus,
    Slot,
};
