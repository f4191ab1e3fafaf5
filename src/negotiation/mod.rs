pub mod connection;
pub mod delegation;
pub mod notify;
pub mod session;
pub mod slots;

pub use connection::ConnectionService;
pub use delegation::DelegationService;
pub use notify::{NotificationSink, StoreNotificationSink};
pub use session::{
    ConfirmSelection, ConfirmedMeeting, NegotiationService, ProposalPayload, ProposalRequest,
};
pub use slots::{merge_busy, mutual_slots, SlotQuery};
