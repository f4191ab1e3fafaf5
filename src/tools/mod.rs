//! 工具层：注册表、带超时与审计的执行器、信封协议，以及四个排期工具

pub mod check_availability;
pub mod confirm_meeting;
pub mod executor;
pub mod list_connections;
pub mod registry;
pub mod schedule_meeting;

pub use check_availability::CheckAvailabilityTool;
pub use confirm_meeting::ConfirmMeetingTool;
pub use executor::{ToolEnvelope, ToolExecutor, ToolFailure};
pub use list_connections::ListConnectionsTool;
pub use registry::{Tool, ToolContext, ToolRegistry};
pub use schedule_meeting::ScheduleMeetingTool;
