pub mod api;
pub mod google;
pub mod service;

pub use api::{BusyInterval, CalendarApi, CalendarApiError, CalendarEvent, EventDraft};
pub use google::GoogleCalendarClient;
pub use service::CalendarService;
