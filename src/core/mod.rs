pub mod error;
pub mod rate_limit;

pub use error::{AgentError, ErrorCode};
pub use rate_limit::RateLimiter;
