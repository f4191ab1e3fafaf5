pub mod extract;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use extract::{IntentExtractor, IntentKind, SchedulingIntent};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{complete_with_retry, LlmClient};
