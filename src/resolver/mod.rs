//! 对方解析与提示抽取

pub mod counterpart;
pub mod hints;

pub use counterpart::{resolve_counterpart, ResolveOutcome};
pub use hints::{extract_hints, SchedulingHints};
