//! 多步编排：步骤类型、执行器注册表与顺序运行器

pub mod registry;
pub mod run;
pub mod step;

pub use registry::{StepContext, StepExecutor, StepRegistry};
pub use run::{Orchestrator, RunPlan};
pub use step::{RunContext, RunStatus, Step, StepOutputs, StepRecord, StepStatus};
