//! 步骤执行器注册表
//!
//! 每种步骤 kind 对应一个执行器；kind 未注册属于运行级致命错误，不做降级。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::orchestrator::step::StepOutputs;
use crate::protocol::ProgressHandle;

/// 执行单步时可见的上下文
pub struct StepContext<'a> {
    pub run_id: &'a str,
    pub user_id: &'a str,
    /// 之前步骤的输出，按步骤 id 取用
    pub outputs: &'a StepOutputs,
}

/// 单种步骤的执行器
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// 注册键，计划里的 Step::kind 与之匹配
    fn kind(&self) -> &str;

    async fn execute(
        &self,
        ctx: &StepContext<'_>,
        args: &Value,
        progress: &ProgressHandle,
    ) -> Result<Value, AgentError>;
}

#[derive(Default)]
pub struct StepRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: impl StepExecutor + 'static) {
        let kind = executor.kind().to_string();
        self.executors.insert(kind, Arc::new(executor));
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn StepExecutor>, AgentError> {
        self.executors
            .get(kind)
            .cloned()
            .ok_or_else(|| AgentError::UnknownStepKind(kind.to_string()))
    }
}
