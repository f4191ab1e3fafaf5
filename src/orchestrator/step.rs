//! 多步运行的数据类型：步骤、状态与运行上下文

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::ErrorCode;

/// 步骤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// 一个计划步骤。required 步骤失败终止整个运行，可选步骤失败后继续。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    /// 执行器按 kind 查找
    pub kind: String,
    pub required: bool,
    pub args: serde_json::Value,
    pub status: StepStatus,
}

impl Step {
    pub fn new(name: &str, kind: &str, required: bool, args: serde_json::Value) -> Self {
        Self {
            id: format!("step_{}", Uuid::new_v4()),
            name: name.to_string(),
            kind: kind.to_string(),
            required,
            args,
            status: StepStatus::Pending,
        }
    }
}

/// 单步执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// 一次多步运行的上下文与留痕
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub id: String,
    pub user_id: String,
    pub steps: Vec<Step>,
    pub records: Vec<StepRecord>,
    pub current_step_index: usize,
    pub status: RunStatus,
    pub start_time: i64,
    pub last_update_time: i64,
}

impl RunContext {
    pub fn new(user_id: &str, steps: Vec<Step>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("run_{}", Uuid::new_v4()),
            user_id: user_id.to_string(),
            steps,
            records: Vec::new(),
            current_step_index: 0,
            status: RunStatus::Running,
            start_time: now,
            last_update_time: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_update_time = chrono::Utc::now().timestamp_millis();
    }
}

/// 步骤间传递的输出：按步骤 id 存放上一步的 data
#[derive(Debug, Clone, Default)]
pub struct StepOutputs {
    outputs: HashMap<String, serde_json::Value>,
    latest_key: Option<String>,
}

impl StepOutputs {
    pub fn insert(&mut self, step_id: &str, data: serde_json::Value) {
        self.outputs.insert(step_id.to_string(), data);
        self.latest_key = Some(step_id.to_string());
    }

    pub fn get(&self, step_id: &str) -> Option<&serde_json::Value> {
        self.outputs.get(step_id)
    }

    /// 最近一次成功步骤的输出（编排器按计划序写入）
    pub fn latest(&self) -> Option<&serde_json::Value> {
        self.latest_key
            .as_ref()
            .and_then(|key| self.outputs.get(key))
    }
}
