//! Oriole - Rust 会议排期协商代理
//!
//! 模块划分：
//! - **agent**: 请求入口与组件装配（限流、意图、计划、编排）
//! - **calendar**: 日历弹性层（Google API 客户端、令牌刷新、重试、多账号聚合）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、错误码与限流
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）与意图抽取
//! - **negotiation**: 连接、委托、会话状态机与槽位计算
//! - **observability**: tracing 初始化
//! - **orchestrator**: 多步编排（步骤计划、执行器注册表、顺序运行）
//! - **protocol**: 控制令牌协议与流编码
//! - **resolver**: 对方解析与排期提示抽取
//! - **store**: 内存数据层（连接、会话、消息、集成、通知、委托）
//! - **tools**: 排期工具与带超时 / 审计的执行器

pub mod agent;
pub mod calendar;
pub mod config;
pub mod core;
pub mod llm;
pub mod negotiation;
pub mod observability;
pub mod orchestrator;
pub mod protocol;
pub mod resolver;
pub mod store;
pub mod tools;

pub use agent::{Agent, ProcessRequest, StreamHandle};
