//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ORIOLE__*` 覆盖（双下划线表示嵌套，如 `ORIOLE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub negotiation: NegotiationSection,
    #[serde(default)]
    pub calendar: CalendarSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub limits: LimitsSection,
}

/// [app] 段：应用名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,
    /// 瞬时失败最多重试次数（与日历层同策略）
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    /// 退避基数（毫秒），每次重试翻倍
    #[serde(default = "default_llm_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_llm_max_retries() -> u32 {
    2
}

fn default_llm_backoff_base_ms() -> u64 {
    250
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_llm_timeout(),
            max_retries: default_llm_max_retries(),
            backoff_base_ms: default_llm_backoff_base_ms(),
        }
    }
}

/// [negotiation] 段：会话 TTL 与提案槽位参数
#[derive(Debug, Clone, Deserialize)]
pub struct NegotiationSection {
    /// 协商会话存活时间（分钟），到期后懒惰过期
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: i64,
    /// 提案槽位对齐粒度（分钟）
    #[serde(default = "default_slot_granularity")]
    pub slot_granularity_minutes: i64,
    /// 单次提案最多给出的槽位数
    #[serde(default = "default_max_slot_options")]
    pub max_slot_options: usize,
    /// 未给时长提示时的默认会议时长（分钟）
    #[serde(default = "default_meeting_minutes")]
    pub default_meeting_minutes: i64,
}

impl Default for NegotiationSection {
    fn default() -> Self {
        Self {
            session_ttl_minutes: default_session_ttl_minutes(),
            slot_granularity_minutes: default_slot_granularity(),
            max_slot_options: default_max_slot_options(),
            default_meeting_minutes: default_meeting_minutes(),
        }
    }
}

fn default_session_ttl_minutes() -> i64 {
    30
}

fn default_slot_granularity() -> i64 {
    30
}

fn default_max_slot_options() -> usize {
    5
}

fn default_meeting_minutes() -> i64 {
    30
}

/// [calendar] 段：瞬时错误重试参数
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarSection {
    /// 瞬时错误最多重试次数（reauth / 校验类永不重试）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 退避基数（毫秒），每次重试翻倍
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for CalendarSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

/// [tools] 段：单次工具调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [limits] 段：每用户每分钟请求数上限
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    20
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            negotiation: NegotiationSection::default(),
            calendar: CalendarSection::default(),
            tools: ToolsSection::default(),
            limits: LimitsSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 ORIOLE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ORIOLE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ORIOLE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
