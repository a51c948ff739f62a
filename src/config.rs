//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CONCIERGE__*` 覆盖（双下划线表示嵌套，如 `CONCIERGE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub actions: ActionsSection,
    pub checkpoint: CheckpointSection,
    pub travel: TravelSection,
}

/// [app] 段：应用名、默认乘客
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 未在会话上下文中给出时使用的乘客 ID
    pub passenger_id: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock；无 API Key 时回落到 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [orchestrator] 段：每轮的上限
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_invalid_responses")]
    pub max_invalid_responses: usize,
    #[serde(default = "default_max_steps_per_turn")]
    pub max_steps_per_turn: usize,
    #[serde(default = "default_max_handoffs_per_turn")]
    pub max_handoffs_per_turn: usize,
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: usize,
    /// 单次推理超时（秒）
    #[serde(default = "default_reasoning_timeout_secs")]
    pub reasoning_timeout_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_invalid_responses: default_max_invalid_responses(),
            max_steps_per_turn: default_max_steps_per_turn(),
            max_handoffs_per_turn: default_max_handoffs_per_turn(),
            max_delegation_depth: default_max_delegation_depth(),
            reasoning_timeout_secs: default_reasoning_timeout_secs(),
        }
    }
}

fn default_max_invalid_responses() -> usize {
    3
}

fn default_max_steps_per_turn() -> usize {
    25
}

fn default_max_handoffs_per_turn() -> usize {
    4
}

fn default_max_delegation_depth() -> usize {
    2
}

fn default_reasoning_timeout_secs() -> u64 {
    90
}

/// [actions] 段：单次动作调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ActionsSection {
    #[serde(default = "default_action_timeout_secs")]
    pub timeout_secs: u64,
    /// 网页搜索 API Key；未配置时主助手看不到 search_and_contents
    pub web_search_api_key: Option<String>,
    #[serde(default = "default_web_search_url")]
    pub web_search_url: String,
    #[serde(default = "default_web_search_max_chars")]
    pub web_search_max_chars: usize,
}

impl Default for ActionsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_action_timeout_secs(),
            web_search_api_key: None,
            web_search_url: default_web_search_url(),
            web_search_max_chars: default_web_search_max_chars(),
        }
    }
}

fn default_action_timeout_secs() -> u64 {
    30
}

fn default_web_search_url() -> String {
    crate::tools::search::EXA_SEARCH_URL.to_string()
}

fn default_web_search_max_chars() -> usize {
    4000
}

/// [checkpoint] 段：检查点后端
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointSection {
    /// memory / sqlite
    #[serde(default = "default_checkpoint_backend")]
    pub backend: String,
    /// sqlite 后端的文件路径
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            backend: default_checkpoint_backend(),
            path: default_checkpoint_path(),
        }
    }
}

fn default_checkpoint_backend() -> String {
    "memory".to_string()
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("data/checkpoints.sqlite")
}

/// [travel] 段：旅行数据库与政策文件；未配置 db_path 时不注册旅行动作
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TravelSection {
    pub db_path: Option<PathBuf>,
    /// 原始数据库备份；refresh_dates 时从此恢复
    pub backup_path: Option<PathBuf>,
    #[serde(default)]
    pub refresh_dates: bool,
    pub policy_path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 CONCIERGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CONCIERGE__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("CONCIERGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
