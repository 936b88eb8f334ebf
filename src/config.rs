//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SWITCHYARD__*` 覆盖（双下划线表示嵌套，如 `SWITCHYARD__MODELS__DEFAULT=gpt-4`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub models: ModelsSection,
    pub proxy: ProxySection,
    pub api: ApiSection,
    pub agent: AgentSection,
    pub knowledge_base: KnowledgeBaseSection,
    pub storage: StorageSection,
    pub session: SessionSection,
}

/// 对话模式：knowledge 走直接补全端点，agent 走异步 Run（需要 agent_id）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Knowledge,
    Agent,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub mode: ChatMode,
    /// 打开 debug 日志与加载摘要
    pub debug: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "Switchyard".to_string(),
            mode: ChatMode::Knowledge,
            debug: false,
        }
    }
}

/// [models] 段：默认模型、回退链、可见白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub default: Option<String>,
    /// 当前模型失败时依次尝试的模型 id
    pub fallback_chain: Vec<String>,
    /// 非空时只有列出的模型可见，覆盖注册表中的默认可见性
    pub visible: Vec<String>,
    /// 替换内置注册表的 TOML 文件
    pub registry_path: Option<PathBuf>,
    /// 回退成功时加在回复前的提示，`{model}` 替换为实际使用的模型 id
    pub fallback_notice: String,
}

fn default_fallback_notice() -> String {
    "[Fallback model used: {model}]".to_string()
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            default: None,
            fallback_chain: Vec::new(),
            visible: Vec::new(),
            registry_path: None,
            fallback_notice: default_fallback_notice(),
        }
    }
}

/// [proxy] 段：远端代理根地址与子路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub url: Option<String>,
    pub knowledge_endpoint: String,
    pub agent_endpoint: String,
    /// 单次 HTTP 请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            url: None,
            knowledge_endpoint: "/knowledge".to_string(),
            agent_endpoint: "/agent".to_string(),
            timeout_secs: 60,
        }
    }
}

impl ProxySection {
    /// url 未设置或为空白时视为缺失
    pub fn base_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// [api] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub system_prompt: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
        }
    }
}

/// [agent] 段：异步 Run 的助手 id 与轮询参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub agent_id: Option<String>,
    pub poll_interval_ms: u64,
    /// 60 次 × 500ms = 30 秒上限
    pub max_poll_attempts: u32,
    /// 提交消息后等待多久再启动 Run
    pub submit_delay_ms: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            agent_id: None,
            poll_interval_ms: 500,
            max_poll_attempts: 60,
            submit_delay_ms: 100,
        }
    }
}

impl AgentSection {
    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// [knowledge_base] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseSection {
    pub enabled: bool,
    /// 知识文件目录，未设置时用当前目录
    pub dir: Option<PathBuf>,
    pub file_prefix: String,
    pub files: Vec<KnowledgeFile>,
    /// `{knowledge}` 替换为拼接后的文本
    pub context_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeFile {
    pub name: String,
    pub description: String,
}

impl Default for KnowledgeBaseSection {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            file_prefix: "knowledge-".to_string(),
            files: Vec::new(),
            context_template:
                "Use the following information as the knowledge base when answering:\n\n{knowledge}"
                    .to_string(),
        }
    }
}

/// 偏好存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Sqlite,
    Memory,
}

/// [storage] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            path: PathBuf::from("data/preferences.json"),
        }
    }
}

/// [session] 段：限流与主题
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 每分钟最多发送条数，0 表示不限
    pub rate_limit_per_minute: u32,
    pub default_theme: String,
    pub themes: Vec<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 20,
            default_theme: "claude".to_string(),
            themes: vec![
                "claude".into(),
                "google".into(),
                "replit".into(),
                "carrd".into(),
            ],
        }
    }
}

/// 从 config 目录加载配置，环境变量 SWITCHYARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SWITCHYARD__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("SWITCHYARD")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("models.fallback_chain")
            .with_list_parse_key("models.visible")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
