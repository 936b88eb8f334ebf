//! 模型后端抽象
//!
//! 所有后端（直接补全 / 异步 Run / Mock）实现 ModelAdapter：send_message 为必选能力，
//! initialize / validate_config / stats / reset_stats 为可选能力，默认实现即「不具备该能力」。

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::UsageStats;
use crate::memory::Message;

/// 后端层错误：配置、远端状态码、响应解析、网络、Run 超时 / 失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(String),

    /// 异步 Run 轮询次数耗尽
    #[error("Agent timeout after {attempts} status checks - took too long to respond")]
    Timeout { attempts: u32 },

    /// 远端 Run 进入 failed / cancelled / expired，或完成后没有助手消息
    #[error("Agent run failed: {0}")]
    RunFailed(String),
}

impl LlmError {
    /// 远端返回的 HTTP 状态码（仅 Provider 错误有）
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// 模型提供方；未知字符串保留原值，由加载器跳过
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    Mock,
    Other(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Mock => "mock",
            Provider::Other(name) => name,
        }
    }
}

impl From<String> for Provider {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "openai" => Provider::OpenAi,
            "anthropic" => Provider::Anthropic,
            "google" => Provider::Google,
            "mock" => Provider::Mock,
            _ => Provider::Other(value),
        }
    }
}

impl From<Provider> for String {
    fn from(value: Provider) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 每 1K token 的价格（美元）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input: 0.0005,
            output: 0.0015,
        }
    }
}

impl Pricing {
    /// 线性估价：input/1000 * 入价 + output/1000 * 出价
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.input
            + (completion_tokens as f64 / 1000.0) * self.output
    }
}

/// 后端实例的描述信息；visible 为生效的可见性（可被白名单覆盖）
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterProfile {
    pub id: String,
    pub name: String,
    pub provider: Provider,
    pub description: String,
    /// 远端使用的模型名
    pub model: String,
    pub capabilities: Vec<String>,
    pub context_window: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub pricing: Pricing,
    pub visible: bool,
}

impl AdapterProfile {
    pub fn new(id: impl Into<String>, provider: Provider) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            model: id.clone(),
            id,
            provider,
            description: String::new(),
            capabilities: vec!["chat".to_string()],
            context_window: 4096,
            max_tokens: 2048,
            temperature: 0.7,
            pricing: Pricing::default(),
            visible: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_context_window(mut self, context_window: u32) -> Self {
        self.context_window = context_window;
        self
    }
}

/// 单次发送的选项
#[derive(Debug, Clone, PartialEq)]
pub struct SendOptions {
    /// 为 false 时当前模型失败直接返回错误，不走回退链
    pub allow_fallback: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            allow_fallback: true,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl SendOptions {
    pub fn without_fallback() -> Self {
        Self {
            allow_fallback: false,
            ..Self::default()
        }
    }
}

/// 模型后端 trait：由 DispatchCore 独占持有，send_message 以 &mut self 串行调用
#[async_trait]
pub trait ModelAdapter: Send {
    fn profile(&self) -> &AdapterProfile;

    /// 是否已完成初始化；不需要初始化的后端恒为 true
    fn is_initialized(&self) -> bool {
        true
    }

    /// 一次性初始化（如加载知识库）；默认无操作
    async fn initialize(&mut self) -> Result<(), LlmError> {
        Ok(())
    }

    /// 发送对话历史，返回回复文本
    async fn send_message(
        &mut self,
        history: &[Message],
        options: &SendOptions,
    ) -> Result<String, LlmError>;

    /// 返回人类可读的配置问题列表，不报错
    fn validate_config(&self) -> Vec<String> {
        Vec::new()
    }

    /// 使用统计；不统计的后端返回 None
    fn stats(&self) -> Option<UsageStats> {
        None
    }

    fn reset_stats(&mut self) {}
}
