//! 模型注册表：所有可用模型的静态定义
//!
//! load() 原样返回全部定义（包括禁用的），过滤由 ModelLoader 负责。
//! 内置目录可被 `[models] registry_path` 指向的 TOML 文件整体替换：
//!
//! ```toml
//! [[models]]
//! id = "gpt-4o-mini"
//! provider = "openai"
//! name = "GPT-4o Mini"
//! enabled = true
//! visible = true
//!
//! [models.config]
//! context_window = 128000
//! capabilities = ["chat", "analysis"]
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::llm::{AdapterProfile, Pricing, Provider};

/// 单个模型的静态定义，加载后不可变
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider: Provider,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    /// 默认可见性，可被白名单覆盖
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub config: ModelConfig,
}

/// 提供方相关参数
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// 远端模型名，为空时使用 id
    pub model: String,
    pub context_window: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub capabilities: Vec<String>,
    pub description: String,
    pub pricing: Option<Pricing>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            context_window: 4096,
            max_tokens: 2048,
            temperature: 0.7,
            capabilities: vec!["chat".to_string()],
            description: String::new(),
            pricing: None,
        }
    }
}

impl ModelDescriptor {
    /// 生成后端实例的描述，visible 为加载器计算出的生效可见性
    pub fn profile(&self, visible: bool) -> AdapterProfile {
        let name = if self.name.is_empty() {
            self.id.clone()
        } else {
            self.name.clone()
        };
        let model = if self.config.model.is_empty() {
            self.id.clone()
        } else {
            self.config.model.clone()
        };
        AdapterProfile {
            id: self.id.clone(),
            name,
            provider: self.provider.clone(),
            description: self.config.description.clone(),
            model,
            capabilities: self.config.capabilities.clone(),
            context_window: self.config.context_window,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            pricing: self.config.pricing.unwrap_or_default(),
            visible,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    models: Vec<ModelDescriptor>,
}

/// 模型目录
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRegistry {
    descriptors: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    pub fn new(descriptors: Vec<ModelDescriptor>) -> Self {
        Self { descriptors }
    }

    /// 从 TOML 文本解析；id 重复时报错
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let file: RegistryFile = toml::from_str(text).context("parse model registry")?;
        let mut seen = HashSet::new();
        for d in &file.models {
            if !seen.insert(d.id.as_str()) {
                anyhow::bail!("duplicate model id in registry: {}", d.id);
            }
        }
        Ok(Self::new(file.models))
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("read model registry {}", path.as_ref().display()))?;
        Self::from_toml_str(&text)
    }

    /// 全部定义（含禁用），按声明顺序；多次调用结果相同
    pub fn load(&self) -> Vec<ModelDescriptor> {
        self.descriptors.clone()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// 内置目录：OpenAI 模型启用；Anthropic / Google 预留但禁用；echo 为离线 mock
    pub fn builtin() -> Self {
        Self::new(vec![
            descriptor(
                "gpt-3.5-turbo",
                Provider::OpenAi,
                "GPT-3.5 Turbo",
                (true, true),
                (16384, 4096),
                &["chat", "analysis"],
                "Fast and cost-effective model for everyday tasks",
                Pricing {
                    input: 0.0005,
                    output: 0.0015,
                },
            ),
            descriptor(
                "gpt-4",
                Provider::OpenAi,
                "GPT-4",
                (true, false),
                (8192, 4096),
                &["chat", "analysis", "reasoning", "coding"],
                "Most capable model for complex tasks",
                Pricing {
                    input: 0.03,
                    output: 0.06,
                },
            ),
            descriptor(
                "gpt-4-turbo-preview",
                Provider::OpenAi,
                "GPT-4 Turbo",
                (true, false),
                (128000, 4096),
                &["chat", "analysis", "reasoning", "coding", "vision"],
                "Faster GPT-4 with a larger context",
                Pricing {
                    input: 0.01,
                    output: 0.03,
                },
            ),
            descriptor(
                "gpt-4o-mini",
                Provider::OpenAi,
                "GPT-4o Mini",
                (true, true),
                (128000, 4096),
                &["chat", "analysis", "reasoning"],
                "Optimized GPT-4 variant for quick answers",
                Pricing {
                    input: 0.00015,
                    output: 0.0006,
                },
            ),
            descriptor(
                "claude-3-opus-20240229",
                Provider::Anthropic,
                "Claude 3 Opus",
                (false, false),
                (200000, 4096),
                &["chat", "analysis", "reasoning", "coding", "vision"],
                "Anthropic's most capable model",
                Pricing::default(),
            ),
            descriptor(
                "claude-3-sonnet-20240229",
                Provider::Anthropic,
                "Claude 3 Sonnet",
                (false, false),
                (200000, 4096),
                &["chat", "analysis", "reasoning", "coding"],
                "Balanced model for most tasks",
                Pricing::default(),
            ),
            descriptor(
                "claude-3-haiku-20240229",
                Provider::Anthropic,
                "Claude 3 Haiku",
                (false, false),
                (200000, 4096),
                &["chat", "analysis"],
                "Fast and cost-effective model",
                Pricing::default(),
            ),
            descriptor(
                "gemini-pro",
                Provider::Google,
                "Gemini Pro",
                (false, false),
                (32000, 8192),
                &["chat", "analysis", "reasoning"],
                "Google Gemini Pro model",
                Pricing::default(),
            ),
            descriptor(
                "echo",
                Provider::Mock,
                "Echo (offline)",
                (false, false),
                (4096, 2048),
                &["chat"],
                "Offline mock that echoes the last user message",
                Pricing {
                    input: 0.0,
                    output: 0.0,
                },
            ),
        ])
    }
}

#[allow(clippy::too_many_arguments)]
fn descriptor(
    id: &str,
    provider: Provider,
    name: &str,
    (enabled, visible): (bool, bool),
    (context_window, max_tokens): (u32, u32),
    capabilities: &[&str],
    description: &str,
    pricing: Pricing,
) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        provider,
        name: name.to_string(),
        enabled,
        visible,
        config: ModelConfig {
            model: id.to_string(),
            context_window,
            max_tokens,
            temperature: 0.7,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            description: description.to_string(),
            pricing: Some(pricing),
        },
    }
}
