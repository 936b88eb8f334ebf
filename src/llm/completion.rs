//! 直接补全后端（knowledge 模式）
//!
//! 一次请求包含系统提示（可附加知识库文本）与完整对话历史，取首个 choice 的 content，
//! 并按响应中的 usage 更新统计。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::ChatMode;
use crate::llm::{AdapterProfile, LlmError, ModelAdapter, SendOptions, Transport, UsageStats};
use crate::memory::{KnowledgeSource, Message};

/// 直接补全后端共享的代理设置
#[derive(Debug, Clone, Default)]
pub struct CompletionSettings {
    /// 代理根地址；None 时 validate_config 报告缺失
    pub base_url: Option<String>,
    pub endpoint: String,
    pub system_prompt: String,
    pub mode: ChatMode,
    /// agent 模式下是否配置了助手 id（仅用于配置校验）
    pub agent_id_configured: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

pub struct CompletionAdapter {
    profile: AdapterProfile,
    settings: CompletionSettings,
    transport: Arc<dyn Transport>,
    knowledge: Arc<dyn KnowledgeSource>,
    knowledge_block: String,
    initialized: bool,
    stats: UsageStats,
}

impl CompletionAdapter {
    pub fn new(
        profile: AdapterProfile,
        settings: CompletionSettings,
        transport: Arc<dyn Transport>,
        knowledge: Arc<dyn KnowledgeSource>,
    ) -> Self {
        Self {
            profile,
            settings,
            transport,
            knowledge,
            knowledge_block: String::new(),
            initialized: false,
            stats: UsageStats::new(),
        }
    }

    fn system_prompt(&self) -> String {
        if self.knowledge_block.is_empty() {
            self.settings.system_prompt.clone()
        } else {
            format!("{}\n\n{}", self.settings.system_prompt, self.knowledge_block)
        }
    }

    fn build_request(&self, history: &[Message], options: &SendOptions) -> serde_json::Value {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(self.system_prompt()));
        messages.extend(history.iter().cloned());

        json!({
            "model": self.profile.model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(self.profile.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.profile.max_tokens),
        })
    }
}

#[async_trait]
impl ModelAdapter for CompletionAdapter {
    fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// knowledge 模式下加载知识库；只执行一次
    async fn initialize(&mut self) -> Result<(), LlmError> {
        if self.initialized {
            return Ok(());
        }
        tracing::info!(model = %self.profile.id, "initializing completion model");
        if self.settings.mode == ChatMode::Knowledge {
            self.knowledge_block = self
                .knowledge
                .load()
                .await
                .map_err(|e| LlmError::Configuration(format!("knowledge base: {e}")))?;
        }
        self.initialized = true;
        Ok(())
    }

    async fn send_message(
        &mut self,
        history: &[Message],
        options: &SendOptions,
    ) -> Result<String, LlmError> {
        if self.settings.base_url.is_none() {
            return Err(LlmError::Configuration("Missing proxy URL".to_string()));
        }

        let request = self.build_request(history, options);
        tracing::debug!(
            model = %self.profile.model,
            messages = history.len() + 1,
            temperature = %request["temperature"],
            max_tokens = %request["max_tokens"],
            "completion request"
        );

        let body = self
            .transport
            .post_json(&self.settings.endpoint, request)
            .await?;
        let response: CompletionResponse =
            serde_json::from_value(body).map_err(|e| LlmError::Parse(e.to_string()))?;

        if let Some(usage) = &response.usage {
            let cost = self.stats.record(
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
                &self.profile.pricing,
            );
            tracing::debug!(tokens = usage.total_tokens, cost, "usage recorded");
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("response has no message content".to_string()))
    }

    fn validate_config(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.settings.base_url.is_none() {
            issues.push("Missing proxy URL".to_string());
        }
        if self.settings.mode == ChatMode::Agent && !self.settings.agent_id_configured {
            issues.push("Agent mode enabled but no agent id configured".to_string());
        }
        issues
    }

    fn stats(&self) -> Option<UsageStats> {
        Some(self.stats.clone())
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }
}
