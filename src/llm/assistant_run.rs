//! 异步 Run 后端（agent 模式）
//!
//! 远端协议分三步：创建 Thread（每个实例只创建一次并缓存）→ 提交用户消息并启动 Run →
//! 轮询 Run 状态直至完成，然后取 Thread 中最新的助手消息。
//!
//! 轮询由 [`RunPoll`] 状态机驱动，等待通过 [`Sleeper`] 完成，测试中不需要真实计时。
//! 本后端不自行重试失败或超时的 Run，错误交给 DispatchCore 的回退链处理。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{
    AdapterProfile, LlmError, ModelAdapter, SendOptions, Sleeper, Transport, UsageStats,
};
use crate::memory::{last_user_content, Message};

/// 远端 Run 状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
    RequiresAction,
    Other(String),
}

impl RunStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "queued" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            "expired" => RunStatus::Expired,
            "requires_action" => RunStatus::RequiresAction,
            other => RunStatus::Other(other.to_string()),
        }
    }

    /// 仍需继续轮询
    pub fn is_pending(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }

    /// 终止性失败，立即结束轮询
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个 Run 的轮询状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Queued,
    InProgress,
    Completed,
    Failed(RunStatus),
    TimedOut,
}

/// Run 轮询状态机：每观察一次远端状态计一次尝试，尝试次数耗尽仍未结束即超时
#[derive(Debug, Clone)]
pub struct RunPoll {
    state: RunState,
    attempts: u32,
    max_attempts: u32,
}

impl RunPoll {
    /// 初始视为 in_progress，保证至少查询一次
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: RunState::InProgress,
            attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, RunState::Queued | RunState::InProgress)
    }

    /// 状态转移；已结束的状态机忽略后续观察
    pub fn observe(&mut self, status: RunStatus) -> &RunState {
        if !self.is_pending() {
            return &self.state;
        }
        self.attempts += 1;
        self.state = if status.is_error() {
            RunState::Failed(status)
        } else if status.is_pending() {
            if self.attempts >= self.max_attempts {
                RunState::TimedOut
            } else if status == RunStatus::Queued {
                RunState::Queued
            } else {
                RunState::InProgress
            }
        } else {
            RunState::Completed
        };
        &self.state
    }
}

/// 异步 Run 后端的代理与轮询设置
#[derive(Debug, Clone)]
pub struct AssistantRunSettings {
    pub base_url: Option<String>,
    /// agent 端点族根路径，如 `/agent`
    pub endpoint: String,
    pub agent_id: String,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub submit_delay: Duration,
}

impl Default for AssistantRunSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            endpoint: "/agent".to_string(),
            agent_id: String::new(),
            poll_interval: Duration::from_millis(500),
            max_poll_attempts: 60,
            submit_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunStatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

fn parse<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, LlmError> {
    serde_json::from_value(body).map_err(|e| LlmError::Parse(e.to_string()))
}

pub struct AssistantRunAdapter {
    profile: AdapterProfile,
    settings: AssistantRunSettings,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    /// 远端会话句柄；None 即 NoThread
    thread_id: Option<String>,
    stats: UsageStats,
}

impl AssistantRunAdapter {
    pub fn new(
        profile: AdapterProfile,
        settings: AssistantRunSettings,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            profile,
            settings,
            transport,
            sleeper,
            thread_id: None,
            stats: UsageStats::new(),
        }
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    fn path(&self, suffix: &str) -> String {
        format!("{}{}", self.settings.endpoint, suffix)
    }

    /// NoThread → ThreadCreated；已有句柄时直接复用
    async fn ensure_thread(&mut self) -> Result<String, LlmError> {
        if let Some(id) = &self.thread_id {
            return Ok(id.clone());
        }
        tracing::info!(model = %self.profile.id, "creating agent thread");
        let body = self
            .transport
            .post_json(&self.path("/threads"), json!({}))
            .await?;
        let thread: IdResponse = parse(body)?;
        tracing::info!(thread = %thread.id, "agent thread created");
        self.thread_id = Some(thread.id.clone());
        Ok(thread.id)
    }

    /// 提交消息并在短暂延迟后启动 Run；两者并发等待，Run 启动请求总在消息提交请求发出之后
    async fn submit_and_start(&self, thread_id: &str, text: &str) -> Result<String, LlmError> {
        let transport = &self.transport;
        let sleeper = &self.sleeper;
        let messages_path = self.path(&format!("/threads/{thread_id}/messages"));
        let runs_path = self.path(&format!("/threads/{thread_id}/runs"));

        let submit = transport.post_json(&messages_path, json!({"role": "user", "content": text}));
        let start = async {
            sleeper.sleep(self.settings.submit_delay).await;
            transport
                .post_json(&runs_path, json!({"assistant_id": self.settings.agent_id}))
                .await
        };
        let (submitted, started) = join(submit, start).await;

        if let Err(e) = submitted {
            tracing::error!(thread = %thread_id, "failed to add message: {}", e);
            return Err(e);
        }
        let run: IdResponse = parse(started?)?;
        tracing::info!(run = %run.id, "agent run started");
        Ok(run.id)
    }

    async fn fetch_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, LlmError> {
        let body = self
            .transport
            .get_json(&self.path(&format!("/threads/{thread_id}/runs/{run_id}")))
            .await?;
        let status: RunStatusResponse = parse(body)?;
        Ok(RunStatus::parse(&status.status))
    }

    async fn wait_for_run(&self, thread_id: &str, run_id: &str) -> Result<(), LlmError> {
        let mut poll = RunPoll::new(self.settings.max_poll_attempts);
        while poll.is_pending() {
            self.sleeper.sleep(self.settings.poll_interval).await;
            let status = self.fetch_status(thread_id, run_id).await?;
            let attempt = poll.attempts() + 1;
            if attempt % 4 == 1 {
                tracing::debug!(attempt, status = %status, "checking run status");
            }
            poll.observe(status);
        }

        match poll.state() {
            RunState::Completed => Ok(()),
            RunState::Failed(status) => {
                tracing::error!(run = %run_id, status = %status, "agent run failed");
                Err(LlmError::RunFailed(format!("run {status}")))
            }
            RunState::TimedOut | RunState::Queued | RunState::InProgress => Err(LlmError::Timeout {
                attempts: poll.attempts(),
            }),
        }
    }

    /// 取 Thread 中最新的助手消息（created_at 最大，相同时取列表中靠前者）
    async fn latest_reply(&self, thread_id: &str) -> Result<String, LlmError> {
        let body = self
            .transport
            .get_json(&self.path(&format!("/threads/{thread_id}/messages")))
            .await?;
        let list: MessageList = parse(body)?;

        let latest = list
            .data
            .into_iter()
            .filter(|m| m.role == "assistant")
            .fold(None::<ThreadMessage>, |best, m| match best {
                Some(b) if b.created_at >= m.created_at => Some(b),
                _ => Some(m),
            })
            .ok_or_else(|| LlmError::RunFailed("agent did not respond".to_string()))?;

        latest
            .content
            .into_iter()
            .find_map(|part| part.text.map(|t| t.value))
            .ok_or_else(|| LlmError::Parse("assistant message has no text content".to_string()))
    }
}

#[async_trait]
impl ModelAdapter for AssistantRunAdapter {
    fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    /// 只发送最后一条用户消息，上下文由远端 Thread 保持
    async fn send_message(
        &mut self,
        history: &[Message],
        _options: &SendOptions,
    ) -> Result<String, LlmError> {
        if self.settings.base_url.is_none() {
            return Err(LlmError::Configuration("Missing proxy URL".to_string()));
        }
        if self.settings.agent_id.trim().is_empty() {
            return Err(LlmError::Configuration("Missing agent id".to_string()));
        }
        let text = last_user_content(history)
            .ok_or_else(|| LlmError::Configuration("no user message to send".to_string()))?
            .to_string();

        let thread_id = self.ensure_thread().await?;
        let run_id = self.submit_and_start(&thread_id, &text).await?;
        self.wait_for_run(&thread_id, &run_id).await?;
        let reply = self.latest_reply(&thread_id).await?;

        self.stats.record_message();
        tracing::info!(model = %self.profile.id, "agent response received");
        Ok(reply)
    }

    fn validate_config(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.settings.base_url.is_none() {
            issues.push("Missing proxy URL".to_string());
        }
        if self.settings.agent_id.trim().is_empty() {
            issues.push("Missing agent id".to_string());
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
