//! Mock 后端（离线使用与测试，无需 API）
//!
//! 取最后一条 User 消息回显；也可设定为始终失败，用来演练回退链。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{AdapterProfile, LlmError, ModelAdapter, Provider, SendOptions, UsageStats};
use crate::memory::{last_user_content, Message};

/// Mock 后端调用计数（克隆后共享，便于测试在后端被 DispatchCore 接管后继续观察）
#[derive(Debug, Clone, Default)]
pub struct MockCounters {
    pub sends: Arc<AtomicUsize>,
    pub initializations: Arc<AtomicUsize>,
}

impl MockCounters {
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

/// Mock 后端：回显用户最后一条消息，或返回预设错误
#[derive(Debug)]
pub struct MockAdapter {
    profile: AdapterProfile,
    failure: Option<LlmError>,
    init_failure: Option<LlmError>,
    reply_prefix: String,
    needs_init: bool,
    initialized: bool,
    issues: Vec<String>,
    counters: MockCounters,
    stats: UsageStats,
}

impl MockAdapter {
    pub fn new(profile: AdapterProfile) -> Self {
        Self {
            profile,
            failure: None,
            init_failure: None,
            reply_prefix: "Echo".to_string(),
            needs_init: false,
            initialized: false,
            issues: Vec::new(),
            counters: MockCounters::default(),
            stats: UsageStats::new(),
        }
    }

    /// 以 id 构造一个可见的 mock 后端
    pub fn echo(id: &str) -> Self {
        Self::new(AdapterProfile::new(id, Provider::Mock))
    }

    /// 每次发送都返回该错误
    pub fn failing(mut self, error: LlmError) -> Self {
        self.failure = Some(error);
        self
    }

    /// 回复格式为 `{prefix}: {最后一条用户消息}`
    pub fn with_reply_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reply_prefix = prefix.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.profile.visible = false;
        self
    }

    /// 需要初始化（用于验证惰性初始化只执行一次）
    pub fn requiring_init(mut self) -> Self {
        self.needs_init = true;
        self
    }

    /// 初始化总是失败（隐含 requiring_init）
    pub fn failing_init(mut self, error: LlmError) -> Self {
        self.needs_init = true;
        self.init_failure = Some(error);
        self
    }

    pub fn with_issues(mut self, issues: &[&str]) -> Self {
        self.issues = issues.iter().map(|i| i.to_string()).collect();
        self
    }

    pub fn counters(&self) -> MockCounters {
        self.counters.clone()
    }
}

#[async_trait]
impl ModelAdapter for MockAdapter {
    fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    fn is_initialized(&self) -> bool {
        !self.needs_init || self.initialized
    }

    async fn initialize(&mut self) -> Result<(), LlmError> {
        self.counters.initializations.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.init_failure {
            return Err(err.clone());
        }
        self.initialized = true;
        Ok(())
    }

    async fn send_message(
        &mut self,
        history: &[Message],
        _options: &SendOptions,
    ) -> Result<String, LlmError> {
        self.counters.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let last_user = last_user_content(history).unwrap_or("(no input)");
        self.stats.record_message();
        Ok(format!("{}: {}", self.reply_prefix, last_user))
    }

    fn validate_config(&self) -> Vec<String> {
        self.issues.clone()
    }

    fn stats(&self) -> Option<UsageStats> {
        Some(self.stats.clone())
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }
}
