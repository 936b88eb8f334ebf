//! 会话驱动：对话历史 + 斜杠命令 + 限流 + 主题
//!
//! 输入天然串行：调用方等待一次 handle_line 完成后才读取下一行。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SessionSection;
use crate::core::{DispatchCore, DispatchError, ModelInfo};
use crate::llm::{LlmError, SendOptions};
use crate::memory::{ConversationHistory, Message, PreferenceStore, SELECTED_THEME_KEY};

const RATE_WINDOW: Duration = Duration::from_secs(60);

const HELP: &str = "\
Commands:
  /models          list available models
  /use <id>        switch the active model
  /info [id]       show model details (active model by default)
  /stats           usage statistics
  /reset-stats     reset usage statistics
  /check           validate configuration
  /theme [name]    show or change the theme
  /clear           clear the conversation
  /help            this help
  /quit            exit";

/// 每分钟消息上限（滑动窗口）；limit 为 0 表示不限
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    sent: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit: limit_per_minute,
            sent: VecDeque::new(),
        }
    }

    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    /// 允许时记录本次发送；被拒绝的请求不计入窗口
    pub fn check_at(&mut self, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        while let Some(&oldest) = self.sent.front() {
            if now.duration_since(oldest) >= RATE_WINDOW {
                self.sent.pop_front();
            } else {
                break;
            }
        }
        if self.sent.len() >= self.limit as usize {
            return false;
        }
        self.sent.push_back(now);
        true
    }
}

/// 斜杠命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Models,
    Use(String),
    Info(Option<String>),
    Stats,
    ResetStats,
    Check,
    Theme(Option<String>),
    Clear,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    /// 不以 `/` 开头的输入返回 None（普通消息）
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let rest = line.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default().to_lowercase();
        let arg = parts.next().map(str::to_string);

        Some(match name.as_str() {
            "models" => Command::Models,
            "use" => match arg {
                Some(id) => Command::Use(id),
                None => Command::Unknown("/use requires a model id".to_string()),
            },
            "info" => Command::Info(arg),
            "stats" => Command::Stats,
            "reset-stats" => Command::ResetStats,
            "check" => Command::Check,
            "theme" => Command::Theme(arg),
            "clear" => Command::Clear,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(format!("Unknown command: {line}")),
        })
    }
}

/// 处理一行输入的结果
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    /// 模型回复
    Reply(String),
    /// 系统提示（命令输出、错误、限流）
    Notice(String),
    Quit,
    /// 空输入
    Nothing,
}

/// 把调度错误映射为面向用户的提示
pub fn friendly_error(err: &DispatchError) -> String {
    match err {
        DispatchError::NoActiveModel => {
            "No model selected. Use /models to list models and /use <id> to pick one.".to_string()
        }
        DispatchError::UnknownModel(id) => format!("Model '{id}' is not available."),
        DispatchError::Model { source, .. } => match source {
            LlmError::Provider { status: 401, .. } => {
                "Invalid API key. Please check your configuration.".to_string()
            }
            LlmError::Provider { status: 429, .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            LlmError::Network(_) => "Connection error. Please check your network.".to_string(),
            other => format!("Sorry, something went wrong: {other}"),
        },
    }
}

pub struct ChatSession {
    core: DispatchCore,
    history: ConversationHistory,
    preferences: Arc<dyn PreferenceStore>,
    limiter: RateLimiter,
    themes: Vec<String>,
    theme: String,
}

impl ChatSession {
    /// 主题恢复顺序：已保存且合法 > 配置默认
    pub fn new(
        core: DispatchCore,
        preferences: Arc<dyn PreferenceStore>,
        session: &SessionSection,
    ) -> Self {
        let saved = match preferences.get(SELECTED_THEME_KEY) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!("Failed to read saved theme: {}", e);
                None
            }
        };
        let theme = saved
            .filter(|t| session.themes.contains(t))
            .unwrap_or_else(|| session.default_theme.clone());

        Self {
            core,
            history: ConversationHistory::new(),
            preferences,
            limiter: RateLimiter::new(session.rate_limit_per_minute),
            themes: session.themes.clone(),
            theme,
        }
    }

    pub fn core(&self) -> &DispatchCore {
        &self.core
    }

    pub fn history(&self) -> &[Message] {
        self.history.messages()
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub async fn handle_line(&mut self, line: &str) -> SessionOutput {
        match Command::parse(line) {
            Some(command) => self.execute(command).await,
            None => self.submit(line).await,
        }
    }

    /// 发送一条用户消息；成功时回复写入历史，失败时返回友好提示
    pub async fn submit(&mut self, text: &str) -> SessionOutput {
        let text = text.trim();
        if text.is_empty() {
            return SessionOutput::Nothing;
        }
        if !self.limiter.check() {
            tracing::warn!("rate limit reached");
            return SessionOutput::Notice(
                "Rate limit reached. Please wait a moment before sending another message."
                    .to_string(),
            );
        }

        self.history.push(Message::user(text));
        match self
            .core
            .send_message(self.history.messages(), &SendOptions::default())
            .await
        {
            Ok(reply) => {
                self.history.push(Message::assistant(reply.clone()));
                SessionOutput::Reply(reply)
            }
            Err(e) => {
                tracing::error!("send failed: {}", e);
                SessionOutput::Notice(friendly_error(&e))
            }
        }
    }

    pub async fn execute(&mut self, command: Command) -> SessionOutput {
        let text = match command {
            Command::Models => self.render_models(),
            Command::Use(id) => {
                if self.core.set_active_model(&id).await {
                    let name = self
                        .core
                        .model_info(Some(&id))
                        .map(|m| m.name)
                        .unwrap_or(id);
                    format!("Switched to model: {name}")
                } else {
                    friendly_error(&DispatchError::UnknownModel(id))
                }
            }
            Command::Info(id) => match self.core.model_info(id.as_deref()) {
                Some(info) => render_info(&info),
                None => match id {
                    Some(id) => friendly_error(&DispatchError::UnknownModel(id)),
                    None => friendly_error(&DispatchError::NoActiveModel),
                },
            },
            Command::Stats => self.render_stats(),
            Command::ResetStats => {
                self.core.reset_stats();
                "Usage statistics reset.".to_string()
            }
            Command::Check => {
                let issues = self.core.validate_configuration();
                if issues.is_empty() {
                    "Configuration OK.".to_string()
                } else {
                    format!("Configuration issues:\n  - {}", issues.join("\n  - "))
                }
            }
            Command::Theme(None) => format!(
                "Theme: {} (available: {})",
                self.theme,
                self.themes.join(", ")
            ),
            Command::Theme(Some(name)) => self.set_theme(&name),
            Command::Clear => {
                self.history.clear();
                "Conversation cleared.".to_string()
            }
            Command::Help => HELP.to_string(),
            Command::Quit => return SessionOutput::Quit,
            Command::Unknown(message) => format!("{message}\nType /help for commands."),
        };
        SessionOutput::Notice(text)
    }

    fn set_theme(&mut self, name: &str) -> String {
        let name = name.to_lowercase();
        if !self.themes.contains(&name) {
            tracing::warn!(theme = %name, "Invalid theme");
            return format!(
                "Unknown theme '{name}'. Available: {}",
                self.themes.join(", ")
            );
        }
        if let Err(e) = self.preferences.set(SELECTED_THEME_KEY, &name) {
            tracing::warn!("Failed to persist theme: {}", e);
        }
        tracing::info!(theme = %name, "Theme changed");
        self.theme = name;
        format!("Theme set to {}", self.theme)
    }

    fn render_models(&self) -> String {
        let models = self.core.available_models();
        if models.is_empty() {
            return "No models available.".to_string();
        }
        models
            .iter()
            .map(|m| {
                let marker = if m.is_active { "*" } else { " " };
                format!("{marker} {:<24} {} ({})", m.id, m.name, m.provider)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_stats(&self) -> String {
        let report = self.core.usage_report();
        let mut lines = vec![format!(
            "Total: {} messages, {} tokens, ${:.4}",
            report.total_messages, report.total_tokens, report.estimated_cost
        )];
        for (id, stats) in &report.per_model {
            if stats.messages > 0 {
                lines.push(format!(
                    "  {id}: {} messages, {} tokens, ${:.4} (since {})",
                    stats.messages,
                    stats.tokens,
                    stats.cost,
                    stats.since.format("%Y-%m-%d %H:%M")
                ));
            }
        }
        lines.join("\n")
    }
}

fn render_info(info: &ModelInfo) -> String {
    format!(
        "{} ({})\n  provider: {}\n  {}\n  capabilities: {}\n  context window: {}\n  pricing per 1K tokens: ${} in / ${} out{}",
        info.name,
        info.id,
        info.provider,
        if info.description.is_empty() { "-" } else { info.description.as_str() },
        info.capabilities.join(", "),
        info.context_window,
        info.pricing.input,
        info.pricing.output,
        if info.is_active { "\n  (active)" } else { "" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DispatchSettings;
    use crate::llm::MockAdapter;
    use crate::memory::MemoryPreferences;

    async fn session_with(prefs: Arc<MemoryPreferences>, limit: u32) -> ChatSession {
        let settings = DispatchSettings::default().with_fallback_chain(&[]);
        let mut core = DispatchCore::new(settings, prefs.clone());
        core.register_model("a", Box::new(MockAdapter::echo("a")));
        core.register_model("b", Box::new(MockAdapter::echo("b").with_reply_prefix("B")));
        core.initialize().await;
        let section = SessionSection {
            rate_limit_per_minute: limit,
            ..SessionSection::default()
        };
        ChatSession::new(core, prefs, &section)
    }

    #[test]
    fn test_rate_limiter_sliding_window() {
        let mut limiter = RateLimiter::new(2);
        let start = Instant::now();
        assert!(limiter.check_at(start));
        assert!(limiter.check_at(start + Duration::from_secs(10)));
        assert!(!limiter.check_at(start + Duration::from_secs(20)));
        assert!(limiter.check_at(start + Duration::from_secs(61)));
        assert!(!limiter.check_at(start + Duration::from_secs(62)));

        let mut unlimited = RateLimiter::new(0);
        assert!((0..100).all(|_| unlimited.check_at(start)));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("/models"), Some(Command::Models));
        assert_eq!(Command::parse(" /use gpt-4 "), Some(Command::Use("gpt-4".into())));
        assert_eq!(Command::parse("/info"), Some(Command::Info(None)));
        assert_eq!(Command::parse("/RESET-STATS"), Some(Command::ResetStats));
        assert_eq!(Command::parse("/exit"), Some(Command::Quit));
        assert!(matches!(Command::parse("/use"), Some(Command::Unknown(_))));
        assert!(matches!(Command::parse("/frobnicate"), Some(Command::Unknown(_))));
    }

    #[test]
    fn test_friendly_errors() {
        let model = |source| DispatchError::Model {
            id: "a".to_string(),
            source,
        };
        let unauthorized = model(LlmError::Provider {
            status: 401,
            message: "bad key".into(),
        });
        assert!(friendly_error(&unauthorized).contains("Invalid API key"));
        let throttled = model(LlmError::Provider {
            status: 429,
            message: "slow".into(),
        });
        assert!(friendly_error(&throttled).contains("Too many requests"));
        assert!(friendly_error(&model(LlmError::Network("reset".into()))).contains("Connection"));
        assert!(friendly_error(&DispatchError::NoActiveModel).contains("No model selected"));
        assert!(friendly_error(&model(LlmError::Timeout { attempts: 60 })).contains("timeout"));
    }

    #[tokio::test]
    async fn test_submit_appends_history() {
        let mut session = session_with(Arc::new(MemoryPreferences::new()), 0).await;
        assert_eq!(session.submit("   ").await, SessionOutput::Nothing);
        assert_eq!(
            session.handle_line("hello").await,
            SessionOutput::Reply("Echo: hello".to_string())
        );
        assert_eq!(session.history().len(), 2);

        session.handle_line("/clear").await;
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_submit_is_not_recorded() {
        let mut session = session_with(Arc::new(MemoryPreferences::new()), 1).await;
        assert!(matches!(session.submit("one").await, SessionOutput::Reply(_)));
        let limited = session.submit("two").await;
        assert!(matches!(limited, SessionOutput::Notice(ref text) if text.contains("Rate limit")));
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_use_command_switches_model() {
        let mut session = session_with(Arc::new(MemoryPreferences::new()), 0).await;
        assert_eq!(session.core().active_model_id(), Some("a"));

        let out = session.handle_line("/use b").await;
        assert_eq!(out, SessionOutput::Notice("Switched to model: b".to_string()));
        assert_eq!(
            session.handle_line("hi").await,
            SessionOutput::Reply("B: hi".to_string())
        );

        let out = session.handle_line("/use nope").await;
        assert_eq!(out, SessionOutput::Notice("Model 'nope' is not available.".to_string()));
        assert_eq!(session.core().active_model_id(), Some("b"));
    }

    #[tokio::test]
    async fn test_models_and_info_output() {
        let mut session = session_with(Arc::new(MemoryPreferences::new()), 0).await;
        let SessionOutput::Notice(models) = session.handle_line("/models").await else {
            panic!("expected notice");
        };
        assert!(models.lines().next().unwrap().starts_with("* a"));
        assert_eq!(models.lines().count(), 2);

        let SessionOutput::Notice(info) = session.handle_line("/info").await else {
            panic!("expected notice");
        };
        assert!(info.contains("(active)"));
    }

    #[tokio::test]
    async fn test_theme_persisted_and_restored() {
        let prefs = Arc::new(MemoryPreferences::new());
        let mut session = session_with(prefs.clone(), 0).await;
        assert_eq!(session.theme(), "claude");

        let out = session.handle_line("/theme purple").await;
        assert!(matches!(out, SessionOutput::Notice(ref text) if text.contains("Unknown theme")));
        assert_eq!(session.theme(), "claude");

        session.handle_line("/theme replit").await;
        assert_eq!(session.theme(), "replit");
        assert_eq!(prefs.get(SELECTED_THEME_KEY).unwrap().as_deref(), Some("replit"));

        let restored = session_with(prefs, 0).await;
        assert_eq!(restored.theme(), "replit");
    }

    #[tokio::test]
    async fn test_quit_and_stats() {
        let mut session = session_with(Arc::new(MemoryPreferences::new()), 0).await;
        session.submit("hi").await;
        let SessionOutput::Notice(stats) = session.handle_line("/stats").await else {
            panic!("expected notice");
        };
        assert!(stats.starts_with("Total: 1 messages"));
        session.handle_line("/reset-stats").await;
        assert_eq!(session.core().usage_report().total_messages, 0);
        assert_eq!(session.handle_line("/quit").await, SessionOutput::Quit);
    }
}
