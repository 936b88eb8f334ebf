//! 调度核心：后端注册、活动模型选择、带回退链的消息发送
//!
//! DispatchCore 独占持有所有后端（按注册顺序），由会话层显式构造并以引用传递。
//! 发送需要 `&mut self`，同一后端上不会出现并发的 send_message。
//!
//! 回退协议：活动模型失败且调用方允许回退时，按配置的回退链依次尝试其他可见模型，
//! 每个候选只尝试一次且不再嵌套回退；首个成功者的回复加上回退提示返回。
//! 全部失败时返回活动模型的原始错误。回退不会改变活动模型。

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::ModelsSection;
use crate::core::{DispatchError, DispatchEvent};
use crate::llm::{LlmError, ModelAdapter, Pricing, SendOptions, UsageReport};
use crate::memory::{Message, PreferenceStore, SELECTED_MODEL_KEY};

/// 调度参数
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// 没有已保存选择时使用的模型
    pub default_model: Option<String>,
    pub fallback_chain: Vec<String>,
    /// `{model}` 替换为回退模型 id
    pub fallback_notice: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&ModelsSection::default())
    }
}

impl DispatchSettings {
    pub fn from_config(models: &ModelsSection) -> Self {
        Self {
            default_model: models.default.clone(),
            fallback_chain: models.fallback_chain.clone(),
            fallback_notice: models.fallback_notice.clone(),
        }
    }

    pub fn with_default(mut self, id: &str) -> Self {
        self.default_model = Some(id.to_string());
        self
    }

    pub fn with_fallback_chain(mut self, chain: &[&str]) -> Self {
        self.fallback_chain = chain.iter().map(|id| id.to_string()).collect();
        self
    }
}

/// 模型描述快照（供 UI / 会话层展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub context_window: u32,
    pub pricing: Pricing,
    pub visible: bool,
    pub is_active: bool,
}

struct RegisteredModel {
    id: String,
    adapter: Box<dyn ModelAdapter>,
}

pub struct DispatchCore {
    models: Vec<RegisteredModel>,
    active: Option<String>,
    initialized: bool,
    settings: DispatchSettings,
    preferences: Arc<dyn PreferenceStore>,
    events: broadcast::Sender<DispatchEvent>,
}

impl DispatchCore {
    pub fn new(settings: DispatchSettings, preferences: Arc<dyn PreferenceStore>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            models: Vec::new(),
            active: None,
            initialized: false,
            settings,
            preferences,
            events,
        }
    }

    /// 订阅调度事件；没有订阅者时事件直接丢弃
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// 注册后端；id 已存在时替换原后端并保留原位置
    pub fn register_model(&mut self, id: impl Into<String>, adapter: Box<dyn ModelAdapter>) {
        let id = id.into();
        let visible = adapter.profile().visible;
        tracing::info!(model = %id, visible, "registering model");

        match self.position(&id) {
            Some(idx) => {
                self.models[idx].adapter = adapter;
                if !visible && self.active.as_deref() == Some(id.as_str()) {
                    tracing::warn!(model = %id, "active model replaced by an invisible one; clearing selection");
                    self.active = None;
                }
            }
            None => self.models.push(RegisteredModel { id, adapter }),
        }
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn active_model_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.models.iter().position(|m| m.id == id)
    }

    fn is_visible(&self, id: &str) -> bool {
        self.position(id)
            .map(|idx| self.models[idx].adapter.profile().visible)
            .unwrap_or(false)
    }

    fn first_visible(&self) -> Option<String> {
        self.models
            .iter()
            .find(|m| m.adapter.profile().visible)
            .map(|m| m.id.clone())
    }

    /// 启动时确定活动模型：已保存的选择 > 配置默认 > 第一个可见模型；
    /// 选中的模型不可见时改用第一个可见模型，无法初始化时依次改用其余可见模型。重复调用无效果。
    pub async fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        tracing::info!("Initializing dispatch core...");

        let saved = match self.preferences.get(SELECTED_MODEL_KEY) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!("Failed to read saved model: {}", e);
                None
            }
        };
        let requested = saved
            .or_else(|| self.settings.default_model.clone())
            .or_else(|| self.first_visible());

        let resolved = match requested {
            Some(id) if self.is_visible(&id) => Some(id),
            Some(id) => {
                let substitute = self.first_visible();
                if let Some(first) = &substitute {
                    tracing::warn!(
                        "Model '{}' is not available. Using first visible model '{}'.",
                        id,
                        first
                    );
                }
                substitute
            }
            None => None,
        };

        match resolved {
            Some(id) => {
                if !self.set_active_model(&id).await && !self.activate_any_visible(&id).await {
                    tracing::error!("No visible model could be activated");
                }
            }
            None => tracing::error!("No visible models available! Check [models] visible in config"),
        }

        self.initialized = true;
        tracing::info!("Dispatch core ready");
    }

    /// 启动模型无法激活时，按注册顺序改用其余可见模型
    async fn activate_any_visible(&mut self, failed: &str) -> bool {
        tracing::error!(model = %failed, "failed to activate startup model");
        let visible: Vec<String> = self
            .models
            .iter()
            .filter(|m| m.id != failed && m.adapter.profile().visible)
            .map(|m| m.id.clone())
            .collect();
        for id in visible {
            if self.set_active_model(&id).await {
                tracing::warn!("Model '{}' could not be activated. Using '{}'.", failed, id);
                return true;
            }
        }
        false
    }

    /// 切换活动模型；未知或不可见时返回 false 且不改变当前选择。
    /// 成功时按需初始化后端、持久化选择并发出 ActiveModelChanged。
    pub async fn set_active_model(&mut self, id: &str) -> bool {
        let Some(idx) = self.position(id) else {
            tracing::error!(model = %id, "Model not found");
            return false;
        };
        let adapter = &mut self.models[idx].adapter;
        if !adapter.profile().visible {
            tracing::error!(model = %id, "Model is not visible");
            return false;
        }

        tracing::info!(model = %id, "Switching model");
        if let Err(e) = ensure_initialized(&mut **adapter).await {
            tracing::error!(model = %id, "Model initialization failed: {}", e);
            return false;
        }

        self.active = Some(id.to_string());
        if let Err(e) = self.preferences.set(SELECTED_MODEL_KEY, id) {
            tracing::warn!("Failed to persist selected model: {}", e);
        }
        let _ = self.events.send(DispatchEvent::ActiveModelChanged { id: id.to_string() });
        tracing::info!(model = %id, "Active model set");
        true
    }

    /// 通过活动模型发送；失败时（除非 options.allow_fallback 为 false）走回退链
    pub async fn send_message(
        &mut self,
        history: &[Message],
        options: &SendOptions,
    ) -> Result<String, DispatchError> {
        let active = self.active.clone().ok_or(DispatchError::NoActiveModel)?;
        let idx = self.position(&active).ok_or(DispatchError::NoActiveModel)?;

        tracing::info!(model = %active, "Sending message");
        let adapter = &mut *self.models[idx].adapter;
        let sent = match ensure_initialized(adapter).await {
            Ok(()) => adapter.send_message(history, options).await,
            Err(e) => Err(e),
        };
        let error = match sent {
            Ok(reply) => return Ok(reply),
            Err(e) => e,
        };
        tracing::error!(model = %active, "Model error: {}", error);

        let original = DispatchError::Model {
            id: active.clone(),
            source: error,
        };
        if !options.allow_fallback {
            return Err(original);
        }
        self.try_fallback(history, options, &active, original).await
    }

    async fn try_fallback(
        &mut self,
        history: &[Message],
        options: &SendOptions,
        failed: &str,
        original: DispatchError,
    ) -> Result<String, DispatchError> {
        let single_hop = SendOptions {
            allow_fallback: false,
            ..options.clone()
        };
        let chain = self.settings.fallback_chain.clone();
        let mut tried = HashSet::new();

        for candidate in chain {
            if candidate == failed || !tried.insert(candidate.clone()) {
                continue;
            }
            let Some(idx) = self.position(&candidate) else {
                continue;
            };
            let adapter = &mut self.models[idx].adapter;
            if !adapter.profile().visible {
                continue;
            }

            tracing::warn!(model = %candidate, "Trying fallback model");
            if let Err(e) = ensure_initialized(&mut **adapter).await {
                tracing::error!(model = %candidate, "Fallback initialization failed: {}", e);
                continue;
            }
            match adapter.send_message(history, &single_hop).await {
                Ok(reply) => {
                    let _ = self.events.send(DispatchEvent::FallbackUsed {
                        failed: failed.to_string(),
                        substitute: candidate.clone(),
                    });
                    let notice = self.settings.fallback_notice.replace("{model}", &candidate);
                    return Ok(format!("{notice}\n\n{reply}"));
                }
                Err(e) => tracing::error!(model = %candidate, "Fallback failed: {}", e),
            }
        }

        Err(original)
    }

    /// 模型快照；id 为 None 时取活动模型
    pub fn model_info(&self, id: Option<&str>) -> Option<ModelInfo> {
        let id = id.or(self.active.as_deref())?;
        let model = &self.models[self.position(id)?];
        Some(self.info(model))
    }

    fn info(&self, model: &RegisteredModel) -> ModelInfo {
        let profile = model.adapter.profile();
        ModelInfo {
            id: model.id.clone(),
            name: profile.name.clone(),
            provider: profile.provider.to_string(),
            description: profile.description.clone(),
            capabilities: profile.capabilities.clone(),
            context_window: profile.context_window,
            pricing: profile.pricing,
            visible: profile.visible,
            is_active: self.active.as_deref() == Some(model.id.as_str()),
        }
    }

    /// 可见模型快照，按注册顺序
    pub fn available_models(&self) -> Vec<ModelInfo> {
        self.models
            .iter()
            .filter(|m| m.adapter.profile().visible)
            .map(|m| self.info(m))
            .collect()
    }

    /// 汇总配置问题（不报错）：无注册模型、无可见模型、各可见模型自身的问题
    pub fn validate_configuration(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.models.is_empty() {
            issues.push("No models registered".to_string());
        }
        if !self.models.iter().any(|m| m.adapter.profile().visible) {
            issues.push("No visible models".to_string());
        }
        for model in self.models.iter().filter(|m| m.adapter.profile().visible) {
            for issue in model.adapter.validate_config() {
                issues.push(format!("Model {}: {}", model.id, issue));
            }
        }
        issues
    }

    /// 汇总各后端的使用统计
    pub fn usage_report(&self) -> UsageReport {
        let mut report = UsageReport::default();
        for model in &self.models {
            if let Some(stats) = model.adapter.stats() {
                report.add(&model.id, stats);
            }
        }
        report
    }

    /// 清零所有后端统计（仅由用户显式触发）
    pub fn reset_stats(&mut self) {
        for model in &mut self.models {
            model.adapter.reset_stats();
        }
        tracing::info!("Usage statistics reset");
    }
}

/// 惰性初始化：替换注册后的后端也会在首次使用前完成初始化
async fn ensure_initialized(adapter: &mut dyn ModelAdapter) -> Result<(), LlmError> {
    if !adapter.is_initialized() {
        adapter.initialize().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AdapterProfile, LlmError, MockAdapter, Provider};
    use crate::memory::MemoryPreferences;

    fn core_with(settings: DispatchSettings) -> (DispatchCore, Arc<MemoryPreferences>) {
        let prefs = Arc::new(MemoryPreferences::new());
        (DispatchCore::new(settings, prefs.clone()), prefs)
    }

    fn provider_error(status: u16) -> LlmError {
        LlmError::Provider {
            status,
            message: format!("status {status}"),
        }
    }

    fn history() -> Vec<Message> {
        vec![Message::user("hello")]
    }

    #[test]
    fn test_available_models_visible_subset_in_order() {
        let (mut core, _) = core_with(DispatchSettings::default());
        core.register_model("c", Box::new(MockAdapter::echo("c")));
        core.register_model("hidden", Box::new(MockAdapter::echo("hidden").hidden()));
        core.register_model("a", Box::new(MockAdapter::echo("a")));
        core.register_model("b", Box::new(MockAdapter::echo("b")));

        let ids: Vec<String> = core.available_models().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(core.model_count(), 4);
    }

    #[test]
    fn test_reregistration_replaces_in_place() {
        let (mut core, _) = core_with(DispatchSettings::default());
        core.register_model("a", Box::new(MockAdapter::echo("a")));
        core.register_model("b", Box::new(MockAdapter::echo("b")));
        let replacement =
            MockAdapter::new(AdapterProfile::new("a", Provider::OpenAi).with_name("Second A"));
        core.register_model("a", Box::new(replacement));

        let models = core.available_models();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "a");
        assert_eq!(models[0].name, "Second A");
        assert_eq!(models[0].provider, "openai");
    }

    #[tokio::test]
    async fn test_set_active_model_rejects_unknown_and_invisible() {
        let (mut core, prefs) = core_with(DispatchSettings::default());
        core.register_model("a", Box::new(MockAdapter::echo("a")));
        core.register_model("hidden", Box::new(MockAdapter::echo("hidden").hidden()));

        assert!(core.set_active_model("a").await);
        assert!(!core.set_active_model("missing").await);
        assert!(!core.set_active_model("hidden").await);
        assert_eq!(core.active_model_id(), Some("a"));
        assert_eq!(prefs.get(SELECTED_MODEL_KEY).unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_set_active_model_initializes_lazily_once_and_notifies() {
        let (mut core, _) = core_with(DispatchSettings::default());
        let lazy = MockAdapter::echo("lazy").requiring_init();
        let counters = lazy.counters();
        core.register_model("lazy", Box::new(lazy));
        core.register_model("other", Box::new(MockAdapter::echo("other")));
        let mut events = core.subscribe();

        assert_eq!(counters.initializations(), 0);
        assert!(core.set_active_model("lazy").await);
        assert!(core.set_active_model("other").await);
        assert!(core.set_active_model("lazy").await);
        assert_eq!(counters.initializations(), 1);

        assert_eq!(
            events.try_recv().unwrap(),
            DispatchEvent::ActiveModelChanged { id: "lazy".to_string() }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            DispatchEvent::ActiveModelChanged { id: "other".to_string() }
        );
    }

    #[tokio::test]
    async fn test_send_without_active_model() {
        let (mut core, _) = core_with(DispatchSettings::default());
        core.register_model("a", Box::new(MockAdapter::echo("a")));
        let result = core.send_message(&history(), &SendOptions::default()).await;
        assert_eq!(result, Err(DispatchError::NoActiveModel));
    }

    #[tokio::test]
    async fn test_fallback_success_prefixes_notice_and_keeps_active() {
        let settings = DispatchSettings::default().with_fallback_chain(&["a", "b"]);
        let (mut core, prefs) = core_with(settings);
        core.register_model("a", Box::new(MockAdapter::echo("a").failing(provider_error(500))));
        core.register_model("b", Box::new(MockAdapter::echo("b").with_reply_prefix("B")));
        assert!(core.set_active_model("a").await);
        let mut events = core.subscribe();

        let reply = core
            .send_message(&history(), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "[Fallback model used: b]\n\nB: hello");
        assert_eq!(core.active_model_id(), Some("a"));
        assert_eq!(prefs.get(SELECTED_MODEL_KEY).unwrap().as_deref(), Some("a"));
        assert_eq!(
            events.try_recv().unwrap(),
            DispatchEvent::FallbackUsed {
                failed: "a".to_string(),
                substitute: "b".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_all_fallbacks_fail_surfaces_original_error() {
        let settings = DispatchSettings::default().with_fallback_chain(&["a", "b"]);
        let (mut core, _) = core_with(settings);
        core.register_model("a", Box::new(MockAdapter::echo("a").failing(provider_error(401))));
        core.register_model("b", Box::new(MockAdapter::echo("b").failing(provider_error(503))));
        assert!(core.set_active_model("a").await);

        let result = core.send_message(&history(), &SendOptions::default()).await;
        assert_eq!(
            result,
            Err(DispatchError::Model {
                id: "a".to_string(),
                source: provider_error(401)
            })
        );
    }

    #[tokio::test]
    async fn test_fallback_skips_failed_unknown_and_invisible() {
        let settings = DispatchSettings::default()
            .with_fallback_chain(&["a", "ghost", "hidden", "b", "b", "c"]);
        let (mut core, _) = core_with(settings);
        let a = MockAdapter::echo("a").failing(provider_error(500));
        let hidden = MockAdapter::echo("hidden").hidden();
        let b = MockAdapter::echo("b").failing(provider_error(500));
        let c = MockAdapter::echo("c").with_reply_prefix("C");
        let (a_calls, hidden_calls, b_calls) = (a.counters(), hidden.counters(), b.counters());
        core.register_model("a", Box::new(a));
        core.register_model("hidden", Box::new(hidden));
        core.register_model("b", Box::new(b));
        core.register_model("c", Box::new(c));
        assert!(core.set_active_model("a").await);

        let reply = core
            .send_message(&history(), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "[Fallback model used: c]\n\nC: hello");
        assert_eq!(a_calls.sends(), 1);
        assert_eq!(hidden_calls.sends(), 0);
        assert_eq!(b_calls.sends(), 1);
    }

    #[tokio::test]
    async fn test_disabled_fallback_returns_error_directly() {
        let settings = DispatchSettings::default().with_fallback_chain(&["b"]);
        let (mut core, _) = core_with(settings);
        core.register_model("a", Box::new(MockAdapter::echo("a").failing(provider_error(500))));
        let b = MockAdapter::echo("b");
        let b_calls = b.counters();
        core.register_model("b", Box::new(b));
        assert!(core.set_active_model("a").await);

        let result = core
            .send_message(&history(), &SendOptions::without_fallback())
            .await;
        assert!(matches!(result, Err(DispatchError::Model { .. })));
        assert_eq!(b_calls.sends(), 0);
    }

    #[tokio::test]
    async fn test_initialize_prefers_saved_then_default_then_first_visible() {
        let register = |core: &mut DispatchCore| {
            core.register_model("hidden", Box::new(MockAdapter::echo("hidden").hidden()));
            core.register_model("a", Box::new(MockAdapter::echo("a")));
            core.register_model("b", Box::new(MockAdapter::echo("b")));
        };

        let (mut core, prefs) = core_with(DispatchSettings::default().with_default("a"));
        prefs.set(SELECTED_MODEL_KEY, "b").unwrap();
        register(&mut core);
        core.initialize().await;
        assert_eq!(core.active_model_id(), Some("b"));

        let (mut core, _) = core_with(DispatchSettings::default().with_default("b"));
        register(&mut core);
        core.initialize().await;
        assert_eq!(core.active_model_id(), Some("b"));

        let (mut core, _) = core_with(DispatchSettings::default());
        register(&mut core);
        core.initialize().await;
        assert_eq!(core.active_model_id(), Some("a"));
    }

    #[tokio::test]
    async fn test_initialize_substitutes_invisible_choice() {
        let (mut core, prefs) = core_with(DispatchSettings::default().with_default("a"));
        prefs.set(SELECTED_MODEL_KEY, "hidden").unwrap();
        core.register_model("hidden", Box::new(MockAdapter::echo("hidden").hidden()));
        core.register_model("b", Box::new(MockAdapter::echo("b")));
        core.initialize().await;
        assert_eq!(core.active_model_id(), Some("b"));
        assert_eq!(prefs.get(SELECTED_MODEL_KEY).unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_initialize_without_visible_models_does_not_panic() {
        let (mut core, _) = core_with(DispatchSettings::default());
        core.register_model("hidden", Box::new(MockAdapter::echo("hidden").hidden()));
        core.initialize().await;
        assert!(core.is_initialized());
        assert_eq!(core.active_model_id(), None);
    }

    #[tokio::test]
    async fn test_replaced_active_adapter_is_initialized_before_send() {
        let (mut core, _) = core_with(DispatchSettings::default());
        core.register_model("a", Box::new(MockAdapter::echo("a").requiring_init()));
        assert!(core.set_active_model("a").await);

        let replacement = MockAdapter::echo("a").requiring_init();
        let counters = replacement.counters();
        core.register_model("a", Box::new(replacement));
        assert_eq!(core.active_model_id(), Some("a"));

        let reply = core
            .send_message(&history(), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "Echo: hello");
        assert_eq!(counters.initializations(), 1);
        assert_eq!(counters.sends(), 1);
    }

    #[tokio::test]
    async fn test_active_init_failure_goes_through_fallback() {
        let settings = DispatchSettings::default().with_fallback_chain(&["b"]);
        let (mut core, _) = core_with(settings);
        core.register_model("a", Box::new(MockAdapter::echo("a")));
        core.register_model("b", Box::new(MockAdapter::echo("b").with_reply_prefix("B")));
        assert!(core.set_active_model("a").await);

        let init_error = LlmError::Configuration("knowledge base unavailable".to_string());
        let broken = MockAdapter::echo("a").failing_init(init_error.clone());
        let broken_calls = broken.counters();
        core.register_model("a", Box::new(broken));

        let reply = core
            .send_message(&history(), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "[Fallback model used: b]\n\nB: hello");
        assert_eq!(broken_calls.sends(), 0);

        let result = core
            .send_message(&history(), &SendOptions::without_fallback())
            .await;
        assert_eq!(
            result,
            Err(DispatchError::Model {
                id: "a".to_string(),
                source: init_error
            })
        );
    }

    #[tokio::test]
    async fn test_initialize_moves_past_startup_model_that_cannot_start() {
        let (mut core, prefs) = core_with(DispatchSettings::default().with_default("bad"));
        let bad = MockAdapter::echo("bad").failing_init(LlmError::Network("offline".to_string()));
        let bad_calls = bad.counters();
        core.register_model("bad", Box::new(bad));
        core.register_model("hidden", Box::new(MockAdapter::echo("hidden").hidden()));
        core.register_model("good", Box::new(MockAdapter::echo("good")));

        core.initialize().await;

        assert_eq!(bad_calls.initializations(), 1);
        assert_eq!(core.active_model_id(), Some("good"));
        assert_eq!(prefs.get(SELECTED_MODEL_KEY).unwrap().as_deref(), Some("good"));
        let reply = core
            .send_message(&history(), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "Echo: hello");
    }

    #[tokio::test]
    async fn test_initialize_with_only_unstartable_models_leaves_no_active() {
        let (mut core, _) = core_with(DispatchSettings::default());
        let err = LlmError::Network("offline".to_string());
        core.register_model("x", Box::new(MockAdapter::echo("x").failing_init(err.clone())));
        core.register_model("y", Box::new(MockAdapter::echo("y").failing_init(err)));

        core.initialize().await;

        assert!(core.is_initialized());
        assert_eq!(core.active_model_id(), None);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (mut core, _) = core_with(DispatchSettings::default());
        let lazy = MockAdapter::echo("lazy").requiring_init();
        let counters = lazy.counters();
        core.register_model("lazy", Box::new(lazy));
        let mut events = core.subscribe();

        core.initialize().await;
        core.initialize().await;

        assert_eq!(counters.initializations(), 1);
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_model_info_defaults_to_active() {
        let (mut core, _) = core_with(DispatchSettings::default());
        core.register_model(
            "a",
            Box::new(MockAdapter::new(
                AdapterProfile::new("a", Provider::OpenAi)
                    .with_name("Model A")
                    .with_capabilities(&["chat", "coding"])
                    .with_context_window(8192),
            )),
        );
        assert!(core.model_info(None).is_none());
        assert!(core.set_active_model("a").await);

        let info = core.model_info(None).unwrap();
        assert_eq!(info.id, "a");
        assert_eq!(info.name, "Model A");
        assert_eq!(info.capabilities, vec!["chat", "coding"]);
        assert_eq!(info.context_window, 8192);
        assert!(info.is_active);
        assert!(core.model_info(Some("missing")).is_none());
    }

    #[test]
    fn test_validate_configuration_aggregates() {
        let (core, _) = core_with(DispatchSettings::default());
        assert_eq!(
            core.validate_configuration(),
            vec!["No models registered".to_string(), "No visible models".to_string()]
        );

        let (mut core, _) = core_with(DispatchSettings::default());
        core.register_model("a", Box::new(MockAdapter::echo("a").with_issues(&["Missing proxy URL"])));
        core.register_model(
            "hidden",
            Box::new(MockAdapter::echo("hidden").hidden().with_issues(&["ignored"])),
        );
        assert_eq!(
            core.validate_configuration(),
            vec!["Model a: Missing proxy URL".to_string()]
        );
    }

    #[tokio::test]
    async fn test_usage_report_and_reset() {
        let (mut core, _) = core_with(DispatchSettings::default());
        core.register_model("a", Box::new(MockAdapter::echo("a")));
        core.register_model("b", Box::new(MockAdapter::echo("b")));
        assert!(core.set_active_model("a").await);
        core.send_message(&history(), &SendOptions::default()).await.unwrap();
        core.send_message(&history(), &SendOptions::default()).await.unwrap();

        let report = core.usage_report();
        assert_eq!(report.total_messages, 2);
        assert_eq!(report.per_model.len(), 2);

        core.reset_stats();
        assert_eq!(core.usage_report().total_messages, 0);
    }
}
