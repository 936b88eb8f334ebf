//! 模型加载器：把注册表中的定义实例化为后端并注册进 DispatchCore
//!
//! - 跳过禁用的定义
//! - 生效可见性：白名单非空时按成员判断，否则用定义的默认值
//! - 按 provider 创建后端；没有后端实现的 provider 跳过并告警，不计为失败
//! - 计数只用于诊断，不影响行为

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{AppConfig, ChatMode};
use crate::core::DispatchCore;
use crate::llm::{
    AssistantRunAdapter, AssistantRunSettings, CompletionAdapter, CompletionSettings, MockAdapter,
    ModelAdapter, Provider, Sleeper, Transport,
};
use crate::memory::KnowledgeSource;
use crate::models::{ModelDescriptor, ModelRegistry};

/// 按 provider 创建后端；Ok(None) 表示该 provider 暂无实现
pub trait AdapterFactory {
    fn create(
        &self,
        descriptor: &ModelDescriptor,
        visible: bool,
    ) -> anyhow::Result<Option<Box<dyn ModelAdapter>>>;
}

/// 默认工厂：openai → 直接补全或异步 Run（取决于模式与 agent_id），mock → MockAdapter
pub struct ProviderFactory {
    mode: ChatMode,
    completion: CompletionSettings,
    run: Option<AssistantRunSettings>,
    transport: Arc<dyn Transport>,
    knowledge: Arc<dyn KnowledgeSource>,
    sleeper: Arc<dyn Sleeper>,
}

impl ProviderFactory {
    pub fn new(
        config: &AppConfig,
        transport: Arc<dyn Transport>,
        knowledge: Arc<dyn KnowledgeSource>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let base_url = config.proxy.base_url().map(str::to_string);
        let agent_id = config.agent.agent_id().map(str::to_string);

        let completion = CompletionSettings {
            base_url: base_url.clone(),
            endpoint: config.proxy.knowledge_endpoint.clone(),
            system_prompt: config.api.system_prompt.clone(),
            mode: config.app.mode,
            agent_id_configured: agent_id.is_some(),
        };
        let run = agent_id.map(|agent_id| AssistantRunSettings {
            base_url,
            endpoint: config.proxy.agent_endpoint.clone(),
            agent_id,
            poll_interval: Duration::from_millis(config.agent.poll_interval_ms),
            max_poll_attempts: config.agent.max_poll_attempts,
            submit_delay: Duration::from_millis(config.agent.submit_delay_ms),
        });

        Self {
            mode: config.app.mode,
            completion,
            run,
            transport,
            knowledge,
            sleeper,
        }
    }
}

impl AdapterFactory for ProviderFactory {
    fn create(
        &self,
        descriptor: &ModelDescriptor,
        visible: bool,
    ) -> anyhow::Result<Option<Box<dyn ModelAdapter>>> {
        let profile = descriptor.profile(visible);
        let adapter: Box<dyn ModelAdapter> = match &descriptor.provider {
            Provider::OpenAi => match (&self.mode, &self.run) {
                (ChatMode::Agent, Some(run)) => Box::new(AssistantRunAdapter::new(
                    profile,
                    run.clone(),
                    self.transport.clone(),
                    self.sleeper.clone(),
                )),
                _ => Box::new(CompletionAdapter::new(
                    profile,
                    self.completion.clone(),
                    self.transport.clone(),
                    self.knowledge.clone(),
                )),
            },
            Provider::Mock => Box::new(MockAdapter::new(profile)),
            other => {
                tracing::warn!(model = %descriptor.id, provider = %other, "Provider not yet implemented");
                return Ok(None);
            }
        };
        Ok(Some(adapter))
    }
}

/// 已加载模型的摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedModel {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub visible: bool,
}

/// 加载统计（仅诊断）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub configured: usize,
    pub enabled: usize,
    /// 启用且生效可见的定义数，在创建后端之前统计（含被跳过的 provider）
    pub visible: usize,
    pub loaded: usize,
    pub failed: usize,
    pub models: Vec<LoadedModel>,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        format!(
            "configured {}, enabled {}, visible {}, loaded {}, failed {}",
            self.configured, self.enabled, self.visible, self.loaded, self.failed
        )
    }
}

pub struct ModelLoader<F> {
    factory: F,
    /// 可见白名单；为空时使用定义的默认可见性
    whitelist: Vec<String>,
    default_model: Option<String>,
    debug: bool,
}

impl<F: AdapterFactory> ModelLoader<F> {
    pub fn new(factory: F, whitelist: Vec<String>) -> Self {
        Self {
            factory,
            whitelist,
            default_model: None,
            debug: false,
        }
    }

    /// 用于加载后的提示（默认模型不可见时告警）
    pub fn with_default_model(mut self, id: Option<String>) -> Self {
        self.default_model = id;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn is_visible(&self, descriptor: &ModelDescriptor) -> bool {
        if self.whitelist.is_empty() {
            descriptor.visible
        } else {
            self.whitelist.iter().any(|id| id == &descriptor.id)
        }
    }

    /// 逐个实例化并注册；单个定义失败不影响其余定义
    pub fn load(&self, registry: &ModelRegistry, core: &mut DispatchCore) -> LoadReport {
        tracing::info!("Model loader starting...");
        let descriptors = registry.load();
        let mut report = LoadReport {
            configured: descriptors.len(),
            ..LoadReport::default()
        };

        for descriptor in &descriptors {
            if !descriptor.enabled {
                tracing::debug!(model = %descriptor.id, "Skipping disabled model");
                continue;
            }
            report.enabled += 1;

            let visible = self.is_visible(descriptor);
            if visible {
                report.visible += 1;
            }

            match self.factory.create(descriptor, visible) {
                Ok(Some(adapter)) => {
                    let name = adapter.profile().name.clone();
                    core.register_model(descriptor.id.clone(), adapter);
                    report.loaded += 1;
                    report.models.push(LoadedModel {
                        id: descriptor.id.clone(),
                        name,
                        provider: descriptor.provider.to_string(),
                        visible,
                    });
                    tracing::debug!(model = %descriptor.id, visible, "Loaded model");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(model = %descriptor.id, "Failed to load model: {:#}", e);
                    report.failed += 1;
                }
            }
        }

        if self.debug {
            tracing::info!("Model loader summary: {}", report.summary());
        }
        self.warn_on_gaps(&report);
        report
    }

    fn warn_on_gaps(&self, report: &LoadReport) {
        let visible: Vec<&str> = report
            .models
            .iter()
            .filter(|m| m.visible)
            .map(|m| m.id.as_str())
            .collect();

        if visible.is_empty() {
            tracing::warn!("No visible models! Check [models] visible in config");
        }
        if let Some(default) = &self.default_model {
            if !visible.contains(&default.as_str()) {
                tracing::warn!(model = %default, "Default model is not among visible models");
            }
        }
        let missing: Vec<&str> = self
            .whitelist
            .iter()
            .map(String::as_str)
            .filter(|id| !report.models.iter().any(|m| m.id == *id))
            .collect();
        if !missing.is_empty() {
            tracing::warn!("Whitelisted models not loaded: {}", missing.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DispatchSettings;
    use crate::llm::{LlmError, TokioSleeper};
    use crate::memory::{MemoryPreferences, StaticKnowledge};
    use crate::models::ModelConfig;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn post_json(&self, _path: &str, _body: Value) -> Result<Value, LlmError> {
            Err(LlmError::Network("offline".to_string()))
        }

        async fn get_json(&self, _path: &str) -> Result<Value, LlmError> {
            Err(LlmError::Network("offline".to_string()))
        }
    }

    fn descriptor(id: &str, provider: &str, enabled: bool, visible: bool) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            provider: Provider::from(provider.to_string()),
            name: String::new(),
            enabled,
            visible,
            config: ModelConfig::default(),
        }
    }

    fn factory(config: &AppConfig) -> ProviderFactory {
        ProviderFactory::new(
            config,
            Arc::new(NoTransport),
            Arc::new(StaticKnowledge(String::new())),
            Arc::new(TokioSleeper),
        )
    }

    fn core() -> DispatchCore {
        DispatchCore::new(DispatchSettings::default(), Arc::new(MemoryPreferences::new()))
    }

    /// 指定 id 时返回错误的工厂
    struct FlakyFactory(&'static str);

    impl AdapterFactory for FlakyFactory {
        fn create(
            &self,
            descriptor: &ModelDescriptor,
            visible: bool,
        ) -> anyhow::Result<Option<Box<dyn ModelAdapter>>> {
            if descriptor.id == self.0 {
                anyhow::bail!("construction failed");
            }
            Ok(Some(Box::new(MockAdapter::new(descriptor.profile(visible)))))
        }
    }

    #[test]
    fn test_load_counts_and_default_visibility() {
        let registry = ModelRegistry::new(vec![
            descriptor("a", "openai", true, true),
            descriptor("b", "openai", true, false),
            descriptor("c", "openai", false, true),
            descriptor("claude", "anthropic", true, true),
            descriptor("m", "mock", true, true),
        ]);
        let mut core = core();
        let report = ModelLoader::new(factory(&AppConfig::default()), Vec::new())
            .load(&registry, &mut core);

        assert_eq!(report.configured, 5);
        assert_eq!(report.enabled, 4);
        // claude 被跳过，但仍计入 visible
        assert_eq!(report.visible, 3);
        assert_eq!(report.loaded, 3);
        assert!(!report.models.iter().any(|m| m.id == "claude"));
        assert_eq!(report.failed, 0);
        assert_eq!(core.model_count(), 3);

        let ids: Vec<String> = core.available_models().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "m"]);
    }

    #[test]
    fn test_whitelist_overrides_default_visibility() {
        let registry = ModelRegistry::new(vec![
            descriptor("a", "openai", true, true),
            descriptor("b", "openai", true, false),
        ]);
        let mut core = core();
        let whitelist = vec!["b".to_string(), "zzz".to_string()];
        let report =
            ModelLoader::new(factory(&AppConfig::default()), whitelist).load(&registry, &mut core);

        assert_eq!(report.visible, 1);
        let ids: Vec<String> = core.available_models().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b"]);
        assert!(report.models.iter().any(|m| m.id == "a" && !m.visible));
    }

    #[test]
    fn test_factory_error_counts_as_failed_and_continues() {
        let registry = ModelRegistry::new(vec![
            descriptor("a", "mock", true, true),
            descriptor("broken", "mock", true, true),
            descriptor("c", "mock", true, true),
        ]);
        let mut core = core();
        let report = ModelLoader::new(FlakyFactory("broken"), Vec::new()).load(&registry, &mut core);

        assert_eq!(report.loaded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(core.model_count(), 2);
    }

    #[test]
    fn test_agent_mode_validation_depends_on_agent_id() {
        let registry = ModelRegistry::new(vec![descriptor("a", "openai", true, true)]);

        let mut config = AppConfig::default();
        config.app.mode = ChatMode::Agent;
        config.proxy.url = Some("https://proxy.example.dev".to_string());
        let mut without_agent = core();
        ModelLoader::new(factory(&config), Vec::new()).load(&registry, &mut without_agent);
        assert_eq!(
            without_agent.validate_configuration(),
            vec!["Model a: Agent mode enabled but no agent id configured".to_string()]
        );

        config.agent.agent_id = Some("asst_1".to_string());
        let mut with_agent = core();
        ModelLoader::new(factory(&config), Vec::new()).load(&registry, &mut with_agent);
        assert!(with_agent.validate_configuration().is_empty());
    }

    #[test]
    fn test_builtin_registry_loads_two_visible_openai_models() {
        let mut core = core();
        let report = ModelLoader::new(factory(&AppConfig::default()), Vec::new())
            .load(&ModelRegistry::builtin(), &mut core);
        assert_eq!(report.configured, 9);
        assert_eq!(report.enabled, 4);
        assert_eq!(report.loaded, 4);
        let ids: Vec<String> = core.available_models().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["gpt-3.5-turbo", "gpt-4o-mini"]);
    }
}
