//! Switchyard - 多模型对话调度
//!
//! 入口：加载配置与日志，按注册表加载模型，初始化 DispatchCore，然后逐行读取 stdin 对话。
//! 用法：`switchyard [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use switchyard::config::{load_config, AppConfig, StorageBackend};
use switchyard::core::{ChatSession, DispatchCore, DispatchEvent, DispatchSettings, SessionOutput};
use switchyard::llm::{ProxyClient, TokioSleeper, Transport};
use switchyard::memory::{
    FileKnowledgeBase, JsonFilePreferences, KnowledgeSource, MemoryPreferences, PreferenceStore,
    SqlitePreferences,
};
use switchyard::models::{ModelLoader, ModelRegistry, ProviderFactory};
use switchyard::observability;

fn preference_store(config: &AppConfig) -> anyhow::Result<Arc<dyn PreferenceStore>> {
    let store: Arc<dyn PreferenceStore> = match config.storage.backend {
        StorageBackend::Json => Arc::new(JsonFilePreferences::new(&config.storage.path)),
        StorageBackend::Sqlite => Arc::new(
            SqlitePreferences::open(&config.storage.path).context("open preference database")?,
        ),
        StorageBackend::Memory => Arc::new(MemoryPreferences::new()),
    };
    Ok(store)
}

fn registry(config: &AppConfig) -> anyhow::Result<ModelRegistry> {
    match &config.models.registry_path {
        Some(path) => ModelRegistry::from_file(path),
        None => Ok(ModelRegistry::builtin()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    observability::init(config.app.debug);
    tracing::info!(mode = ?config.app.mode, "Starting {}", config.app.name);

    let preferences = preference_store(&config)?;
    let transport: Arc<dyn Transport> = Arc::new(
        ProxyClient::new(
            config.proxy.base_url().unwrap_or_default(),
            config.proxy.timeout_secs,
        )
        .context("Failed to build proxy client")?,
    );
    let knowledge: Arc<dyn KnowledgeSource> =
        Arc::new(FileKnowledgeBase::new(config.knowledge_base.clone()));

    let mut core = DispatchCore::new(
        DispatchSettings::from_config(&config.models),
        preferences.clone(),
    );
    let factory = ProviderFactory::new(&config, transport, knowledge, Arc::new(TokioSleeper));
    let report = ModelLoader::new(factory, config.models.visible.clone())
        .with_default_model(config.models.default.clone())
        .with_debug(config.app.debug)
        .load(&registry(&config)?, &mut core);
    tracing::info!("Models loaded: {}", report.summary());

    let mut events = core.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(DispatchEvent::ActiveModelChanged { id }) => {
                    tracing::debug!(model = %id, "active model changed")
                }
                Ok(DispatchEvent::FallbackUsed { failed, substitute }) => {
                    tracing::warn!(%failed, %substitute, "fallback model answered")
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event receiver lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    core.initialize().await;
    let issues = core.validate_configuration();
    if !issues.is_empty() {
        println!("Configuration issues:");
        for issue in &issues {
            println!("  - {issue}");
        }
    }

    let mut session = ChatSession::new(core, preferences, &config.session);
    if let SessionOutput::Notice(models) = session.handle_line("/models").await {
        println!("Available models:\n{models}");
    }
    println!("Type a message, or /help for commands.");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match session.handle_line(&line).await {
            SessionOutput::Reply(text) => println!("{text}\n"),
            SessionOutput::Notice(text) => println!("{text}"),
            SessionOutput::Quit => break,
            SessionOutput::Nothing => {}
        }
    }

    tracing::info!("Goodbye");
    Ok(())
}
