//! 知识库：把若干文本文件拼接成一段参考资料，注入直接补全后端的系统提示
//!
//! 文件名为 `{dir}/{file_prefix}{name}.txt`；缺失或空白文件跳过，全部缺失时返回空串。

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::KnowledgeBaseSection;

/// 知识来源：返回已格式化的参考文本块（可能为空）
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<String>;
}

/// 固定文本
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledge(pub String);

#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn load(&self) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

/// 从目录读取的知识库
#[derive(Debug, Clone)]
pub struct FileKnowledgeBase {
    section: KnowledgeBaseSection,
}

impl FileKnowledgeBase {
    pub fn new(section: KnowledgeBaseSection) -> Self {
        Self { section }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let dir = self
            .section
            .dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join(format!("{}{}.txt", self.section.file_prefix, name))
    }
}

#[async_trait]
impl KnowledgeSource for FileKnowledgeBase {
    async fn load(&self) -> anyhow::Result<String> {
        if !self.section.enabled {
            tracing::info!("Knowledge base is disabled");
            return Ok(String::new());
        }

        let mut loaded = 0usize;
        let mut all = String::new();
        for file in &self.section.files {
            let path = self.path_for(&file.name);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) if !content.trim().is_empty() => {
                    all.push_str(&format!(
                        "\n\n=== {} ===\n{}",
                        file.description.to_uppercase(),
                        content
                    ));
                    loaded += 1;
                    tracing::debug!(path = %path.display(), "knowledge file loaded");
                }
                Ok(_) => tracing::warn!("Knowledge file is empty: {}", path.display()),
                Err(e) => tracing::warn!("Could not load {}: {}", path.display(), e),
            }
        }

        if loaded == 0 {
            tracing::warn!("No knowledge files were loaded");
            return Ok(String::new());
        }

        tracing::info!("Knowledge base ready ({} files loaded)", loaded);
        Ok(self.section.context_template.replace("{knowledge}", &all))
    }
}
