//! Switchyard - 多模型对话调度核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: DispatchCore（注册、活动模型、回退链）、调度事件、会话驱动
//! - **llm**: 后端抽象与实现（直接补全 / 异步 Run / Mock）、代理传输、使用统计
//! - **memory**: 对话历史、知识库、偏好持久化
//! - **models**: 模型注册表与加载器
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod models;
pub mod observability;

pub use crate::core::{ChatSession, DispatchCore, DispatchError, DispatchEvent};
