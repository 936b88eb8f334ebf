//! 调度层错误
//!
//! 后端错误原样包在 Model 中向上传递；回退链全部失败时返回的是最初活动模型的错误。

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("No active model selected")]
    NoActiveModel,

    /// 引用了未注册或不可见的模型
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("{source}")]
    Model { id: String, source: LlmError },
}

impl DispatchError {
    /// 后端错误（若有）
    pub fn llm_error(&self) -> Option<&LlmError> {
        match self {
            DispatchError::Model { source, .. } => Some(source),
            _ => None,
        }
    }

    /// 出错的模型 id（若有）
    pub fn model_id(&self) -> Option<&str> {
        match self {
            DispatchError::Model { id, .. } => Some(id),
            DispatchError::UnknownModel(id) => Some(id),
            DispatchError::NoActiveModel => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_displays_root_cause() {
        let err = DispatchError::Model {
            id: "gpt-4".to_string(),
            source: LlmError::Provider {
                status: 429,
                message: "slow down".to_string(),
            },
        };
        assert_eq!(err.to_string(), "Provider error (429): slow down");
        assert_eq!(err.model_id(), Some("gpt-4"));
        assert_eq!(err.llm_error().and_then(LlmError::status), Some(429));
    }

    #[test]
    fn test_no_active_model_display() {
        assert_eq!(
            DispatchError::NoActiveModel.to_string(),
            "No active model selected"
        );
        assert!(DispatchError::NoActiveModel.llm_error().is_none());
    }
}
