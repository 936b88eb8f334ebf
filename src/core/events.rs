//! 调度事件：单向通知 UI / 会话层，发送端从不等待接收方

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// 活动模型已切换
    ActiveModelChanged { id: String },
    /// 活动模型失败，本次回复由回退模型给出（活动模型不变）
    FallbackUsed { failed: String, substitute: String },
}
