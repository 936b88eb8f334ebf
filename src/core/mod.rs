//! 核心调度层：错误、事件、DispatchCore、会话驱动

pub mod dispatch;
pub mod error;
pub mod events;
pub mod session;

pub use dispatch::{DispatchCore, DispatchSettings, ModelInfo};
pub use error::DispatchError;
pub use events::DispatchEvent;
pub use session::{friendly_error, ChatSession, Command, RateLimiter, SessionOutput};
