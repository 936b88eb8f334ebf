//! LLM 层：后端抽象与实现（直接补全 / 异步 Run / Mock）、代理传输、使用统计

pub mod assistant_run;
pub mod clock;
pub mod completion;
pub mod mock;
pub mod traits;
pub mod transport;
pub mod usage;

pub use assistant_run::{AssistantRunAdapter, AssistantRunSettings, RunPoll, RunState, RunStatus};
pub use clock::{Sleeper, TokioSleeper};
pub use completion::{CompletionAdapter, CompletionSettings};
pub use mock::{MockAdapter, MockCounters};
pub use traits::{AdapterProfile, LlmError, ModelAdapter, Pricing, Provider, SendOptions};
pub use transport::{ProxyClient, Transport};
pub use usage::{UsageReport, UsageStats};
