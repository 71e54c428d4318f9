//! LLM 层：补全客户端抽象与实现（Z.ai GLM / Mock）

pub mod mock;
pub mod traits;
pub mod zai;

pub use mock::MockCompletionClient;
pub use traits::{
    CompletionClient, CompletionOutcome, Message, ProviderStatus, Role, ToolCallRequest,
};
pub use zai::{TokenUsage, ZaiClient, ZAI_BASE_URL};
