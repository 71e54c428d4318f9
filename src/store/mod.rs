//! 持久化层：Agent / 会话 / 消息转录的 SQLite 存储

pub mod transcript;

pub use transcript::{
    AgentRecord, AgentUpdate, ChatMessageRecord, McpServerResponse, NewAgent, NewAssistantMessage,
    SessionRecord, ToolUse, ToolUseStatus, TranscriptStore,
};
