//! 补全客户端抽象
//!
//! 所有后端（Z.ai GLM / Mock）实现 CompletionClient：一次 complete 调用返回 CompletionOutcome。
//! Outcome 是带标签的变体：Answer（最终回答）或 ToolCalls（工具调用请求），
//! 调用方必须显式匹配分支，不能把带工具调用的响应当成最终回答。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::ToolDescriptor;

/// 消息角色（与 OpenAI 兼容 API 一致；Tool 为工具结果回填）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 单条消息；assistant 消息可携带 tool_calls，tool 消息须携带对应的 tool_call_id
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// 请求了工具调用的 assistant 消息（content 可为空）
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_call_id: None,
            tool_calls: Some(calls),
        }
    }

    /// 工具结果消息，回填给下一轮补全
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }
}

/// 模型请求的一次工具调用：id 用于结果回填配对，arguments 为已解析的 JSON 对象
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// 一次补全的结果：要么是最终回答，要么是工具调用请求
///
/// ToolCalls 分支可能附带 partial_content，但它不是最终回答；
/// reasoning_content 在两个分支中都与 content 严格分离，持久化时不得互相替代。
#[derive(Clone, Debug)]
pub enum CompletionOutcome {
    Answer {
        content: String,
        reasoning_content: Option<String>,
    },
    ToolCalls {
        calls: Vec<ToolCallRequest>,
        partial_content: Option<String>,
        reasoning_content: Option<String>,
    },
}

/// 供健康检查上报的后端状态
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ProviderStatus {
    /// API Key 已配置（key_length 便于排查截断的密钥）
    Configured { key_length: usize },
    Missing,
}

/// 补全客户端 trait：单次请求/响应，失败以字符串描述返回，由编排器统一转 ChatError::Provider
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        model: &str,
        history: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionOutcome, String>;

    /// 健康检查用的静态状态，不发起网络请求
    fn provider_status(&self) -> ProviderStatus;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
