//! Z.ai GLM 客户端（OpenAI 兼容格式）
//!
//! 通过 async_openai 调用 Z.ai coding 端点（可配置 base_url）。响应里的 reasoning_content
//! 是 GLM 扩展字段，async_openai 的内置类型不携带，因此请求/响应用本地 wire 类型
//! 走 BYOT（create_byot）收发；请求整体套 tokio 超时，超时与传输错误以字符串上抛。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{CompletionClient, CompletionOutcome, Message, ProviderStatus, Role, ToolCallRequest};
use crate::mcp::ToolDescriptor;

/// Z.ai API 常量
pub const ZAI_BASE_URL: &str = "https://api.z.ai/api/coding/paas/v4";
/// 单次补全的输出上限
const MAX_COMPLETION_TOKENS: u32 = 2000;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

// ---- wire 类型：与 Z.ai 的 chat/completions 请求/响应一一对应 ----

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "default_call_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn default_call_kind() -> String {
    "function".to_string()
}

/// arguments 在 wire 上是 JSON 编码的字符串，解析失败按畸形载荷处理
#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Z.ai 客户端：持有 Client、温度与请求超时，complete 时转本地消息为 wire 格式并解析首个 choice
pub struct ZaiClient {
    client: Client<OpenAIConfig>,
    api_key_len: usize,
    temperature: f32,
    request_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl ZaiClient {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        temperature: f32,
        request_timeout_secs: u64,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(base_url.unwrap_or(ZAI_BASE_URL))
            .with_api_key(api_key);

        Self {
            client: Client::with_config(config),
            api_key_len: api_key.len(),
            temperature,
            request_timeout: Duration::from_secs(request_timeout_secs),
            usage: TokenUsage::new(),
        }
    }

    fn to_wire_messages(system_prompt: &str, history: &[Message]) -> Vec<WireMessage> {
        let mut out = Vec::with_capacity(history.len() + 1);
        out.push(WireMessage {
            role: Role::System.as_str(),
            content: Some(system_prompt.to_string()),
            tool_call_id: None,
            tool_calls: None,
        });
        for m in history {
            out.push(WireMessage {
                role: m.role.as_str(),
                content: m.content.clone(),
                tool_call_id: m.tool_call_id.clone(),
                tool_calls: m.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|c| WireToolCall {
                            id: c.id.clone(),
                            kind: "function".to_string(),
                            function: WireFunctionCall {
                                name: c.name.clone(),
                                arguments: c.arguments.to_string(),
                            },
                        })
                        .collect()
                }),
            });
        }
        out
    }

    fn to_wire_tools(tools: &[ToolDescriptor]) -> Option<Vec<WireTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect(),
        )
    }

    /// 解析首个 choice：有 tool_calls 则一律为 ToolCalls 分支，即使同时带了部分 content
    fn parse_choice(message: WireResponseMessage) -> Result<CompletionOutcome, String> {
        match message.tool_calls {
            Some(calls) if !calls.is_empty() => {
                let mut parsed = Vec::with_capacity(calls.len());
                for c in calls {
                    let arguments: Value = serde_json::from_str(&c.function.arguments)
                        .map_err(|e| {
                            format!("malformed tool_call arguments for '{}': {}", c.function.name, e)
                        })?;
                    parsed.push(ToolCallRequest {
                        id: c.id,
                        name: c.function.name,
                        arguments,
                    });
                }
                Ok(CompletionOutcome::ToolCalls {
                    calls: parsed,
                    partial_content: message.content.filter(|s| !s.is_empty()),
                    reasoning_content: message.reasoning_content,
                })
            }
            _ => {
                let content = message.content.unwrap_or_default();
                if content.is_empty() && message.reasoning_content.is_none() {
                    return Err("empty completion: no content, no tool_calls".to_string());
                }
                Ok(CompletionOutcome::Answer {
                    content,
                    reasoning_content: message.reasoning_content,
                })
            }
        }
    }
}

#[async_trait]
impl CompletionClient for ZaiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        model: &str,
        history: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionOutcome, String> {
        let request = WireRequest {
            model,
            messages: Self::to_wire_messages(system_prompt, history),
            tools: Self::to_wire_tools(tools),
            temperature: self.temperature,
            max_tokens: MAX_COMPLETION_TOKENS,
        };

        let response: WireResponse = tokio::time::timeout(
            self.request_timeout,
            self.client.chat().create_byot(request),
        )
        .await
        .map_err(|_| format!("request timed out after {:?}", self.request_timeout))?
        .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| "malformed payload: empty choices".to_string())?;

        Self::parse_choice(choice.message)
    }

    fn provider_status(&self) -> ProviderStatus {
        if self.api_key_len == 0 {
            ProviderStatus::Missing
        } else {
            ProviderStatus::Configured {
                key_length: self.api_key_len,
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_message(json: &str) -> WireResponseMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_answer_with_reasoning() {
        let msg = response_message(
            r#"{"content": "Hi there", "reasoning_content": "greeting detected"}"#,
        );
        match ZaiClient::parse_choice(msg).unwrap() {
            CompletionOutcome::Answer {
                content,
                reasoning_content,
            } => {
                assert_eq!(content, "Hi there");
                assert_eq!(reasoning_content.as_deref(), Some("greeting detected"));
            }
            _ => panic!("Expected Answer"),
        }
    }

    #[test]
    fn test_tool_calls_win_over_partial_content() {
        let msg = response_message(
            r#"{"content": "let me check", "tool_calls": [
                {"id": "call_1", "type": "function",
                 "function": {"name": "calculate_solar_impact", "arguments": "{\"rm\": 600}"}}
            ]}"#,
        );
        match ZaiClient::parse_choice(msg).unwrap() {
            CompletionOutcome::ToolCalls {
                calls,
                partial_content,
                ..
            } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "calculate_solar_impact");
                assert_eq!(calls[0].arguments["rm"], 600);
                assert_eq!(partial_content.as_deref(), Some("let me check"));
            }
            _ => panic!("Expected ToolCalls"),
        }
    }

    #[test]
    fn test_malformed_arguments_is_error() {
        let msg = response_message(
            r#"{"tool_calls": [
                {"id": "call_1", "type": "function",
                 "function": {"name": "echo", "arguments": "not json"}}
            ]}"#,
        );
        let err = ZaiClient::parse_choice(msg).unwrap_err();
        assert!(err.contains("malformed"));
    }

    #[test]
    fn test_empty_completion_is_error() {
        let msg = response_message(r#"{}"#);
        assert!(ZaiClient::parse_choice(msg).is_err());
    }
}
