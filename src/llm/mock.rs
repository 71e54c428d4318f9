//! Mock 补全客户端（用于测试，无需 API）
//!
//! 按脚本队列逐次弹出预设 Outcome（或错误）；队列空时回显最后一条 User 消息。
//! 同时记录每次收到的消息历史，便于测试断言工具结果确实回填进了下一轮请求。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionClient, CompletionOutcome, Message, ProviderStatus, Role};
use crate::mcp::ToolDescriptor;

/// Mock 客户端：脚本化响应 + 请求捕获
#[derive(Default)]
pub struct MockCompletionClient {
    script: Mutex<Vec<Result<CompletionOutcome, String>>>,
    captured: Mutex<Vec<Vec<Message>>>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条脚本响应，complete 按先进先出顺序弹出
    pub fn push(&self, outcome: CompletionOutcome) {
        self.script.lock().unwrap().push(Ok(outcome));
    }

    /// 追加一条脚本错误（模拟网络/提供方故障）
    pub fn push_error(&self, err: impl Into<String>) {
        self.script.lock().unwrap().push(Err(err.into()));
    }

    /// 第 n 次 complete 调用收到的消息历史快照
    pub fn captured_history(&self, n: usize) -> Option<Vec<Message>> {
        self.captured.lock().unwrap().get(n).cloned()
    }

    /// complete 被调用的总次数
    pub fn call_count(&self) -> usize {
        self.captured.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(
        &self,
        _system_prompt: &str,
        _model: &str,
        history: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<CompletionOutcome, String> {
        self.captured.lock().unwrap().push(history.to_vec());

        let mut script = self.script.lock().unwrap();
        if !script.is_empty() {
            return script.remove(0);
        }

        let last_user = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.as_deref())
            .unwrap_or("(no input)");

        Ok(CompletionOutcome::Answer {
            content: format!("Echo from Mock: {}", last_user),
            reasoning_content: None,
        })
    }

    fn provider_status(&self) -> ProviderStatus {
        ProviderStatus::Missing
    }
}
