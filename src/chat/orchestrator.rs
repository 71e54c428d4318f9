//! 对话编排主循环
//!
//! 一条用户消息 -> 加载会话与 Agent -> 有界轮次循环（补全 -> 工具调用 -> 结果回填 -> 再补全）
//! -> 最终回答或降级回答 -> 单事务落库 user + assistant 两行。
//! 同一会话的轮次串行（前一轮落库前后一轮不开始读历史），不同会话互不影响；
//! 支持取消：落库前取消则整轮不留任何转录。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::ChatError;
use crate::llm::{CompletionClient, CompletionOutcome, Message};
use crate::mcp::ToolExecutor;
use crate::store::{
    ChatMessageRecord, McpServerResponse, NewAssistantMessage, ToolUse, ToolUseStatus,
    TranscriptStore,
};

/// 轮次结果状态：正常完成，或触达轮数上限后的降级回答
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    RoundLimitExceeded,
}

/// handle_turn 的返回：已落库的 assistant 消息与轮次状态
#[derive(Debug)]
pub struct TurnOutcome {
    pub message: ChatMessageRecord,
    pub status: TurnStatus,
}

/// 编排器：持有补全客户端、工具执行器与转录存储，全部由构造注入
pub struct Orchestrator {
    llm: Arc<dyn CompletionClient>,
    executor: ToolExecutor,
    store: Arc<TranscriptStore>,
    max_rounds: usize,
    /// 会话级串行锁：session_id -> 轮次互斥量
    session_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn CompletionClient>,
        executor: ToolExecutor,
        store: Arc<TranscriptStore>,
        max_rounds: usize,
    ) -> Self {
        Self {
            llm,
            executor,
            store,
            max_rounds: max_rounds.max(1),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    async fn session_lock(&self, session_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 处理一条用户消息，返回已落库的 assistant 消息
    ///
    /// 错误语义：Validation（空消息/会话不存在）与 RoundLimitExceeded 在内部消化，
    /// 后者转为降级回答；Provider / Persistence / Cancelled 上抛且不落库任何转录。
    pub async fn handle_turn(
        &self,
        session_id: i64,
        user_text: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(ChatError::Validation("message is empty".to_string()));
        }

        // 会话级串行：上一轮落库（或失败）前，不读取历史
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let session = self
            .store
            .get_session(session_id)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?
            .ok_or_else(|| ChatError::Validation(format!("session {session_id} not found")))?;
        let agent = self
            .store
            .get_agent(session.agent_id)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?
            .ok_or_else(|| {
                ChatError::Validation(format!("agent for session {session_id} not found"))
            })?;

        let turn_id = uuid::Uuid::new_v4();
        tracing::info!(turn = %turn_id, session_id, agent = %agent.name, "turn started");

        // 历史 + 待提交的用户消息（此刻尚未落库）
        let mut messages = self.load_history(session_id).await?;
        messages.push(Message::user(user_text));

        let tools = self.executor.descriptors();
        let mut tools_used: Vec<ToolUse> = Vec::new();
        let mut mcp_responses: Vec<McpServerResponse> = Vec::new();
        let mut last_partial: Option<String> = None;
        let mut last_reasoning: Option<String> = None;
        let mut answer: Option<(String, Option<String>)> = None;

        for round in 0..self.max_rounds {
            if cancel.is_cancelled() {
                return Err(ChatError::Cancelled);
            }

            let outcome = self
                .llm
                .complete(&agent.system_prompt, &agent.model, &messages, &tools)
                .await
                .map_err(ChatError::Provider)?;

            match outcome {
                CompletionOutcome::Answer {
                    content,
                    reasoning_content,
                } => {
                    answer = Some((content, reasoning_content));
                    break;
                }
                CompletionOutcome::ToolCalls {
                    calls,
                    partial_content,
                    reasoning_content,
                } => {
                    tracing::info!(
                        turn = %turn_id,
                        round,
                        count = calls.len(),
                        "completion requested tool calls"
                    );
                    if let Some(p) = partial_content.clone() {
                        last_partial = Some(p);
                    }
                    if let Some(r) = reasoning_content {
                        last_reasoning = Some(r);
                    }

                    messages.push(Message::assistant_tool_calls(partial_content, calls.clone()));

                    for call in calls {
                        // 工具失败不终止轮次：失败文本作为 observation 回填，模型能看到
                        let observation =
                            match self.executor.execute(&call.name, call.arguments.clone()).await {
                                Ok(result) => {
                                    tools_used.push(ToolUse {
                                        name: call.name.clone(),
                                        arguments: call.arguments,
                                        status: ToolUseStatus::Ok,
                                    });
                                    result
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        turn = %turn_id,
                                        tool = %call.name,
                                        error = %e,
                                        "tool call failed"
                                    );
                                    tools_used.push(ToolUse {
                                        name: call.name.clone(),
                                        arguments: call.arguments,
                                        status: ToolUseStatus::Error,
                                    });
                                    format!("Error: {e}")
                                }
                            };
                        mcp_responses.push(McpServerResponse {
                            tool: call.name,
                            raw: observation.clone(),
                        });
                        messages.push(Message::tool_result(call.id, observation));
                    }
                }
            }
        }

        let (content, reasoning_content, status) = match answer {
            Some((content, reasoning)) => {
                // reasoning-only 回答时 content 落库为 NULL，两字段不得互相顶替
                let content = if content.is_empty() { None } else { Some(content) };
                (content, reasoning, TurnStatus::Completed)
            }
            None => {
                let err = ChatError::RoundLimitExceeded(self.max_rounds);
                tracing::warn!(turn = %turn_id, session_id, error = %err, "tool-call loop did not converge");
                let mut text = format!(
                    "I could not reach a final answer within {} tool rounds; the results gathered so far may be incomplete.",
                    self.max_rounds
                );
                if let Some(partial) = &last_partial {
                    text.push_str("\n\nLast partial response:\n");
                    text.push_str(partial);
                }
                (Some(text), last_reasoning, TurnStatus::RoundLimitExceeded)
            }
        };

        // 落库前最后一次取消检查：取消则 user+assistant 一行都不写
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let record = self
            .store
            .commit_turn(
                session_id,
                user_text,
                NewAssistantMessage {
                    content,
                    reasoning_content,
                    tools_used,
                    mcp_server_responses: mcp_responses,
                },
            )
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?;

        tracing::info!(turn = %turn_id, session_id, status = ?status, "turn committed");
        Ok(TurnOutcome {
            message: record,
            status,
        })
    }

    /// 已落库的转录 -> 补全消息序列（system prompt 由补全客户端负责前置）
    async fn load_history(&self, session_id: i64) -> Result<Vec<Message>, ChatError> {
        let history = self
            .store
            .session_history(session_id)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?;

        Ok(history
            .into_iter()
            .filter_map(|m| {
                let content = m.content?;
                match m.role.as_str() {
                    "user" => Some(Message::user(content)),
                    "assistant" => Some(Message::assistant(content)),
                    _ => None,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockCompletionClient;
    use crate::mcp::ToolRegistry;
    use crate::store::NewAgent;

    async fn orchestrator_with_mock() -> (Arc<MockCompletionClient>, Orchestrator, i64) {
        let store = Arc::new(TranscriptStore::in_memory().await.unwrap());
        let agent = store
            .create_agent(NewAgent {
                name: "Helper".to_string(),
                description: None,
                system_prompt: "Be helpful.".to_string(),
                model: "glm-4.5".to_string(),
                temperature: 0.7,
            })
            .await
            .unwrap();
        let session = store.create_session("t", agent.id).await.unwrap();

        let mock = Arc::new(MockCompletionClient::new());
        let executor = ToolExecutor::new(ToolRegistry::new(), 5);
        let orchestrator = Orchestrator::new(mock.clone(), executor, store, 3);
        (mock, orchestrator, session.id)
    }

    #[tokio::test]
    async fn test_empty_message_is_validation_error() {
        let (_, orchestrator, session_id) = orchestrator_with_mock().await;
        let err = orchestrator
            .handle_turn(session_id, "   ", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_session_is_validation_error() {
        let (_, orchestrator, _) = orchestrator_with_mock().await;
        let err = orchestrator
            .handle_turn(404, "Hello", CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ChatError::Validation(msg) => assert!(msg.contains("session")),
            _ => panic!("Expected Validation"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_turn_persists_nothing() {
        let (_, orchestrator, session_id) = orchestrator_with_mock().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orchestrator
            .handle_turn(session_id, "Hello", cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Cancelled));

        let history = orchestrator.store().session_history(session_id).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_reasoning_only_answer_keeps_content_null() {
        let (mock, orchestrator, session_id) = orchestrator_with_mock().await;
        mock.push(CompletionOutcome::Answer {
            content: String::new(),
            reasoning_content: Some("thinking out loud".to_string()),
        });

        let outcome = orchestrator
            .handle_turn(session_id, "Hello", CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.message.content.is_none());
        assert_eq!(
            outcome.message.reasoning_content.as_deref(),
            Some("thinking out loud")
        );
    }
}
