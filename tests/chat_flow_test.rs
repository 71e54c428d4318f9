//! 对话编排集成测试
//!
//! 用 Mock 补全客户端 + 内存 SQLite 走完整轮次：普通问答、工具调用、
//! 提供方故障、轮数耗尽与会话串行。

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use nectar::chat::{Orchestrator, TurnStatus};
    use nectar::core::ChatError;
    use nectar::llm::{CompletionOutcome, MockCompletionClient, Role, ToolCallRequest};
    use nectar::mcp::{
        ArgKind, ArgumentSchema, BillRecord, BillTable, McpTool, SolarImpactTool, ToolExecutor,
        ToolRegistry,
    };
    use nectar::store::{NewAgent, ToolUseStatus, TranscriptStore};

    struct FailingTool;

    #[async_trait]
    impl McpTool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn schema(&self) -> ArgumentSchema {
            ArgumentSchema::new().required("rm", ArgKind::Number, "amount")
        }

        async fn call(&self, _args: Value) -> Result<String, String> {
            Err("backend unavailable".to_string())
        }
    }

    fn bill_table() -> Arc<BillTable> {
        Arc::new(
            BillTable::from_records(vec![
                BillRecord { kwh: 300.0, bill: 77.00 },
                BillRecord { kwh: 900.0, bill: 395.60 },
                BillRecord { kwh: 1300.0, bill: 624.00 },
            ])
            .unwrap(),
        )
    }

    fn solar_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(SolarImpactTool::new(bill_table()));
        registry
    }

    fn tool_call(id: &str, name: &str, args: Value) -> CompletionOutcome {
        CompletionOutcome::ToolCalls {
            calls: vec![ToolCallRequest {
                id: id.to_string(),
                name: name.to_string(),
                arguments: args,
            }],
            partial_content: None,
            reasoning_content: None,
        }
    }

    async fn fixture(
        registry: ToolRegistry,
        max_rounds: usize,
    ) -> (Arc<MockCompletionClient>, Orchestrator, i64) {
        let store = Arc::new(TranscriptStore::in_memory().await.unwrap());
        let agent = store
            .create_agent(NewAgent {
                name: "Solar Expert".to_string(),
                description: None,
                system_prompt: "Use the solar calculator for bill questions.".to_string(),
                model: "glm-4.5".to_string(),
                temperature: 0.7,
            })
            .await
            .unwrap();
        let session = store.create_session("chat", agent.id).await.unwrap();

        let mock = Arc::new(MockCompletionClient::new());
        let executor = ToolExecutor::new(registry, 5);
        let orchestrator = Orchestrator::new(mock.clone(), executor, store, max_rounds);
        (mock, orchestrator, session.id)
    }

    #[tokio::test]
    async fn test_simple_qa_single_round() {
        let (mock, orchestrator, session_id) = fixture(ToolRegistry::new(), 5).await;
        mock.push(CompletionOutcome::Answer {
            content: "Hi there".to_string(),
            reasoning_content: None,
        });

        let outcome = orchestrator
            .handle_turn(session_id, "Hello", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.message.content.as_deref(), Some("Hi there"));
        assert!(outcome.message.tools_used.is_empty());
        assert!(outcome.message.mcp_server_responses.is_empty());
        assert_eq!(mock.call_count(), 1);

        let history = orchestrator.store().session_history(session_id).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_tool_mandated_calculation() {
        let (mock, orchestrator, session_id) = fixture(solar_registry(), 5).await;
        mock.push(tool_call("call_1", "calculate_solar_impact", json!({"rm": 600})));
        mock.push(CompletionOutcome::Answer {
            content: "Based on the official calculation, your savings are in the result above."
                .to_string(),
            reasoning_content: None,
        });

        let outcome = orchestrator
            .handle_turn(session_id, "My bill is RM600", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.message.tools_used.len(), 1);
        assert_eq!(outcome.message.tools_used[0].name, "calculate_solar_impact");
        assert_eq!(outcome.message.tools_used[0].status, ToolUseStatus::Ok);
        assert_eq!(outcome.message.mcp_server_responses.len(), 1);
        assert!(outcome.message.mcp_server_responses[0]
            .raw
            .contains("[OFFICIAL MCP CALCULATION RESULT]"));

        // 第二轮请求必须带上工具结果
        assert_eq!(mock.call_count(), 2);
        let second_round = mock.captured_history(1).unwrap();
        let tool_msg = second_round
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool result fed back into round 2");
        assert!(tool_msg
            .content
            .as_deref()
            .unwrap()
            .contains("[OFFICIAL MCP CALCULATION RESULT]"));
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_tool_failure_fed_back_not_aborting() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool);
        let (mock, orchestrator, session_id) = fixture(registry, 5).await;
        mock.push(tool_call("call_1", "failing", json!({"rm": 600})));
        mock.push(CompletionOutcome::Answer {
            content: "The calculator is unavailable right now.".to_string(),
            reasoning_content: None,
        });

        let outcome = orchestrator
            .handle_turn(session_id, "My bill is RM600", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.message.tools_used[0].status, ToolUseStatus::Error);

        // 失败以 observation 的形式进入下一轮，模型能看到
        let second_round = mock.captured_history(1).unwrap();
        let tool_msg = second_round.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.as_deref().unwrap().starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_provider_outage_persists_nothing() {
        let (mock, orchestrator, session_id) = fixture(ToolRegistry::new(), 5).await;
        mock.push_error("connection refused");

        let err = orchestrator
            .handle_turn(session_id, "Hello", CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ChatError::Provider(msg) => assert!(msg.contains("connection refused")),
            other => panic!("Expected Provider error, got {other:?}"),
        }

        let history = orchestrator.store().session_history(session_id).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_round_exhaustion_is_degraded_not_absent() {
        let (mock, orchestrator, session_id) = fixture(solar_registry(), 3).await;
        // 病态配置：每一轮都请求工具调用
        for i in 0..3 {
            mock.push(tool_call(
                &format!("call_{i}"),
                "calculate_solar_impact",
                json!({"rm": 600}),
            ));
        }

        let outcome = orchestrator
            .handle_turn(session_id, "My bill is RM600", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, TurnStatus::RoundLimitExceeded);
        let content = outcome.message.content.as_deref().unwrap();
        assert!(content.contains("3 tool rounds"));
        // 所有尝试过的调用都在 tools_used 里
        assert_eq!(outcome.message.tools_used.len(), 3);

        // 恰好落库一对 user + assistant
        let history = orchestrator.store().session_history(session_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
    }

    #[tokio::test]
    async fn test_turns_on_same_session_are_serialized() {
        let (mock, orchestrator, session_id) = fixture(ToolRegistry::new(), 5).await;
        let orchestrator = Arc::new(orchestrator);

        let a = {
            let o = orchestrator.clone();
            tokio::spawn(async move { o.handle_turn(session_id, "first", CancellationToken::new()).await })
        };
        let b = {
            let o = orchestrator.clone();
            tokio::spawn(async move { o.handle_turn(session_id, "second", CancellationToken::new()).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // 两轮都完成后正好四行，且 user/assistant 交替（没有交错的半截轮次）
        let history = orchestrator.store().session_history(session_id).await.unwrap();
        assert_eq!(history.len(), 4);
        let roles: Vec<_> = history.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);

        // 后开始的一轮读到了先完成一轮的转录
        assert_eq!(mock.call_count(), 2);
        let later = mock.captured_history(1).unwrap();
        assert_eq!(later.len(), 3);
        assert_eq!(later[0].role, Role::User);
        assert_eq!(later[1].role, Role::Assistant);
    }
}
