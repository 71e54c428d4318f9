//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时：先按 schema 校验参数（不合法直接拒绝，不发往工具），
//! 再在超时内调用工具，超时或失败时转为 ChatError（ToolTimeout / ToolExecution）；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::ChatError;
use crate::mcp::{ToolDescriptor, ToolRegistry};

/// 工具执行器：校验 + 超时 + 错误映射
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行指定工具：未注册或参数不合法返回 Validation；
    /// 超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecution；输出 JSON 审计日志
    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, ChatError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ChatError::Validation(format!("Unknown tool: {tool_name}")))?;

        let filled = tool
            .schema()
            .validate_and_fill(&args)
            .map_err(|e| ChatError::Validation(format!("{tool_name}: {e}")))?;

        let start = Instant::now();
        let args_preview = args_preview(&filled);
        let result = timeout(self.timeout, tool.call(filled)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(ChatError::ToolExecution(format!("{tool_name}: {e}"))),
            Err(_) => Err(ChatError::ToolTimeout(tool_name.to_string())),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{ArgKind, ArgumentSchema, McpTool};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct SlowTool;

    #[async_trait]
    impl McpTool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps longer than the executor timeout"
        }

        fn schema(&self) -> ArgumentSchema {
            ArgumentSchema::new()
        }

        async fn call(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("done".to_string())
        }
    }

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

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        registry.register(FailingTool);
        ToolExecutor::new(registry, 1)
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_timeout() {
        let err = executor().execute("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, ChatError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn test_failure_maps_to_tool_execution() {
        let err = executor()
            .execute("failing", json!({"rm": 600}))
            .await
            .unwrap_err();
        match err {
            ChatError::ToolExecution(msg) => assert!(msg.contains("backend unavailable")),
            _ => panic!("Expected ToolExecution"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected_before_dispatch() {
        let err = executor().execute("ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn test_invalid_args_rejected_before_dispatch() {
        // 参数不合法时不应执行工具（FailingTool 会返回 backend unavailable，而这里是校验错误）
        let err = executor().execute("failing", json!({})).await.unwrap_err();
        match err {
            ChatError::Validation(msg) => assert!(msg.contains("rm")),
            _ => panic!("Expected Validation"),
        }
    }
}
