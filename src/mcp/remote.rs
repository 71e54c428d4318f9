//! 远程 MCP 工具服务器适配器
//!
//! 配置中登记的外部工具服务器（名称 + 参数 schema + HTTP 端点）包装为 McpTool：
//! POST {"name", "arguments"} 到端点，取回文本结果。请求带超时与 JSON Accept；
//! 非 2xx 与传输错误以字符串上抛，由执行器统一处理。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::mcp::{ArgumentSchema, McpTool};

/// 远程工具：HTTP 端点后面的 MCP 工具服务器
pub struct RemoteTool {
    name: String,
    description: String,
    schema: ArgumentSchema,
    endpoint: String,
    client: Client,
}

/// 工具服务器响应：{"result": "..."} 或 {"error": "..."}
#[derive(Deserialize)]
struct RemoteResult {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl RemoteTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ArgumentSchema,
        endpoint: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            endpoint: endpoint.into(),
            client,
        }
    }
}

#[async_trait]
impl McpTool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> ArgumentSchema {
        self.schema.clone()
    }

    async fn call(&self, args: Value) -> Result<String, String> {
        let body = serde_json::json!({
            "name": self.name,
            "arguments": args,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }

        let parsed: RemoteResult = resp
            .json()
            .await
            .map_err(|e| format!("Malformed tool server response: {}", e))?;

        if let Some(err) = parsed.error {
            return Err(err);
        }
        parsed
            .result
            .ok_or_else(|| "Tool server returned neither result nor error".to_string())
    }
}
