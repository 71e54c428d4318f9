//! MCP 工具注册表
//!
//! 所有工具实现 McpTool trait（name / description / schema / call），
//! 由 ToolRegistry 按名注册与查找；descriptors() 产出发给补全端的工具清单。
//! ToolExecutor 在调用时做参数校验、加超时并统一转 ChatError。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::mcp::ArgumentSchema;

/// MCP 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为已校验的 JSON 对象）
///
/// 工具是纯函数：从参数集到结果文本，不得触碰转录存储。
#[async_trait]
pub trait McpTool: Send + Sync {
    /// 工具名称（tool_calls 中的 function.name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 schema，调度前校验与默认值补齐都以它为准
    fn schema(&self) -> ArgumentSchema;

    /// 执行工具；失败以字符串描述返回，由执行器转 ChatError
    async fn call(&self, args: Value) -> Result<String, String>;
}

/// 发给补全端的工具描述符（list_tools 的元素）
#[derive(Clone, Debug, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// 工具注册表：按名称存储 Arc<dyn McpTool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn McpTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl McpTool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn McpTool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 全部工具的描述符列表，顺序按名称排序以保证输出稳定
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut list: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.schema().to_json_schema(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}
