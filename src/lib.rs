//! Nectar - Rust 聊天机器人后端
//!
//! 模块划分：
//! - **chat**: 对话编排主循环（补全 -> 工具调用 -> 回填 -> 落库）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **health**: 只读健康检查（数据库 + 补全后端）
//! - **llm**: 补全客户端抽象与实现（Z.ai GLM / Mock）
//! - **mcp**: MCP 工具注册表、参数校验、执行器与内置/远程工具
//! - **server**: axum HTTP 边界
//! - **store**: Agent / 会话 / 消息的 SQLite 转录存储

pub mod chat;
pub mod config;
pub mod core;
pub mod health;
pub mod llm;
pub mod mcp;
pub mod server;
pub mod store;
