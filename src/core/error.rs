//! 对话编排错误类型
//!
//! 与 Orchestrator 配合：Validation / RoundLimitExceeded 在编排器内部消化为结构化（降级）响应，
//! Provider / Persistence 一路上抛到 HTTP 边界作为显式失败，绝不折叠成空回复。

use thiserror::Error;

/// 一次对话轮次处理中可能出现的错误（输入校验、上游模型、工具、持久化等）
#[derive(Error, Debug)]
pub enum ChatError {
    /// 输入不合法：空消息、不存在的会话/Agent、工具参数不符合 schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// 上游补全服务不可达、超时或返回畸形载荷
    #[error("Completion provider error: {0}")]
    Provider(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 工具调用循环在限定轮数内未收敛；由编排器转为降级响应而非向上抛
    #[error("Round limit exceeded after {0} rounds")]
    RoundLimitExceeded(usize),

    /// 补全成功但转录写入失败；此时不得向调用方谎报成功
    #[error("Transcript persistence failed: {0}")]
    Persistence(String),

    #[error("Turn cancelled")]
    Cancelled,
}
