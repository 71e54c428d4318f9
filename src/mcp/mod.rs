//! MCP 工具层：注册表、参数校验、执行器与内置/远程工具

pub mod billing;
pub mod executor;
pub mod registry;
pub mod remote;
pub mod schema;

pub use billing::{BillKwhToRmTool, BillRecord, BillRmToKwhTool, BillTable, SolarImpactTool};
pub use executor::ToolExecutor;
pub use registry::{McpTool, ToolDescriptor, ToolRegistry};
pub use remote::RemoteTool;
pub use schema::{ArgField, ArgKind, ArgumentSchema};
