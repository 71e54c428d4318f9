//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NECTAR__*` 覆盖（双下划线表示嵌套，
//! 如 `NECTAR__DATABASE__URL=...` 在本地 SQLite 与托管实例之间切换）。
//! 补全后端的 API Key 从 `ZAI_API_KEY` 读取，不入配置文件。
//! 配置在进程启动时加载一次，此后只读，经构造函数注入各组件。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub chat: ChatSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [server] 段：监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// [llm] 段：Z.ai 端点、默认模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 为空时使用内置 Z.ai coding 端点
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    /// 单次补全请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_model(),
            temperature: default_llm_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_model() -> String {
    "glm-4.5".to_string()
}

fn default_llm_temperature() -> f32 {
    0.7
}

fn default_request_timeout() -> u64 {
    120
}

/// [database] 段：连接串（本地 SQLite 文件或托管实例，由环境变量覆盖切换）
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:data/nectar.db?mode=rwc".to_string()
}

/// [chat] 段：轮次上限
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSection {
    /// 单条用户消息允许的补全轮数上限（限制最坏时延与成本）
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

fn default_max_rounds() -> usize {
    5
}

/// [tools] 段：账单表路径、工具超时与远程工具服务器
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// TNB 档位表（JSON），缺省 resource/bill.json
    pub bill_table: Option<PathBuf>,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 远程 MCP 工具服务器登记
    #[serde(default)]
    pub remote: Vec<RemoteToolSection>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            bill_table: None,
            tool_timeout_secs: default_tool_timeout_secs(),
            remote: Vec::new(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [[tools.remote]] 段：一个远程工具服务器（名称、端点与参数声明）
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolSection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub endpoint: String,
    #[serde(default)]
    pub args: Vec<RemoteArgSection>,
}

/// 远程工具的单个参数声明：name + type（string/number/integer/boolean）+ required
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteArgSection {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            llm: LlmSection::default(),
            database: DatabaseSection::default(),
            chat: ChatSection::default(),
            tools: ToolsSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 NECTAR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NECTAR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NECTAR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.chat.max_rounds, 5);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.llm.model, "glm-4.5");
        assert!(cfg.database.url.starts_with("sqlite:"));
    }
}
