//! Nectar - Rust 聊天机器人后端
//!
//! 入口：初始化日志、加载配置、装配存储/补全客户端/工具执行器/编排器，启动 HTTP 服务。

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nectar::chat::Orchestrator;
use nectar::config::{load_config, AppConfig, RemoteToolSection};
use nectar::health::HealthReporter;
use nectar::llm::{CompletionClient, MockCompletionClient, ZaiClient};
use nectar::mcp::{
    ArgKind, ArgumentSchema, BillKwhToRmTool, BillRmToKwhTool, BillTable, RemoteTool,
    SolarImpactTool, ToolExecutor, ToolRegistry,
};
use nectar::server::{router, AppState};
use nectar::store::TranscriptStore;

/// 根据环境变量选择补全后端：有 ZAI_API_KEY 走 Z.ai，否则 Mock（本地联调）
fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn CompletionClient> {
    match std::env::var("ZAI_API_KEY") {
        Ok(key) if !key.is_empty() => {
            tracing::info!("Using Z.ai completion backend ({})", cfg.llm.model);
            Arc::new(ZaiClient::new(
                cfg.llm.base_url.as_deref(),
                &key,
                cfg.llm.temperature,
                cfg.llm.request_timeout_secs,
            ))
        }
        _ => {
            tracing::warn!("ZAI_API_KEY not set, using Mock completion backend");
            Arc::new(MockCompletionClient::new())
        }
    }
}

/// 装配工具注册表：内置账单/光伏工具 + 配置登记的远程工具服务器
fn build_registry(cfg: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let bill_path = cfg
        .tools
        .bill_table
        .clone()
        .unwrap_or_else(|| "resource/bill.json".into());
    match BillTable::load(&bill_path) {
        Ok(table) => {
            let table = Arc::new(table);
            registry.register(BillRmToKwhTool::new(table.clone()));
            registry.register(BillKwhToRmTool::new(table.clone()));
            registry.register(SolarImpactTool::new(table));
            tracing::info!("Billing tools registered from {}", bill_path.display());
        }
        Err(e) => {
            tracing::warn!("Bill table unavailable ({}), billing tools disabled", e);
        }
    }

    for remote in &cfg.tools.remote {
        match remote_schema(remote) {
            Ok(schema) => {
                tracing::info!(tool = %remote.name, endpoint = %remote.endpoint, "remote tool registered");
                registry.register(RemoteTool::new(
                    &remote.name,
                    &remote.description,
                    schema,
                    &remote.endpoint,
                    cfg.tools.tool_timeout_secs,
                ));
            }
            Err(e) => {
                tracing::warn!(tool = %remote.name, "skipping remote tool: {}", e);
            }
        }
    }

    registry
}

fn remote_schema(remote: &RemoteToolSection) -> Result<ArgumentSchema, String> {
    let mut schema = ArgumentSchema::new();
    for arg in &remote.args {
        let kind = match arg.kind.as_str() {
            "string" => ArgKind::String,
            "number" => ArgKind::Number,
            "integer" => ArgKind::Integer,
            "boolean" => ArgKind::Boolean,
            other => return Err(format!("unknown argument type '{other}' for '{}'", arg.name)),
        };
        schema = if arg.required {
            schema.required(&arg.name, kind, &arg.description)
        } else {
            schema.optional(&arg.name, kind, &arg.description, serde_json::Value::Null)
        };
    }
    Ok(schema)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    // 本地 SQLite 文件需要父目录存在
    if let Some(path) = cfg
        .database
        .url
        .strip_prefix("sqlite:")
        .map(|p| p.split('?').next().unwrap_or(p))
    {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let store = Arc::new(
        TranscriptStore::connect(&cfg.database.url)
            .await
            .context("Failed to open transcript store")?,
    );

    let llm = create_llm_from_config(&cfg);
    let executor = ToolExecutor::new(build_registry(&cfg), cfg.tools.tool_timeout_secs);
    let orchestrator = Arc::new(Orchestrator::new(
        llm.clone(),
        executor,
        store.clone(),
        cfg.chat.max_rounds,
    ));
    let health = HealthReporter::new(store, llm);

    let state = Arc::new(AppState {
        orchestrator,
        health,
    });

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .context("Server run failed")?;

    Ok(())
}
