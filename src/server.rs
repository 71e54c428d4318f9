//! HTTP 边界
//!
//! 薄薄一层 axum 路由：会话创建、消息发送、Agent 管理与健康检查。
//! 核心语义都在 Orchestrator / TranscriptStore 里，这里只做 DTO 与状态码映射：
//! Validation -> 400（资源查找在 handler 内直接 404），Provider -> 502，
//! Persistence -> 500，Cancelled -> 408。降级（轮数耗尽）仍是 200，由 turn_status 标注。

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chat::{Orchestrator, TurnStatus};
use crate::core::ChatError;
use crate::health::{HealthReport, HealthReporter};
use crate::store::{
    AgentRecord, AgentUpdate, ChatMessageRecord, NewAgent, SessionRecord,
};

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub health: HealthReporter,
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    title: String,
    agent_id: i64,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    message: String,
}

/// 聊天响应：完整的 assistant 消息记录 + 展示兜底 reply + 轮次状态
///
/// reply 仅在 content 缺失时回退到 reasoning_content；持久化的两个字段本身保持原样。
#[derive(Debug, Serialize)]
struct ChatMessageResponse {
    #[serde(flatten)]
    message: ChatMessageRecord,
    reply: String,
    turn_status: TurnStatus,
}

fn error_response(err: ChatError) -> (StatusCode, String) {
    let status = match &err {
        ChatError::Validation(_) => StatusCode::BAD_REQUEST,
        ChatError::Provider(_) => StatusCode::BAD_GATEWAY,
        ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ChatError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        // 工具错误在编排器内消化；到达边界说明是编排器外的直接调用
        ChatError::ToolExecution(_) | ChatError::ToolTimeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ChatError::RoundLimitExceeded(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn store_error(e: sqlx::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id/messages", get(session_messages))
        .route("/chat/:session_id/messages", post(send_message))
        .route("/agents", get(list_agents).post(create_agent))
        .route("/agents/:id", get(get_agent).put(update_agent))
        .route("/ui/health", get(health_check))
        .with_state(state)
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionRecord>, (StatusCode, String)> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "title is required".to_string()));
    }

    let store = state.orchestrator.store();
    // 创建时 agent 必须存在（会话的 agent 绑定此后不可变）
    if store.get_agent(req.agent_id).await.map_err(store_error)?.is_none() {
        return Err((StatusCode::NOT_FOUND, "Agent not found".to_string()));
    }

    let session = store
        .create_session(title, req.agent_id)
        .await
        .map_err(store_error)?;
    Ok(Json(session))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionRecord>>, (StatusCode, String)> {
    let sessions = state
        .orchestrator
        .store()
        .list_sessions()
        .await
        .map_err(store_error)?;
    Ok(Json(sessions))
}

async fn session_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ChatMessageRecord>>, (StatusCode, String)> {
    let store = state.orchestrator.store();
    if store.get_session(id).await.map_err(store_error)?.is_none() {
        return Err((StatusCode::NOT_FOUND, "Session not found".to_string()));
    }
    let history = store.session_history(id).await.map_err(store_error)?;
    Ok(Json(history))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<ChatMessageResponse>, (StatusCode, String)> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }

    let store = state.orchestrator.store();
    if store.get_session(session_id).await.map_err(store_error)?.is_none() {
        return Err((StatusCode::NOT_FOUND, "Session not found".to_string()));
    }

    let outcome = state
        .orchestrator
        .handle_turn(session_id, message, CancellationToken::new())
        .await
        .map_err(error_response)?;

    let reply = outcome
        .message
        .content
        .clone()
        .or_else(|| outcome.message.reasoning_content.clone())
        .unwrap_or_default();

    Ok(Json(ChatMessageResponse {
        message: outcome.message,
        reply,
        turn_status: outcome.status,
    }))
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgentRecord>>, (StatusCode, String)> {
    let agents = state
        .orchestrator
        .store()
        .list_agents()
        .await
        .map_err(store_error)?;
    Ok(Json(agents))
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewAgent>,
) -> Result<Json<AgentRecord>, (StatusCode, String)> {
    if req.name.trim().is_empty() || req.system_prompt.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "name and system_prompt are required".to_string(),
        ));
    }
    let agent = state
        .orchestrator
        .store()
        .create_agent(req)
        .await
        .map_err(store_error)?;
    Ok(Json(agent))
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<AgentRecord>, (StatusCode, String)> {
    let agent = state
        .orchestrator
        .store()
        .get_agent(id)
        .await
        .map_err(store_error)?
        .ok_or((StatusCode::NOT_FOUND, "Agent not found".to_string()))?;
    Ok(Json(agent))
}

async fn update_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<AgentUpdate>,
) -> Result<Json<AgentRecord>, (StatusCode, String)> {
    if let Some(prompt) = &req.system_prompt {
        if prompt.trim().is_empty() {
            return Err((
                StatusCode::BAD_REQUEST,
                "system_prompt must not be empty".to_string(),
            ));
        }
    }
    let agent = state
        .orchestrator
        .store()
        .update_agent(id, req)
        .await
        .map_err(store_error)?
        .ok_or((StatusCode::NOT_FOUND, "Agent not found".to_string()))?;
    Ok(Json(agent))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.health.check().await)
}
