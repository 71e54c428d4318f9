//! 转录存储
//!
//! 使用 SQLite 存储 Agent / 会话 / 消息三张表；消息按会话 append-only，
//! tools_used 与 mcp_server_responses 以 JSON 文本列持久化。
//! 一次成功的对话轮次由 commit_turn 在单个事务里写入 user + assistant 两行，
//! 中途崩溃不会留下半截转录。

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// 工具调用摘要（ChatMessage.tools_used 的元素）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub name: String,
    pub arguments: Value,
    pub status: ToolUseStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolUseStatus {
    Ok,
    Error,
}

/// 工具服务器原始返回（ChatMessage.mcp_server_responses 的元素，按调用顺序）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct McpServerResponse {
    pub tool: String,
    pub raw: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct AgentRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub model: String,
    pub temperature: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionRecord {
    pub id: i64,
    pub title: String,
    pub agent_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatMessageRecord {
    pub id: i64,
    pub session_id: i64,
    pub role: String,
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tools_used: Vec<ToolUse>,
    pub mcp_server_responses: Vec<McpServerResponse>,
    pub created_at: String,
}

/// 新建 Agent 的字段
#[derive(Clone, Debug, Deserialize)]
pub struct NewAgent {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub system_prompt: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    0.7
}

/// Agent 就地更新：None 字段保持不变
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AgentUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// 待提交的 assistant 消息（commit_turn 的输入）
#[derive(Clone, Debug)]
pub struct NewAssistantMessage {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tools_used: Vec<ToolUse>,
    pub mcp_server_responses: Vec<McpServerResponse>,
}

/// 转录存储：SQLite 连接池之上的 CRUD 与单事务轮次提交
pub struct TranscriptStore {
    pool: SqlitePool,
}

impl TranscriptStore {
    /// 按文件路径打开（不存在则创建）
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        Self::connect(&db_url).await
    }

    /// 按连接串打开（本地文件或托管实例由配置切换）
    pub async fn connect(db_url: &str) -> Result<Self, sqlx::Error> {
        Self::connect_with(db_url, 5).await
    }

    /// 测试用内存库；内存库每个连接各自独立，池上限必须为 1
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        Self::connect_with("sqlite::memory:", 1).await
    }

    async fn connect_with(db_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// 初始化数据库表（幂等）
    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                system_prompt TEXT NOT NULL,
                model TEXT NOT NULL,
                temperature REAL NOT NULL DEFAULT 0.7,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                agent_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (agent_id) REFERENCES agents(id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT,
                reasoning_content TEXT,
                tools_used TEXT NOT NULL DEFAULT '[]',
                mcp_server_responses TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- Agent ----

    pub async fn create_agent(&self, agent: NewAgent) -> Result<AgentRecord, sqlx::Error> {
        let now = now_rfc3339();
        let result = sqlx::query(
            "INSERT INTO agents (name, description, system_prompt, model, temperature, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(&agent.system_prompt)
        .bind(&agent.model)
        .bind(agent.temperature)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(AgentRecord {
            id: result.last_insert_rowid(),
            name: agent.name,
            description: agent.description,
            system_prompt: agent.system_prompt,
            model: agent.model,
            temperature: agent.temperature,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub async fn get_agent(&self, id: i64) -> Result<Option<AgentRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| agent_from_row(&r)))
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(agent_from_row).collect())
    }

    /// 就地更新 Agent；目标不存在时返回 None
    pub async fn update_agent(
        &self,
        id: i64,
        update: AgentUpdate,
    ) -> Result<Option<AgentRecord>, sqlx::Error> {
        let Some(current) = self.get_agent(id).await? else {
            return Ok(None);
        };

        let name = update.name.unwrap_or(current.name);
        let description = update.description.or(current.description);
        let system_prompt = update.system_prompt.unwrap_or(current.system_prompt);
        let model = update.model.unwrap_or(current.model);
        let temperature = update.temperature.unwrap_or(current.temperature);
        let now = now_rfc3339();

        sqlx::query(
            "UPDATE agents SET name = ?, description = ?, system_prompt = ?, model = ?, temperature = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&name)
        .bind(&description)
        .bind(&system_prompt)
        .bind(&model)
        .bind(temperature)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_agent(id).await
    }

    // ---- Session ----

    pub async fn create_session(
        &self,
        title: &str,
        agent_id: i64,
    ) -> Result<SessionRecord, sqlx::Error> {
        let now = now_rfc3339();
        let result = sqlx::query(
            "INSERT INTO chat_sessions (title, agent_id, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(title)
        .bind(agent_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(SessionRecord {
            id: result.last_insert_rowid(),
            title: title.to_string(),
            agent_id,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub async fn get_session(&self, id: i64) -> Result<Option<SessionRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| session_from_row(&r)))
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM chat_sessions ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    // ---- Message ----

    /// 会话转录：created_at（同刻按 id）升序即对话顺序
    pub async fn session_history(
        &self,
        session_id: i64,
    ) -> Result<Vec<ChatMessageRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM chat_messages WHERE session_id = ? ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    /// 提交一个完整轮次：user + assistant 两行在同一事务内写入，返回 assistant 记录。
    /// 事务失败时两行都不落库。
    pub async fn commit_turn(
        &self,
        session_id: i64,
        user_text: &str,
        assistant: NewAssistantMessage,
    ) -> Result<ChatMessageRecord, sqlx::Error> {
        let now = now_rfc3339();
        let tools_used_json =
            serde_json::to_string(&assistant.tools_used).unwrap_or_else(|_| "[]".to_string());
        let responses_json = serde_json::to_string(&assistant.mcp_server_responses)
            .unwrap_or_else(|_| "[]".to_string());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO chat_messages (session_id, role, content, created_at) VALUES (?, 'user', ?, ?)",
        )
        .bind(session_id)
        .bind(user_text)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "INSERT INTO chat_messages
                 (session_id, role, content, reasoning_content, tools_used, mcp_server_responses, created_at)
             VALUES (?, 'assistant', ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(&assistant.content)
        .bind(&assistant.reasoning_content)
        .bind(&tools_used_json)
        .bind(&responses_json)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        let assistant_id = result.last_insert_rowid();
        tx.commit().await?;

        Ok(ChatMessageRecord {
            id: assistant_id,
            session_id,
            role: "assistant".to_string(),
            content: assistant.content,
            reasoning_content: assistant.reasoning_content,
            tools_used: assistant.tools_used,
            mcp_server_responses: assistant.mcp_server_responses,
            created_at: now,
        })
    }

    // ---- 健康检查 ----

    /// 三张表的行数：(agents, sessions, messages)
    pub async fn table_counts(&self) -> Result<(i64, i64, i64), sqlx::Error> {
        let agents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents")
            .fetch_one(&self.pool)
            .await?;
        let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_sessions")
            .fetch_one(&self.pool)
            .await?;
        let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages")
            .fetch_one(&self.pool)
            .await?;
        Ok((agents, sessions, messages))
    }

    pub async fn database_version(&self) -> Result<String, sqlx::Error> {
        sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn agent_from_row(row: &sqlx::sqlite::SqliteRow) -> AgentRecord {
    AgentRecord {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        system_prompt: row.get("system_prompt"),
        model: row.get("model"),
        temperature: row.get("temperature"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        title: row.get("title"),
        agent_id: row.get("agent_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> ChatMessageRecord {
    let tools_used: String = row.get("tools_used");
    let responses: String = row.get("mcp_server_responses");
    ChatMessageRecord {
        id: row.get("id"),
        session_id: row.get("session_id"),
        role: row.get("role"),
        content: row.get("content"),
        reasoning_content: row.get("reasoning_content"),
        tools_used: serde_json::from_str(&tools_used).unwrap_or_default(),
        mcp_server_responses: serde_json::from_str(&responses).unwrap_or_default(),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with_agent() -> (TranscriptStore, AgentRecord) {
        let store = TranscriptStore::in_memory().await.unwrap();
        let agent = store
            .create_agent(NewAgent {
                name: "Solar Expert".to_string(),
                description: Some("TNB solar advisor".to_string()),
                system_prompt: "You advise on solar savings.".to_string(),
                model: "glm-4.5".to_string(),
                temperature: 0.7,
            })
            .await
            .unwrap();
        (store, agent)
    }

    #[tokio::test]
    async fn test_agent_crud() {
        let (store, agent) = store_with_agent().await;
        assert_eq!(store.list_agents().await.unwrap().len(), 1);

        let updated = store
            .update_agent(
                agent.id,
                AgentUpdate {
                    system_prompt: Some("New prompt".to_string()),
                    model: Some("glm-4.6".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.system_prompt, "New prompt");
        assert_eq!(updated.model, "glm-4.6");
        // 未更新字段保持不变
        assert_eq!(updated.name, "Solar Expert");

        assert!(store
            .update_agent(9999, AgentUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_turn_round_trip_preserves_json_columns() {
        let (store, agent) = store_with_agent().await;
        let session = store.create_session("Bill question", agent.id).await.unwrap();

        let tools_used = vec![ToolUse {
            name: "calculate_solar_impact".to_string(),
            arguments: json!({"rm": 600.0}),
            status: ToolUseStatus::Ok,
        }];
        let responses = vec![McpServerResponse {
            tool: "calculate_solar_impact".to_string(),
            raw: "[OFFICIAL MCP CALCULATION RESULT]\nTOTAL MONTHLY SAVINGS: RM 321.10".to_string(),
        }];

        let committed = store
            .commit_turn(
                session.id,
                "My bill is RM600",
                NewAssistantMessage {
                    content: Some("You would save RM 321.10 monthly.".to_string()),
                    reasoning_content: Some("used the tariff tool".to_string()),
                    tools_used: tools_used.clone(),
                    mcp_server_responses: responses.clone(),
                },
            )
            .await
            .unwrap();

        let history = store.session_history(session.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[0].content.as_deref(), Some("My bill is RM600"));

        let assistant = &history[1];
        assert_eq!(assistant.id, committed.id);
        assert_eq!(assistant.content.as_deref(), Some("You would save RM 321.10 monthly."));
        assert_eq!(assistant.reasoning_content.as_deref(), Some("used the tariff tool"));
        // JSON 列逐字节还原
        assert_eq!(assistant.tools_used, tools_used);
        assert_eq!(assistant.mcp_server_responses, responses);
        assert_eq!(
            serde_json::to_string(&assistant.tools_used).unwrap(),
            serde_json::to_string(&tools_used).unwrap()
        );
    }

    #[tokio::test]
    async fn test_history_is_ordered() {
        let (store, agent) = store_with_agent().await;
        let session = store.create_session("Ordered", agent.id).await.unwrap();

        for i in 0..3 {
            store
                .commit_turn(
                    session.id,
                    &format!("q{i}"),
                    NewAssistantMessage {
                        content: Some(format!("a{i}")),
                        reasoning_content: None,
                        tools_used: vec![],
                        mcp_server_responses: vec![],
                    },
                )
                .await
                .unwrap();
        }

        let history = store.session_history(session.id).await.unwrap();
        let contents: Vec<_> = history.iter().filter_map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["q0", "a0", "q1", "a1", "q2", "a2"]);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nectar.db");

        let agent_id = {
            let store = TranscriptStore::open(&db_path).await.unwrap();
            let agent = store
                .create_agent(NewAgent {
                    name: "Persistent".to_string(),
                    description: None,
                    system_prompt: "p".to_string(),
                    model: "glm-4.5".to_string(),
                    temperature: 0.7,
                })
                .await
                .unwrap();
            agent.id
        };

        let reopened = TranscriptStore::open(&db_path).await.unwrap();
        let agent = reopened.get_agent(agent_id).await.unwrap().unwrap();
        assert_eq!(agent.name, "Persistent");
    }

    #[tokio::test]
    async fn test_table_counts_and_version() {
        let (store, agent) = store_with_agent().await;
        store.create_session("s", agent.id).await.unwrap();
        let (agents, sessions, messages) = store.table_counts().await.unwrap();
        assert_eq!((agents, sessions, messages), (1, 1, 0));
        assert!(!store.database_version().await.unwrap().is_empty());
    }
}
