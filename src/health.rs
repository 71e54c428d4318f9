//! 健康检查
//!
//! 只读探测转录存储与补全后端：数据库取版本与三表行数，后端取密钥配置状态。
//! 任一协作方不可达时标记该组件 unhealthy 并继续产出结构化报告，绝不 panic。

use std::sync::Arc;

use serde::Serialize;

use crate::llm::{CompletionClient, ProviderStatus};
use crate::store::TranscriptStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct TableCounts {
    pub agents: i64,
    pub sessions: i64,
    pub messages: i64,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub status: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<TableCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: String,
    pub database: DatabaseHealth,
    pub completion_provider: ProviderStatus,
}

/// 健康上报器：不持有任何可变状态，不触发任何写入
pub struct HealthReporter {
    store: Arc<TranscriptStore>,
    llm: Arc<dyn CompletionClient>,
}

impl HealthReporter {
    pub fn new(store: Arc<TranscriptStore>, llm: Arc<dyn CompletionClient>) -> Self {
        Self { store, llm }
    }

    pub async fn check(&self) -> HealthReport {
        let mut status = HealthStatus::Healthy;

        let database = match self.probe_database().await {
            Ok(db) => db,
            Err(e) => {
                status = HealthStatus::Unhealthy;
                DatabaseHealth {
                    status: "failed",
                    kind: "SQLite",
                    version: None,
                    tables: None,
                    error: Some(e),
                }
            }
        };

        let completion_provider = self.llm.provider_status();
        if matches!(completion_provider, ProviderStatus::Missing) {
            status = HealthStatus::Unhealthy;
        }

        HealthReport {
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
            database,
            completion_provider,
        }
    }

    async fn probe_database(&self) -> Result<DatabaseHealth, String> {
        let version = self
            .store
            .database_version()
            .await
            .map_err(|e| e.to_string())?;
        let (agents, sessions, messages) =
            self.store.table_counts().await.map_err(|e| e.to_string())?;
        Ok(DatabaseHealth {
            status: "connected",
            kind: "SQLite",
            version: Some(version),
            tables: Some(TableCounts {
                agents,
                sessions,
                messages,
            }),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockCompletionClient;

    #[tokio::test]
    async fn test_report_marks_missing_provider_unhealthy() {
        let store = Arc::new(TranscriptStore::in_memory().await.unwrap());
        // Mock 客户端上报 Missing
        let reporter = HealthReporter::new(store, Arc::new(MockCompletionClient::new()));

        let report = reporter.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.database.status, "connected");
        let tables = report.database.tables.unwrap();
        assert_eq!(tables.agents, 0);
        assert!(report.database.version.is_some());
    }
}
