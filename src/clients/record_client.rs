/// 记录存储 HTTP 客户端
///
/// 封装所有与记录存储 API 相关的调用逻辑
use super::RecordStore;
use crate::config::Config;
use crate::error::StoreError;
use crate::models::{RecordMetadata, RecordPayload};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct CreateRecordBody<'a> {
    owner: &'a str,
    kind: &'a str,
    payload: &'a RecordPayload,
    metadata: &'a RecordMetadata,
}

#[derive(Serialize)]
struct UpdateRecordBody<'a> {
    payload: &'a RecordPayload,
    metadata: &'a RecordMetadata,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    id: String,
}

/// 基于 REST 的记录存储
///
/// - `POST {base}/records` 创建，返回 `{"id": "..."}`
/// - `PUT {base}/records/{id}` 更新
pub struct HttpRecordStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRecordStore {
    /// 创建新的记录存储客户端
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.store_timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.store_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn records_url(&self) -> String {
        format!("{}/records", self.base_url)
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn create_record(
        &self,
        owner: &str,
        kind: &str,
        payload: &RecordPayload,
        metadata: &RecordMetadata,
    ) -> Result<String, StoreError> {
        let body = CreateRecordBody {
            owner,
            kind,
            payload,
            metadata,
        };

        debug!("创建记录: {} ({} 页)", self.records_url(), metadata.completed_units);

        let response = self
            .http
            .post(self.records_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("create", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::unavailable("create", format!("HTTP {}", status)));
        }

        // 存储端已接受请求，读取或解析响应失败时无法确认是否已创建
        let created: CreateRecordResponse = response
            .json()
            .await
            .map_err(|e| StoreError::outcome_unknown("create", format!("响应解析失败: {}", e)))?;

        Ok(created.id)
    }

    async fn update_record(
        &self,
        record_id: &str,
        payload: &RecordPayload,
        metadata: &RecordMetadata,
    ) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.records_url(), record_id);
        debug!("更新记录: {} ({} 页)", url, metadata.completed_units);

        let response = self
            .http
            .put(&url)
            .json(&UpdateRecordBody { payload, metadata })
            .send()
            .await
            .map_err(|e| send_error("update", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::unavailable("update", format!("HTTP {}", status)));
        }

        Ok(())
    }
}

/// 连接未建立时请求一定没有送达；其余发送错误（超时、连接中断）结果未知
fn send_error(operation: &'static str, err: reqwest::Error) -> StoreError {
    if err.is_connect() || err.is_builder() {
        StoreError::unavailable(operation, err.to_string())
    } else {
        StoreError::outcome_unknown(operation, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CumulativeRecord, Language};
    use crate::utils::test_server::{CannedServer, Reply};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn store(base_url: String) -> HttpRecordStore {
        HttpRecordStore::new(&Config {
            store_base_url: base_url,
            store_timeout_ms: 300,
            ..Config::default()
        })
    }

    fn payload() -> (RecordPayload, RecordMetadata) {
        let units = BTreeMap::new();
        (
            RecordPayload {
                record: CumulativeRecord::merge(&units, None),
                units,
            },
            RecordMetadata {
                session_key: "notes.txt#10".to_string(),
                total_units: 2,
                completed_units: 0,
                language: Language::English,
                updated_at: Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn test_create_returns_id() {
        let server = CannedServer::start(Reply::json("201 Created", r#"{"id": "rec-9"}"#)).await;
        let (payload, metadata) = payload();
        let id = store(server.url())
            .create_record("local", "history", &payload, &metadata)
            .await
            .unwrap();
        assert_eq!(id, "rec-9");
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_rejected_create_is_unavailable() {
        let server =
            CannedServer::start(Reply::json("503 Service Unavailable", r#"{"error": "down"}"#))
                .await;
        let (payload, metadata) = payload();
        let err = store(server.url())
            .create_record("local", "history", &payload, &metadata)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { operation: "create", .. }));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        let url = CannedServer::closed_url().await;
        let (payload, metadata) = payload();
        let err = store(url)
            .create_record("local", "history", &payload, &metadata)
            .await
            .unwrap_err();
        assert!(!err.is_outcome_unknown());
    }

    #[tokio::test]
    async fn test_timeout_after_send_is_outcome_unknown() {
        let server = CannedServer::start(Reply::Silent).await;
        let (payload, metadata) = payload();
        let err = store(server.url())
            .create_record("local", "history", &payload, &metadata)
            .await
            .unwrap_err();
        assert!(err.is_outcome_unknown());
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_create_response_is_outcome_unknown() {
        let server = CannedServer::start(Reply::json("200 OK", "<html>ok</html>")).await;
        let (payload, metadata) = payload();
        let err = store(server.url())
            .create_record("local", "history", &payload, &metadata)
            .await
            .unwrap_err();
        assert!(err.is_outcome_unknown());
    }
}
