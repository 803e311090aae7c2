//! 外部协作方（基础设施层）
//!
//! 每个外部系统都以 trait 暴露能力，编排层只依赖 trait：
//! - `UnitExtractor` - 按页提取文本
//! - `AnalysisClient` - 单页分析 / 出题
//! - `RecordStore` - 持久化累积记录
//! - `SessionIdCache` - 会话级记录ID缓存

pub mod extractor;
pub mod llm_client;
pub mod record_client;
pub mod session_cache;

pub use extractor::PageTextExtractor;
pub use llm_client::OpenAiAnalysisClient;
pub use record_client::HttpRecordStore;
pub use session_cache::{MemorySessionCache, TomlSessionCache};

use crate::error::{AnalysisError, StoreError, UnitError};
use crate::models::{
    AnalysisResponse, Difficulty, Language, RawQuestion, RecordMetadata, RecordPayload, SessionKey,
};
use async_trait::async_trait;

/// 按页提取文本
#[async_trait]
pub trait UnitExtractor: Send + Sync {
    /// 文档总页数
    fn unit_count(&self, full_text: &str) -> usize;

    /// 提取 [start, end] 页的文本（可能为空）
    async fn extract_range(
        &self,
        full_text: &str,
        start: usize,
        end: usize,
    ) -> Result<String, UnitError>;
}

/// 生成式分析服务
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze_unit(
        &self,
        content: &str,
        unit_index: usize,
        language: Language,
    ) -> Result<AnalysisResponse, AnalysisError>;

    async fn generate_questions(
        &self,
        merged_content: &str,
        difficulty: Difficulty,
        language: Language,
    ) -> Result<Vec<RawQuestion>, AnalysisError>;
}

/// 持久化记录存储
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_record(
        &self,
        owner: &str,
        kind: &str,
        payload: &RecordPayload,
        metadata: &RecordMetadata,
    ) -> Result<String, StoreError>;

    async fn update_record(
        &self,
        record_id: &str,
        payload: &RecordPayload,
        metadata: &RecordMetadata,
    ) -> Result<(), StoreError>;
}

/// 会话级记录ID缓存，重新加载时据此恢复记录ID
#[async_trait]
pub trait SessionIdCache: Send + Sync {
    async fn get(&self, key: &SessionKey) -> Option<String>;

    async fn put(&self, key: &SessionKey, record_id: &str);
}
