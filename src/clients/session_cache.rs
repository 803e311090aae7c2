//! 会话记录ID缓存
//!
//! 以文档稳定标识为键保存累积记录ID，重新打开同一文档时据此恢复，
//! 不会重复创建记录。缓存失败只影响恢复，不影响分析。

use super::SessionIdCache;
use crate::models::SessionKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

/// 进程内缓存
#[derive(Debug, Default)]
pub struct MemorySessionCache {
    entries: RwLock<HashMap<SessionKey, String>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionIdCache for MemorySessionCache {
    async fn get(&self, key: &SessionKey) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: &SessionKey, record_id: &str) {
        self.entries
            .write()
            .await
            .insert(key.clone(), record_id.to_string());
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    records: BTreeMap<String, String>,
}

/// TOML 文件缓存，跨进程重启保留
pub struct TomlSessionCache {
    path: PathBuf,
    // 串行化读-改-写
    write_lock: Mutex<()>,
}

impl TomlSessionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> CacheFile {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(_) => return CacheFile::default(),
        };
        toml::from_str(&content).unwrap_or_else(|e| {
            warn!("⚠️ 会话缓存文件损坏，已忽略 {}: {}", self.path.display(), e);
            CacheFile::default()
        })
    }
}

#[async_trait]
impl SessionIdCache for TomlSessionCache {
    async fn get(&self, key: &SessionKey) -> Option<String> {
        self.load().await.records.get(key.as_str()).cloned()
    }

    async fn put(&self, key: &SessionKey, record_id: &str) {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load().await;
        file.records
            .insert(key.as_str().to_string(), record_id.to_string());

        let content = match toml::to_string(&file) {
            Ok(content) => content,
            Err(e) => {
                warn!("⚠️ 会话缓存序列化失败: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, content).await {
            warn!("⚠️ 写入会话缓存失败 {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_round_trip() {
        let cache = MemorySessionCache::new();
        let key = SessionKey::new("a.pdf", 10);
        assert_eq!(cache.get(&key).await, None);
        cache.put(&key, "rec-1").await;
        assert_eq!(cache.get(&key).await.as_deref(), Some("rec-1"));
    }

    #[tokio::test]
    async fn test_toml_cache_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "page_insight_cache_{}.toml",
            std::process::id()
        ));
        let key = SessionKey::new("notes v2.pdf", 2048);

        TomlSessionCache::new(&path).put(&key, "rec-42").await;
        let reopened = TomlSessionCache::new(&path);
        assert_eq!(reopened.get(&key).await.as_deref(), Some("rec-42"));
        assert_eq!(reopened.get(&SessionKey::new("other", 1)).await, None);

        let _ = std::fs::remove_file(&path);
    }
}
