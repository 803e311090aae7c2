use crate::error::ConfigError;
use crate::models::{Difficulty, Language};
use crate::utils::retry::RetryPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 重试与节流 ---
    /// 首次重试等待时间（毫秒），之后每次翻倍
    pub retry_initial_delay_ms: u64,
    /// 单页最大请求次数
    pub retry_max_attempts: u32,
    /// 顺序分析时两页之间的等待时间（毫秒）
    pub inter_unit_delay_ms: u64,
    /// 全文并行分析的并发窗口
    pub parallel_window: usize,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    // --- 记录存储配置 ---
    pub store_base_url: String,
    pub store_owner: String,
    pub record_kind: String,
    /// 记录存储请求超时（毫秒）
    pub store_timeout_ms: u64,
    /// 会话记录ID缓存文件
    pub session_cache_file: String,
    // --- 文档 ---
    /// 待分析的文档（纯文本，页之间以换页符分隔）
    pub document_path: String,
    pub language: Language,
    /// 出题页码区间（可选），如 "1-5"
    pub quiz_range: Option<String>,
    pub quiz_difficulty: Difficulty,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry_initial_delay_ms: 2000,
            retry_max_attempts: 3,
            inter_unit_delay_ms: 1000,
            parallel_window: 5,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            store_base_url: "http://localhost:8080/api".to_string(),
            store_owner: "local".to_string(),
            record_kind: "page_analysis_history".to_string(),
            store_timeout_ms: 30_000,
            session_cache_file: "session_cache.toml".to_string(),
            document_path: "document.txt".to_string(),
            language: Language::English,
            quiz_range: None,
            quiz_difficulty: Difficulty::Medium,
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载配置，环境变量优先
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(self) -> Self {
        Self {
            retry_initial_delay_ms: env_parse("RETRY_INITIAL_DELAY_MS").unwrap_or(self.retry_initial_delay_ms),
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS").unwrap_or(self.retry_max_attempts),
            inter_unit_delay_ms: env_parse("INTER_UNIT_DELAY_MS").unwrap_or(self.inter_unit_delay_ms),
            parallel_window: env_parse("PARALLEL_WINDOW").unwrap_or(self.parallel_window),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            store_base_url: std::env::var("STORE_BASE_URL").unwrap_or(self.store_base_url),
            store_owner: std::env::var("STORE_OWNER").unwrap_or(self.store_owner),
            record_kind: std::env::var("RECORD_KIND").unwrap_or(self.record_kind),
            store_timeout_ms: env_parse("STORE_TIMEOUT_MS").unwrap_or(self.store_timeout_ms),
            session_cache_file: std::env::var("SESSION_CACHE_FILE").unwrap_or(self.session_cache_file),
            document_path: std::env::var("DOCUMENT_PATH").unwrap_or(self.document_path),
            language: env_parse("OUTPUT_LANGUAGE").unwrap_or(self.language),
            quiz_range: std::env::var("QUIZ_RANGE").ok().or(self.quiz_range),
            quiz_difficulty: env_parse("QUIZ_DIFFICULTY").unwrap_or(self.quiz_difficulty),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_initial_delay_ms),
            self.retry_max_attempts,
        )
    }

    pub fn inter_unit_delay(&self) -> Duration {
        Duration::from_millis(self.inter_unit_delay_ms)
    }

    /// 解析出题区间 "start-end"
    pub fn parse_quiz_range(&self) -> Result<Option<(usize, usize)>, ConfigError> {
        let Some(raw) = self.quiz_range.as_deref() else {
            return Ok(None);
        };
        let invalid = || ConfigError::EnvVarParseFailed {
            var_name: "QUIZ_RANGE".to_string(),
            value: raw.to_string(),
            expected_type: "start-end".to_string(),
        };
        let (start, end) = raw.split_once('-').ok_or_else(invalid)?;
        let start: usize = start.trim().parse().map_err(|_| invalid())?;
        let end: usize = end.trim().parse().map_err(|_| invalid())?;
        if start == 0 || start > end {
            return Err(invalid());
        }
        Ok(Some((start, end)))
    }
}

fn env_parse<T: std::str::FromStr>(var_name: &str) -> Option<T> {
    std::env::var(var_name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_policy() {
        let policy = Config::default().retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            llm_model_name = "local-model"
            language = "hindi"
            quiz_range = "2-4"
            "#,
        )
        .unwrap();
        assert_eq!(config.llm_model_name, "local-model");
        assert_eq!(config.language, Language::Hindi);
        assert_eq!(config.inter_unit_delay_ms, 1000);
        assert_eq!(config.parse_quiz_range().unwrap(), Some((2, 4)));
    }

    #[test]
    fn test_bad_quiz_range() {
        let config = Config {
            quiz_range: Some("three".to_string()),
            ..Default::default()
        };
        assert!(config.parse_quiz_range().is_err());

        let reversed = Config {
            quiz_range: Some("4-2".to_string()),
            ..Default::default()
        };
        assert!(reversed.parse_quiz_range().is_err());
    }
}
