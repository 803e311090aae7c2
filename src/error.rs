use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 分析服务错误
    #[error("分析服务错误: {0}")]
    Analysis(#[from] AnalysisError),
    /// 记录存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 页面处理错误
    #[error("页面错误: {0}")]
    Unit(#[from] UnitError),
    /// 出题错误
    #[error("出题错误: {0}")]
    Quiz(#[from] QuizError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 分析服务错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// 请求频率限制（可重试）
    #[error("请求频率限制: {message}")]
    RateLimited { message: String },
    /// 请求失败（不可重试）
    #[error("请求失败: {message}")]
    RequestFailed { message: String },
}

impl AnalysisError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        AnalysisError::RateLimited {
            message: message.into(),
        }
    }

    pub fn request_failed(message: impl Into<String>) -> Self {
        AnalysisError::RequestFailed {
            message: message.into(),
        }
    }

    /// 只有频率限制可以重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalysisError::RateLimited { .. })
    }
}

/// 记录存储错误
///
/// 存储错误永远是非致命的，只记录日志并通知
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// 请求未送达或被拒绝，存储端没有产生任何变更
    #[error("存储服务不可用 ({operation}): {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },
    /// 请求已发出，但结果未知（超时、连接中断、响应无法解析）
    #[error("存储请求结果未知 ({operation}): {message}")]
    OutcomeUnknown {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn outcome_unknown(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::OutcomeUnknown {
            operation,
            message: message.into(),
        }
    }

    /// 存储端可能已经执行了请求
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, StoreError::OutcomeUnknown { .. })
    }
}

/// 页面处理错误
#[derive(Debug, Error)]
pub enum UnitError {
    /// 页码超出范围
    #[error("页码 {index} 超出范围 [1, {total}]")]
    IndexOutOfRange { index: usize, total: usize },
    /// 页码区间无效
    #[error("页码区间 {start}-{end} 无效 (共 {total} 页)")]
    InvalidRange {
        start: usize,
        end: usize,
        total: usize,
    },
    /// 页面文本提取失败
    #[error("第 {unit} 页文本提取失败: {message}")]
    ExtractionFailed { unit: usize, message: String },
    /// 页面分析失败（终止）
    #[error("第 {unit} 页分析失败 (已尝试 {attempts} 次): {source}")]
    AnalysisFailed {
        unit: usize,
        attempts: u32,
        #[source]
        source: AnalysisError,
    },
    /// 页面处于失败状态，需要手动重试
    #[error("第 {unit} 页此前分析失败，需要手动重试")]
    NeedsManualRetry { unit: usize },
    /// 尚未打开任何文档
    #[error("尚未打开文档")]
    NoSession,
}

impl UnitError {
    /// 失败的页码（如果有）
    pub fn unit(&self) -> Option<usize> {
        match self {
            UnitError::IndexOutOfRange { index, .. } => Some(*index),
            UnitError::ExtractionFailed { unit, .. }
            | UnitError::AnalysisFailed { unit, .. }
            | UnitError::NeedsManualRetry { unit } => Some(*unit),
            UnitError::InvalidRange { .. } | UnitError::NoSession => None,
        }
    }
}

/// 出题错误
#[derive(Debug, Error)]
pub enum QuizError {
    /// 区间内没有已完成分析的页面
    #[error("第 {start}-{end} 页没有已完成的分析")]
    NoAnalyzedUnits { start: usize, end: usize },
    /// 出题请求失败
    #[error("出题请求失败: {0}")]
    Generation(#[source] AnalysisError),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(format!("JSON解析失败: {}", err))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rate_limit_is_retryable() {
        assert!(AnalysisError::rate_limited("429").is_retryable());
        assert!(!AnalysisError::request_failed("500").is_retryable());
    }

    #[test]
    fn test_store_error_outcome() {
        assert!(StoreError::outcome_unknown("create", "timed out").is_outcome_unknown());
        assert!(!StoreError::unavailable("create", "HTTP 503").is_outcome_unknown());
    }

    #[test]
    fn test_unit_error_reports_failing_unit() {
        let err = UnitError::AnalysisFailed {
            unit: 3,
            attempts: 1,
            source: AnalysisError::request_failed("boom"),
        };
        assert_eq!(err.unit(), Some(3));
        assert!(err.to_string().contains("第 3 页"));
        assert_eq!(UnitError::NoSession.unit(), None);
    }
}
